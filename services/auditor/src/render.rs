//! Treemap rendering.
//!
//! Produces a standalone HTML page that draws the report rows with the
//! Google Charts TreeMap. The rows are embedded as a DataTable literal.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{json, Value};
use tracing::info;

use crate::report::{AuditReport, ReportRow};

/// DataTable literal with `Group Name`, `Parent` and `Size (size)` columns.
pub fn data_table(rows: &[ReportRow]) -> Value {
    let rows: Vec<Value> = rows
        .iter()
        .map(|row| {
            json!({
                "c": [
                    {"v": row.name},
                    {"v": row.parent},
                    {"v": row.size},
                ]
            })
        })
        .collect();

    json!({
        "cols": [
            {"id": "name", "label": "Group Name", "type": "string"},
            {"id": "parent", "label": "Parent", "type": "string"},
            {"id": "size", "label": "Size (size)", "type": "number"},
        ],
        "rows": rows,
    })
}

/// HTML page drawing `rows` as a treemap.
pub fn render_treemap(title: &str, rows: &[ReportRow]) -> String {
    // `</` would terminate the script element early.
    let table = data_table(rows).to_string().replace("</", "<\\/");
    let title = escape_html(title);

    format!(
        r#"<html>
  <head>
    <title>{title}</title>
    <script type="text/javascript" src="https://www.gstatic.com/charts/loader.js"></script>
    <script>
      google.charts.load('current', {{'packages': ['treemap']}});
      google.charts.setOnLoadCallback(drawChart);
      function drawChart() {{
        var tree = new google.visualization.TreeMap(document.getElementById('chart_div'));
        var data = new google.visualization.DataTable({table});
        tree.draw(data);
      }}
    </script>
  </head>
  <body>
    <div id="chart_div" style="width: 100%; height: 100%;"></div>
  </body>
</html>
"#
    )
}

/// Write the whole report as one treemap page.
pub fn write_treemap(path: &Path, report: &AuditReport) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, render_treemap("Registry storage", &report.rows))?;
    info!(path = %path.display(), rows = report.rows.len(), "Wrote treemap");
    Ok(())
}

/// Write one treemap page per image into `dir`.
pub fn write_per_image(dir: &Path, report: &AuditReport) -> io::Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;

    let mut written = Vec::with_capacity(report.images.len());
    for image in &report.images {
        let path = dir.join(format!("{}.html", file_stem(&image.name)));
        fs::write(&path, render_treemap(&image.name, &report.rows_for_image(&image.name)))?;
        written.push(path);
    }

    info!(dir = %dir.display(), pages = written.len(), "Wrote per-image treemaps");
    Ok(written)
}

/// Image names may contain `/`; flatten them into a single path component.
fn file_stem(image: &str) -> String {
    image
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
