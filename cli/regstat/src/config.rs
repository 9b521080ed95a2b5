//! Configuration file handling.
//!
//! An optional TOML file supplies defaults for anything that can also be
//! passed on the command line. Flags and environment variables always win.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;

/// Configuration file name.
const CONFIG_FILE: &str = "config.toml";

/// Default config file location, if the platform has a config directory.
pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("io", "regstat", "regstat").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
}

/// CLI configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Registry API URL.
    pub registry_url: Option<String>,

    /// Root of the registry storage layout (mounted bucket or filesystem driver root).
    pub storage_root: Option<PathBuf>,

    /// Bucket name reported in blob locations for `storage_root`.
    pub storage_bucket: Option<String>,

    /// Bearer token for the registry API.
    pub auth_token: Option<String>,

    /// Per-request timeout in seconds.
    pub timeout_secs: Option<u64>,

    /// SQLite metadata cache.
    pub cache_path: Option<PathBuf>,

    #[serde(default)]
    pub stats: StatsDefaults,
}

/// Defaults for `regstat stats`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsDefaults {
    pub image_workers: Option<usize>,
    pub blob_workers: Option<usize>,
    pub page_size: Option<usize>,
    pub max_images: Option<usize>,
}

impl Config {
    /// Load config from `path`, or from the default location.
    ///
    /// A missing default file yields the default config; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match default_config_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !explicit && !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config from {:?}", path))
    }

    pub fn parse(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(
            r#"
            registry_url = "https://registry.example.com"
            auth_token = "secret"
            timeout_secs = 30
            cache_path = "/var/cache/regstat.db"

            [stats]
            image_workers = 8
            blob_workers = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.registry_url.as_deref(), Some("https://registry.example.com"));
        assert_eq!(config.timeout_secs, Some(30));
        assert_eq!(config.stats.image_workers, Some(8));
        assert_eq!(config.stats.blob_workers, Some(32));
        assert_eq!(config.stats.page_size, None);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::parse("registry = \"typo\"").is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(Config::load(Some(&temp.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn load_from_explicit_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("regstat.toml");
        fs::write(&path, "storage_root = \"/mnt/registry\"\n").unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.storage_root, Some(PathBuf::from("/mnt/registry")));
    }
}
