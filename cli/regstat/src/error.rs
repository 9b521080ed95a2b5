//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

use regstat_auditor::AuditError;
use regstat_registry::RegistryError;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("No registry configured. Pass --registry-url or --storage-root.")]
    NoSource,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Audit failed: {0}")]
    Audit(#[from] AuditError),
}

/// Walk to the registry error at the bottom of an audit failure, if any.
fn registry_cause(err: &CliError) -> Option<&RegistryError> {
    let registry = match err {
        CliError::Registry(e) => e,
        CliError::Audit(AuditError::Listing { source, .. })
        | CliError::Audit(AuditError::Manifest { source, .. }) => source,
        CliError::Audit(AuditError::BlobInfo { source, .. }) => source.as_ref(),
        _ => return None,
    };

    match registry {
        RegistryError::RetriesExhausted { source, .. } => Some(source.as_ref()),
        other => Some(other),
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    let Some(cli_err) = err.downcast_ref::<CliError>() else {
        return;
    };

    if matches!(cli_err, CliError::NoSource) {
        eprintln!(
            "\n{}",
            "Hint: Set REGSTAT_REGISTRY_URL or REGSTAT_STORAGE_ROOT, or add one to the config file."
                .yellow()
        );
        return;
    }

    if let CliError::Audit(AuditError::MissingBlobInfo { .. }) = cli_err {
        eprintln!(
            "\n{}",
            "Hint: This indicates a bug in blob fetch deduplication. Please report it.".yellow()
        );
        return;
    }

    match registry_cause(cli_err) {
        Some(RegistryError::Http(_)) => {
            eprintln!(
                "\n{}",
                "Hint: Check your network connection and registry URL.".yellow()
            );
        }
        Some(RegistryError::Api { code, .. }) if code == "UNAUTHORIZED" || code == "DENIED" => {
            eprintln!(
                "\n{}",
                "Hint: The registry rejected the credentials. Check --auth-token.".yellow()
            );
        }
        Some(e) if e.is_not_found() => {
            eprintln!(
                "\n{}",
                "Hint: The repository or tag does not exist.".yellow()
            );
        }
        _ => {}
    }
}
