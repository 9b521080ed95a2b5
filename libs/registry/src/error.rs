//! Errors returned by metadata sources.

use std::io;

use reqwest::StatusCode;
use thiserror::Error;

/// Registry API error codes that mean "this repository does not exist".
///
/// Pagination treats these as an empty listing rather than a failure.
const NOT_FOUND_CODES: &[&str] = &["NAME_UNKNOWN"];

/// Errors from metadata source operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("registry error {code}: {message}")]
    Api { code: String, message: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid manifest for {reference}: {reason}")]
    InvalidManifest { reference: String, reason: String },

    #[error("missing or malformed {header} header for {url}")]
    MissingHeader { header: &'static str, url: String },

    #[error("invalid URL {0}")]
    InvalidUrl(String),

    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: Box<RegistryError>,
    },
}

impl RegistryError {
    /// Returns true for failures worth retrying: timeouts, connection
    /// problems and server-side 5xx/429 responses.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            _ => false,
        }
    }

    /// Returns true when the source reported the resource as absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) => true,
            Self::Status { status, .. } => *status == StatusCode::NOT_FOUND,
            Self::Api { code, .. } => NOT_FOUND_CODES.contains(&code.as_str()),
            _ => false,
        }
    }

    /// Returns true for an empty or unparseable manifest body.
    pub fn is_invalid_manifest(&self) -> bool {
        matches!(self, Self::InvalidManifest { .. })
    }
}
