//! Per-item failures. These never abort a batch: callers log them and count
//! them, or turn them into error records.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures talking to the procurement portal.
#[derive(Debug, Error)]
pub enum PortalError {
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },

    #[error("request to {url} timed out: no data for {after:?}")]
    Timeout { url: String, after: Duration },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("unexpected response from {url}: {message}")]
    Parse { url: String, message: String },

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl PortalError {
    pub fn network(url: &str, err: impl std::fmt::Display) -> Self {
        Self::Network {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Failures talking to the AI service.
#[derive(Debug, Error)]
pub enum AiError {
    /// Missing credential or client.
    #[error("{0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    /// Non-2xx response.
    #[error("API error: {0}")]
    Api(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("No text output in response")]
    NoText,

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}
