//! Error types for esbox.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// esbox error type.
///
/// Every fatal condition is reported synchronously to the caller of the
/// triggering operation; background tasks never swallow failures.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration, detected before any I/O
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Download failed (network error, timeout, non-success response)
    #[error("failed to download {url}: {message}")]
    Download { url: String, message: String },

    /// A concurrent download of the same file stopped making progress
    /// and its completion marker never appeared
    #[error("broken download: another party appears to have abandoned {path}")]
    DownloadAbandoned { path: PathBuf },

    /// The downloaded file exists but its completion marker was never created
    #[error("broken download: {path} exists but its completion marker does not")]
    BrokenDownload { path: PathBuf },

    /// Archive extraction failed
    #[error("failed to extract {path}: {message}")]
    Extract { path: PathBuf, message: String },

    /// The plugin manager exited with a non-zero status
    #[error("plugin manager failed for plugin '{plugin}' ({status})")]
    PluginManager { plugin: String, status: String },

    /// The server did not reach the started state within the start timeout
    #[error("server failed to start within {timeout:?}; check previous logs for the cause")]
    StartupTimeout { timeout: Duration },

    /// The server process exited before signaling readiness
    #[error("server process exited before signaling readiness; check previous logs for the cause")]
    StartupFailed,

    /// The server answered with a non-success status code
    #[error("server responded with status {status}:\n{body}")]
    Http { status: u16, body: String },

    /// Transport-level HTTP error (connection refused, timeout, ...)
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with a body this crate could not interpret
    #[error("unexpected response from server: {0}")]
    UnexpectedResponse(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for esbox operations.
pub type Result<T> = std::result::Result<T, Error>;
