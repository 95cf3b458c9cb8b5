//! Error types for the export pipeline

use thiserror::Error;

/// Result type alias for export operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while exporting a widget
#[derive(Error, Debug)]
pub enum Error {
    /// The export target is missing, detached, or not an element
    #[error("Invalid export target: {0}")]
    InvalidTarget(String),

    /// Another export call is still running on this exporter
    #[error("An export is already in progress")]
    ExportInFlight,

    /// A capture attempt failed or the capture chain was exhausted
    #[error("Capture failed: {0}")]
    CaptureError(String),

    /// Failed to render content
    #[error("Rendering failed: {0}")]
    RenderError(String),

    /// Image bytes could not be decoded
    #[error("Image decode failed: {0}")]
    DecodeError(String),

    /// A delivery channel failed
    #[error("Delivery failed: {0}")]
    DeliveryError(String),

    /// The user dismissed the native share sheet
    #[error("Share cancelled by user")]
    ShareAborted,

    /// The environment does not offer this capability
    #[error("Unsupported by environment: {0}")]
    Unsupported(String),

    /// Operation timed out
    #[error("Operation timed out after {0}ms")]
    Timeout(u64),

    /// Invalid configuration or request parameter
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Network error
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Key-value store error
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Filesystem error
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::DecodeError(err.to_string())
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::NetworkError(format!("request timed out: {}", err))
        } else {
            Error::NetworkError(err.to_string())
        }
    }
}
