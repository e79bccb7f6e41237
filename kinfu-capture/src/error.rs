//! Capture error types.

use kinfu_data::ParseError;
use thiserror::Error;

/// Errors that can occur while driving a capture device.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device fault: capture returned fatal status {0}")]
    DeviceFault(i32),

    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Native symbol not found: {0}")]
    MissingSymbol(&'static str),

    #[error("Capture session is already running")]
    AlreadyRunning,

    #[error("Capture session is not running")]
    NotRunning,

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to decode capture data: {0}")]
    Parse(#[from] ParseError),

    #[error("Failed to parse configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
