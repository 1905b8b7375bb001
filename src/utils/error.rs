//! Error types and handling
//!
//! Common error types used across the capture, pipeline and recording layers.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum CameraError {
    #[error("Device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("No capture device selected")]
    NoDeviceSelected,

    #[error("No capture devices found")]
    EmptyCatalog,

    #[error("A recording is already in progress")]
    AlreadyRecording,

    #[error("No frame available yet")]
    NoFrameAvailable,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame processing failed: {0}")]
    Pipeline(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl CameraError {
    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            CameraError::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            CameraError::NoDeviceSelected => "NO_DEVICE_SELECTED",
            CameraError::EmptyCatalog => "EMPTY_CATALOG",
            CameraError::AlreadyRecording => "ALREADY_RECORDING",
            CameraError::NoFrameAvailable => "NO_FRAME_AVAILABLE",
            CameraError::Io(_) => "IO_ERROR",
            CameraError::Pipeline(_) => "PIPELINE_FAILURE",
            CameraError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Error payload surfaced to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&CameraError> for ErrorResponse {
    fn from(error: &CameraError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl From<CameraError> for ErrorResponse {
    fn from(error: CameraError) -> Self {
        ErrorResponse::from(&error)
    }
}

/// Result type alias using CameraError
pub type CameraResult<T> = Result<T, CameraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_codes() {
        let response = ErrorResponse::from(CameraError::AlreadyRecording);
        assert_eq!(response.code, "ALREADY_RECORDING");
        assert_eq!(response.message, "A recording is already in progress");

        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let response = ErrorResponse::from(CameraError::from(io));
        assert_eq!(response.code, "IO_ERROR");
        assert!(response.message.contains("missing"));
    }
}
