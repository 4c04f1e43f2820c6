//! Error handling for tabfx
//!
//! Nothing in the engine is fatal: callers either get a `Result` back
//! (acquisition, settings) or the failing stage is dropped from the graph.

use thiserror::Error;

use crate::session::SourceId;

/// Result type alias for tabfx operations
pub type Result<T> = std::result::Result<T, TabFxError>;

/// Main error type for tabfx operations
#[derive(Error, Debug)]
pub enum TabFxError {
    // Capture Errors
    #[error("Stream acquisition failed for source {source_id}: {reason}")]
    StreamAcquisition { source_id: SourceId, reason: String },

    #[error("No capture session for source {source_id}")]
    SessionNotFound { source_id: SourceId },

    #[error("Renderer queue full, cannot start source {source_id}")]
    RenderQueueFull { source_id: SourceId },

    // Reverse Errors
    #[error("Reverse playback already active for source {source_id}")]
    ReverseActive { source_id: SourceId },

    #[error("No reverse playback for source {source_id}")]
    ReverseInactive { source_id: SourceId },

    // DSP Unit Errors
    #[error("Failed to load {unit}: {reason}")]
    UnitLoad { unit: String, reason: String },

    #[error("{unit} failed while processing: {reason}")]
    UnitProcessing { unit: String, reason: String },

    #[error("{unit} disabled after {failures} failures")]
    UnitDisabled { unit: String, failures: u32 },

    // Configuration Errors
    #[error("Invalid parameter {param}: {value} (expected {expected})")]
    InvalidParameter {
        param: String,
        value: String,
        expected: String,
    },

    // I/O Errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization Errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TabFxError {
    /// Shorthand for [`TabFxError::InvalidParameter`]
    pub fn invalid(param: &str, value: impl ToString, expected: &str) -> Self {
        TabFxError::InvalidParameter {
            param: param.to_string(),
            value: value.to_string(),
            expected: expected.to_string(),
        }
    }

    /// Get the error code for this error type
    pub fn error_code(&self) -> &'static str {
        match self {
            TabFxError::StreamAcquisition { .. } => "STREAM_ACQUISITION",
            TabFxError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            TabFxError::RenderQueueFull { .. } => "RENDER_QUEUE_FULL",
            TabFxError::ReverseActive { .. } => "REVERSE_ACTIVE",
            TabFxError::ReverseInactive { .. } => "REVERSE_INACTIVE",
            TabFxError::UnitLoad { .. } => "UNIT_LOAD",
            TabFxError::UnitProcessing { .. } => "UNIT_PROCESSING",
            TabFxError::UnitDisabled { .. } => "UNIT_DISABLED",
            TabFxError::InvalidParameter { .. } => "INVALID_PARAMETER",
            TabFxError::Io(_) => "IO_ERROR",
            TabFxError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Check if retrying the operation can succeed
    pub fn is_recoverable(&self) -> bool {
        match self {
            TabFxError::StreamAcquisition { .. } => true,
            TabFxError::SessionNotFound { .. } => true,
            TabFxError::RenderQueueFull { .. } => true,
            TabFxError::ReverseActive { .. } => true,
            TabFxError::ReverseInactive { .. } => true,
            TabFxError::UnitLoad { .. } => true,
            TabFxError::UnitProcessing { .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = TabFxError::StreamAcquisition {
            source_id: SourceId(7),
            reason: "permission denied".to_string(),
        };
        assert_eq!(err.error_code(), "STREAM_ACQUISITION");
        assert!(err.is_recoverable());
        assert!(err.to_string().contains("source 7"));
    }

    #[test]
    fn test_disabled_unit_is_not_recoverable() {
        let err = TabFxError::UnitDisabled {
            unit: "accurate pitch".to_string(),
            failures: 10,
        };
        assert_eq!(err.error_code(), "UNIT_DISABLED");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_invalid_helper() {
        let err = TabFxError::invalid("pan", 2.0, "-1 to 1");
        assert_eq!(err.to_string(), "Invalid parameter pan: 2 (expected -1 to 1)");
    }
}
