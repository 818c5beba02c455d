//! Error types for Threadline
//!
//! This module defines all error types used throughout the library,
//! using `thiserror` for ergonomic error handling.
//!
//! None of these errors is fatal to the process. Each one is contained by the
//! operation that raised it and recovered as described on the variant.

use thiserror::Error;

/// Main error type for Threadline operations
#[derive(Error, Debug)]
pub enum ThreadlineError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network or backend failure before or independent of streaming
    ///
    /// Recovered by appending a fixed error message to the active thread.
    #[error("Request error: {0}")]
    Request(String),

    /// Failure while reading or decoding a chunked response body
    ///
    /// Recovered by replacing the in-progress assistant message with a fixed
    /// error message.
    #[error("Stream decode error: {0}")]
    StreamDecode(String),

    /// Malformed JSON inside a tool marker
    ///
    /// Recovered silently by dropping the single marker occurrence.
    #[error("Marker parse error: {0}")]
    MarkerParse(String),

    /// Key-value persistence errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// An operation referenced a thread or message that does not exist
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for Threadline operations
///
/// Uses `anyhow::Error` so callers can attach context while still being able
/// to `downcast_ref::<ThreadlineError>()` to classify a failure.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ThreadlineError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_request_error_display() {
        let error = ThreadlineError::Request("connection refused".to_string());
        assert_eq!(error.to_string(), "Request error: connection refused");
    }

    #[test]
    fn test_stream_decode_error_display() {
        let error = ThreadlineError::StreamDecode("invalid utf-8".to_string());
        assert_eq!(error.to_string(), "Stream decode error: invalid utf-8");
    }

    #[test]
    fn test_marker_parse_error_display() {
        let error = ThreadlineError::MarkerParse("expected value".to_string());
        assert_eq!(error.to_string(), "Marker parse error: expected value");
    }

    #[test]
    fn test_storage_error_display() {
        let error = ThreadlineError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
    }

    #[test]
    fn test_invalid_operation_display() {
        let error = ThreadlineError::InvalidOperation("message not found".to_string());
        assert_eq!(error.to_string(), "Invalid operation: message not found");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: ThreadlineError = io_error.into();
        assert!(matches!(error, ThreadlineError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: ThreadlineError = json_error.into();
        assert!(matches!(error, ThreadlineError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: ThreadlineError = yaml_error.into();
        assert!(matches!(error, ThreadlineError::Yaml(_)));
    }

    #[test]
    fn test_error_downcasts_through_anyhow() {
        let result: Result<()> = Err(ThreadlineError::Request("boom".into()).into());
        let err = result.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ThreadlineError>(),
            Some(ThreadlineError::Request(_))
        ));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ThreadlineError>();
    }
}
