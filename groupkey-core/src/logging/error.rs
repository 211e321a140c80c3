//! Error types for the logging subsystem

use thiserror::Error;

/// Errors that can occur while setting up logging
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoggingError {
    /// A global subscriber was already installed, or the subscriber failed to build
    #[error("Failed to initialize logging: {0}")]
    InitializationFailed(String),

    /// A log level string did not name a known level
    #[error("Unknown log level: {0}")]
    UnknownLevel(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logging_error_display() {
        let err = LoggingError::InitializationFailed("already set".to_string());
        assert_eq!(err.to_string(), "Failed to initialize logging: already set");

        let err = LoggingError::UnknownLevel("loud".to_string());
        assert_eq!(err.to_string(), "Unknown log level: loud");
    }
}
