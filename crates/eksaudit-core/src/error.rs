//! Error types for the EKS audit engine

use thiserror::Error;

/// Result type alias using the engine Error
pub type Result<T> = std::result::Result<T, Error>;

/// Engine error types
///
/// These cover loading and configuration. Failures reading facts from the
/// target are reported through [`crate::FetchError`] and never surface here.
#[derive(Error, Debug)]
pub enum Error {
    // === Control Errors ===
    #[error("Control not found: {control_id}")]
    ControlNotFound { control_id: String },

    #[error("Invalid control definition: {path} - {message}")]
    InvalidControlDefinition { path: String, message: String },

    #[error("Duplicate control id: {control_id}")]
    DuplicateControl { control_id: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Invalid input override: {0}")]
    InvalidInput(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("File not found: {path}")]
    FileNotFound { path: String },
}

impl Error {
    /// Check if this error should abort the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Configuration(_) | Error::InvalidConfig { .. })
    }

    /// Get an error code for logging
    pub fn code(&self) -> &'static str {
        match self {
            Error::ControlNotFound { .. } => "CONTROL_NOT_FOUND",
            Error::InvalidControlDefinition { .. } => "INVALID_CONTROL_DEF",
            Error::DuplicateControl { .. } => "DUPLICATE_CONTROL",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::InvalidInput(_) => "INVALID_INPUT",
            Error::Io(_) => "IO_ERROR",
            Error::FileNotFound { .. } => "FILE_NOT_FOUND",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::ControlNotFound {
            control_id: "eks-cis-9.9.9".into(),
        };
        assert_eq!(err.code(), "CONTROL_NOT_FOUND");
        assert!(!err.is_fatal());

        let err = Error::Configuration("bad".into());
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "Configuration error: bad");
    }
}
