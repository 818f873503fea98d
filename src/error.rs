//! Error types for process-key-sequencer.
//!
//! Configuration and target-resolution failures surface synchronously from
//! `Dispatcher::start`; everything that happens during a run is reported
//! through the run's event stream instead.

use thiserror::Error;

/// Main error type for process-key-sequencer operations.
#[derive(Error, Debug)]
pub enum SequencerError {
    /// The key/delay sequence is empty or malformed.
    #[error("invalid sequence: {0}")]
    InvalidSequence(String),

    /// The specified key is invalid or unsupported.
    #[error("invalid key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// No live, injectable target exists for the process identifier.
    #[error("target process {pid} not found: {reason}")]
    TargetNotFound { pid: u32, reason: String },

    /// Error parsing a duration value.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing a configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing a configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error registering the stop hotkey.
    #[error("hotkey error: {0}")]
    Hotkey(String),

    /// No async runtime is available to host a run.
    #[error("runtime error: {0}")]
    Runtime(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for process-key-sequencer operations.
pub type Result<T> = std::result::Result<T, SequencerError>;

impl SequencerError {
    pub fn invalid_sequence(message: impl Into<String>) -> Self {
        Self::InvalidSequence(message.into())
    }

    pub fn invalid_key(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn target_not_found(pid: u32, reason: impl Into<String>) -> Self {
        Self::TargetNotFound {
            pid,
            reason: reason.into(),
        }
    }

    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn hotkey(message: impl Into<String>) -> Self {
        Self::Hotkey(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SequencerError::target_not_found(4242, "no such process");
        assert_eq!(
            err.to_string(),
            "target process 4242 not found: no such process"
        );

        let err = SequencerError::invalid_key("xyz", "unknown key");
        assert_eq!(err.to_string(), "invalid key 'xyz': unknown key");

        let err = SequencerError::invalid_sequence("sequence is empty");
        assert_eq!(err.to_string(), "invalid sequence: sequence is empty");
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: SequencerError = json_err.into();
        assert!(matches!(err, SequencerError::Json(_)));
    }
}
