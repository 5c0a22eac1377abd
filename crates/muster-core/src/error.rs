use thiserror::Error;

use crate::types::NodeState;

#[derive(Debug, Error)]
pub enum MusterError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    #[error("Concurrency limit must be at least 1, got {0}")]
    InvalidConcurrency(i64),

    #[error("Compound filters cannot be used for batch runs: {0}")]
    CompoundFilter(String),

    #[error("Unknown batch command: {0}")]
    UnknownCommand(String),

    #[error("Command parameter error: {command}: {message}")]
    CommandParams { command: String, message: String },

    // Node state machine errors
    #[error("Invalid node state transition: {from} -> {to}")]
    InvalidTransition { from: NodeState, to: NodeState },

    // Transport errors (fatal: the agent client itself is unusable)
    #[error("Transport failure: {0}")]
    Transport(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MusterError {
    /// Whether this error is a caller mistake caught before any dispatch.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::ConfigNotFound(_)
                | Self::InvalidConcurrency(_)
                | Self::CompoundFilter(_)
                | Self::UnknownCommand(_)
                | Self::CommandParams { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        assert!(MusterError::InvalidConcurrency(0).is_configuration());
        assert!(MusterError::CompoundFilter("(a and b)".into()).is_configuration());
        assert!(MusterError::UnknownCommand("bogus".into()).is_configuration());
        assert!(!MusterError::Transport("connection lost".into()).is_configuration());
    }

    #[test]
    fn test_display_messages() {
        let e = MusterError::InvalidConcurrency(-3);
        assert_eq!(e.to_string(), "Concurrency limit must be at least 1, got -3");

        let e = MusterError::InvalidTransition {
            from: NodeState::Succeeded,
            to: NodeState::Running,
        };
        assert!(e.to_string().contains("succeeded -> running"));
    }
}
