//! Flow crate errors.
//!
//! Configuration problems are reported when an engine is built, never while it
//! runs. Everything a collaborator returns is wrapped unchanged in
//! `FlowError::Collaborator` so the caller of `flow()` sees the original cause.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Invalid flow control thresholds: low={low} mid={mid} high={high} (require low < mid < high)")]
    InvalidThresholds { low: u64, mid: u64, high: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Collaborator(#[from] tributary_core::Error),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("Flow task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_error_display() {
        let err = FlowError::InvalidThresholds {
            low: 50,
            mid: 50,
            high: 100,
        };
        assert_eq!(
            err.to_string(),
            "Invalid flow control thresholds: low=50 mid=50 high=100 (require low < mid < high)"
        );
    }

    #[test]
    fn test_collaborator_error_is_transparent() {
        let err: FlowError = tributary_core::Error::InvalidRange { start: 9, end: 3 }.into();
        assert_eq!(err.to_string(), "Invalid log range: 9..3");
        assert!(matches!(err, FlowError::Collaborator(_)));
    }
}
