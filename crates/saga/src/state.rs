//! Saga status state machine.

use serde::{Deserialize, Serialize};

/// The status of a saga in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ──► Running ──┬──► Completed
///                       ├──► Failed
///                       └──► Cancelled
/// ```
/// Terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaStatus {
    /// No saga has been started against the aggregate yet.
    #[default]
    Pending,

    /// Saga steps are being executed.
    Running,

    /// All steps completed successfully (terminal state).
    Completed,

    /// A step failed and the failure was not handled (terminal state).
    Failed,

    /// The saga was cancelled before finishing (terminal state).
    Cancelled,
}

impl SagaStatus {
    /// Returns true if a new saga may be started in this status.
    pub fn can_start(&self) -> bool {
        matches!(self, SagaStatus::Pending) || self.is_terminal()
    }

    /// Returns true if the saga can still make progress.
    pub fn is_active(&self) -> bool {
        matches!(self, SagaStatus::Running)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SagaStatus::Completed | SagaStatus::Failed | SagaStatus::Cancelled
        )
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStatus::Pending => "PENDING",
            SagaStatus::Running => "RUNNING",
            SagaStatus::Completed => "COMPLETED",
            SagaStatus::Failed => "FAILED",
            SagaStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_pending() {
        assert_eq!(SagaStatus::default(), SagaStatus::Pending);
    }

    #[test]
    fn test_can_start() {
        assert!(SagaStatus::Pending.can_start());
        assert!(!SagaStatus::Running.can_start());
        assert!(SagaStatus::Completed.can_start());
        assert!(SagaStatus::Failed.can_start());
        assert!(SagaStatus::Cancelled.can_start());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!SagaStatus::Pending.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(SagaStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(SagaStatus::Pending.to_string(), "PENDING");
        assert_eq!(SagaStatus::Running.to_string(), "RUNNING");
        assert_eq!(SagaStatus::Completed.to_string(), "COMPLETED");
        assert_eq!(SagaStatus::Failed.to_string(), "FAILED");
        assert_eq!(SagaStatus::Cancelled.to_string(), "CANCELLED");
    }
}
