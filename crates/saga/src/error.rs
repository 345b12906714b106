//! Saga error types.

use std::time::Duration;

use common::AggregateRef;
use event_store::EventStoreError;
use thiserror::Error;

use crate::state::SagaStatus;

/// Errors that can occur while defining or executing sagas.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Event store error. Concurrency conflicts arrive here and are retryable.
    #[error("Event store error: {0}")]
    EventStore(#[from] EventStoreError),

    /// An `inject` target is not part of the flow.
    #[error("Action not found in flow: {0}")]
    ActionNotFound(String),

    /// A command type could not be resolved, or an internal invariant was
    /// violated. Never retried.
    #[error("Saga system error: {0}")]
    System(String),

    /// An action's step came up but no pending command of the type it
    /// accepts was recorded. Never retried.
    #[error("Saga step '{step}' has no pending {command_type}")]
    MissingCommand { step: String, command_type: String },

    /// A business failure raised by an action or predicate.
    #[error("{0}")]
    Action(String),

    /// A saga step failed.
    #[error("Saga step '{step}' failed: {source}")]
    StepFailed {
        step: String,
        #[source]
        source: Box<SagaError>,
    },

    /// A saga step did not finish within the configured timeout.
    #[error("Saga step '{step}' timed out after {timeout:?}")]
    StepTimeout { step: String, timeout: Duration },

    /// The failure may be retried by resuming the saga later.
    #[error("Retryable: {0}")]
    Retryable(#[source] Box<SagaError>),

    /// Saga is in an invalid state for the requested operation.
    #[error("Invalid saga state: expected {expected}, actual {actual}")]
    InvalidState {
        expected: String,
        actual: SagaStatus,
    },

    /// A saga is already running against the aggregate.
    #[error("Saga already started for aggregate {0}")]
    AlreadyStarted(AggregateRef),

    /// No saga has been recorded for the aggregate.
    #[error("No saga found for aggregate {0}")]
    SagaNotFound(AggregateRef),

    /// A recorded saga names a flow this runtime does not know.
    #[error("Flow not registered: {0}")]
    FlowNotRegistered(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SagaError {
    /// Creates a business failure.
    pub fn action(message: impl Into<String>) -> Self {
        SagaError::Action(message.into())
    }

    /// Returns true if the caller may retry, typically by resuming the saga.
    pub fn is_retryable(&self) -> bool {
        match self {
            SagaError::Retryable(_) => true,
            SagaError::EventStore(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns true for a concurrency conflict on append.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SagaError::EventStore(EventStoreError::ConcurrencyConflict { .. })
        )
    }

    /// Returns true for authoring bugs and invariant violations.
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            SagaError::System(_) | SagaError::ActionNotFound(_) | SagaError::MissingCommand { .. }
        )
    }

    /// Marks the error retryable, leaving already-retryable errors unchanged.
    pub fn into_retryable(self) -> Self {
        if self.is_retryable() {
            self
        } else {
            SagaError::Retryable(Box::new(self))
        }
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
