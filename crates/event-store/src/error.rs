use common::AggregateRef;
use thiserror::Error;

use crate::{EventId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// A concurrency conflict occurred when appending events.
    /// The expected version did not match the stored version.
    #[error(
        "Concurrency conflict for aggregate {aggregate}: expected version {expected}, found {actual}"
    )]
    ConcurrencyConflict {
        aggregate: AggregateRef,
        expected: Version,
        actual: Version,
    },

    /// Event metadata was read before the store assigned it.
    #[error("Uninitialized event {0}: metadata has not been assigned by the store")]
    UninitializedEvent(EventId),

    /// Event metadata was assigned a second time.
    #[error("Metadata for event {0} has already been assigned")]
    MetadataAlreadyAssigned(EventId),

    /// The event batch is not valid for appending.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// No decoder is registered for the event's type discriminator.
    #[error("Unknown event type: {0}")]
    UnknownEventType(String),

    /// A decoder was registered twice for the same type discriminator.
    #[error("Duplicate event type registration: {0}")]
    DuplicateEventType(String),

    /// Publishing an already-stored event to subscribers failed.
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EventStoreError {
    /// Returns true if the caller may retry after reloading current state.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EventStoreError::ConcurrencyConflict { .. })
    }
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        let conflict = EventStoreError::ConcurrencyConflict {
            aggregate: AggregateRef::new("ServerGroup", "app-v001"),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert!(conflict.is_retryable());
        assert!(!EventStoreError::InvalidEvent("empty".into()).is_retryable());
        assert!(!EventStoreError::UnknownEventType("Nope".into()).is_retryable());
    }

    #[test]
    fn conflict_message_names_aggregate_and_versions() {
        let conflict = EventStoreError::ConcurrencyConflict {
            aggregate: AggregateRef::new("ServerGroup", "app-v001"),
            expected: Version::new(1),
            actual: Version::new(2),
        };
        assert_eq!(
            conflict.to_string(),
            "Concurrency conflict for aggregate ServerGroup/app-v001: expected version 1, found 2"
        );
    }
}
