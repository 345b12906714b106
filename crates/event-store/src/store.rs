use std::pin::Pin;

use async_trait::async_trait;
use common::AggregateRef;
use futures_core::Stream;

use crate::{
    Aggregate, EventEnvelope, EventStoreError, ListAggregatesCriteria, ListAggregatesResult,
    Result, Version,
};

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
///
/// An event store persists events per aggregate with optimistic
/// concurrency control. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to an aggregate's log.
    ///
    /// Events are appended atomically - either all succeed or none do. Fails
    /// with `ConcurrencyConflict` and stores nothing if the aggregate's
    /// current version is not `expected_version`. On success every event
    /// receives store-assigned metadata and the aggregate version advances
    /// by the number of events.
    ///
    /// Returns the new version of the aggregate.
    async fn append(
        &self,
        aggregate: &AggregateRef,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version>;

    /// Retrieves all events of an aggregate in ascending sequence order.
    ///
    /// Returns an empty list for an unknown aggregate.
    async fn load(&self, aggregate_type: &str, aggregate_id: &str) -> Result<Vec<EventEnvelope>>;

    /// Returns the aggregate with its current version, if it has any events.
    async fn aggregate(&self, aggregate_type: &str, aggregate_id: &str)
    -> Result<Option<Aggregate>>;

    /// Lists known aggregates, one page at a time.
    async fn list_aggregates(
        &self,
        criteria: ListAggregatesCriteria,
    ) -> Result<ListAggregatesResult>;

    /// Streams every event in the store in global sequence order.
    async fn stream_all_events(&self) -> Result<EventStream>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event.
    async fn append_event(
        &self,
        aggregate: &AggregateRef,
        expected_version: Version,
        event: EventEnvelope,
    ) -> Result<Version> {
        self.append(aggregate, expected_version, vec![event]).await
    }

    /// Loads the events of an aggregate by reference.
    async fn load_ref(&self, aggregate: &AggregateRef) -> Result<Vec<EventEnvelope>> {
        self.load(&aggregate.aggregate_type, &aggregate.id).await
    }

    /// Returns the current version of an aggregate, `Version::initial()` if unknown.
    async fn current_version(&self, aggregate: &AggregateRef) -> Result<Version> {
        Ok(self
            .aggregate(&aggregate.aggregate_type, &aggregate.id)
            .await?
            .map(|a| a.version())
            .unwrap_or_default())
    }

    /// Checks if an aggregate exists (has any events).
    async fn aggregate_exists(&self, aggregate: &AggregateRef) -> Result<bool> {
        Ok(self
            .aggregate(&aggregate.aggregate_type, &aggregate.id)
            .await?
            .is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch of events before appending it to `aggregate`.
pub fn validate_events_for_append(
    aggregate: &AggregateRef,
    events: &[EventEnvelope],
) -> Result<()> {
    if !aggregate.is_valid() {
        return Err(EventStoreError::InvalidEvent(
            "aggregate type and id must be set".to_string(),
        ));
    }

    if events.is_empty() {
        return Err(EventStoreError::InvalidEvent(
            "Cannot append empty event list".to_string(),
        ));
    }

    for event in events {
        if !event.belongs_to(aggregate) {
            return Err(EventStoreError::InvalidEvent(format!(
                "event {} belongs to {}, not {}",
                event.event_id,
                event.aggregate_ref(),
                aggregate
            )));
        }
        if event.is_initialized() {
            return Err(EventStoreError::MetadataAlreadyAssigned(event.event_id));
        }
    }

    Ok(())
}
