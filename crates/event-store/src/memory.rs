use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::AggregateRef;
use tokio::sync::RwLock;

use crate::{
    Aggregate, EventEnvelope, EventMetadata, EventStoreError, ListAggregatesCriteria,
    ListAggregatesResult, Result, Sequence, ServiceIdentity, Version,
    publisher::EventPublisher,
    store::{EventStore, EventStream, validate_events_for_append},
};

#[derive(Debug, Default)]
struct AggregateLog {
    version: Version,
    events: Vec<EventEnvelope>,
}

#[derive(Debug, Default)]
struct StoreState {
    logs: HashMap<AggregateRef, AggregateLog>,
    /// Every event in sequence order.
    all: Vec<EventEnvelope>,
    last_sequence: Sequence,
}

/// In-memory event store implementation.
///
/// Holds every aggregate log behind a single lock, so appends are atomic and
/// sequences are gap-free. Intended for tests and single-process use.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    state: Arc<RwLock<StoreState>>,
    identity: ServiceIdentity,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identity stamped into the metadata of appended events.
    pub fn with_identity(mut self, identity: ServiceIdentity) -> Self {
        self.identity = identity;
        self
    }

    /// Publishes every appended event through `publisher`.
    pub fn with_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.state.read().await.all.len()
    }

    /// Clears all events. Sequences keep increasing.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.logs.clear();
        state.all.clear();
    }

    async fn publish_all(&self, events: &[EventEnvelope]) {
        let Some(publisher) = &self.publisher else {
            return;
        };
        for event in events {
            if let Err(e) = publisher.publish(event).await {
                tracing::warn!(
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    error = %e,
                    "event publish failed; append stands"
                );
            }
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        aggregate: &AggregateRef,
        expected_version: Version,
        events: Vec<EventEnvelope>,
    ) -> Result<Version> {
        validate_events_for_append(aggregate, &events)?;

        let (new_version, stored) = {
            let mut guard = self.state.write().await;
            let state = &mut *guard;

            let current_version = state
                .logs
                .get(aggregate)
                .map(|log| log.version)
                .unwrap_or_default();

            if current_version != expected_version {
                tracing::debug!(
                    %aggregate,
                    expected = %expected_version,
                    actual = %current_version,
                    "append rejected: stale version"
                );
                return Err(EventStoreError::ConcurrencyConflict {
                    aggregate: aggregate.clone(),
                    expected: expected_version,
                    actual: current_version,
                });
            }

            let timestamp = Utc::now();
            let mut sequence = state.last_sequence;
            let mut stored = Vec::with_capacity(events.len());
            for mut event in events {
                sequence = sequence.next();
                event.assign_metadata(EventMetadata {
                    sequence,
                    originating_version: expected_version,
                    timestamp,
                    service_version: self.identity.service_version.clone(),
                    source: self.identity.source.clone(),
                })?;
                stored.push(event);
            }

            let log = state.logs.entry(aggregate.clone()).or_default();
            log.version = expected_version.advance(stored.len());
            log.events.extend(stored.iter().cloned());
            state.all.extend(stored.iter().cloned());
            state.last_sequence = sequence;

            (log.version, stored)
        };

        self.publish_all(&stored).await;

        Ok(new_version)
    }

    async fn load(&self, aggregate_type: &str, aggregate_id: &str) -> Result<Vec<EventEnvelope>> {
        let state = self.state.read().await;
        let key = AggregateRef::new(aggregate_type, aggregate_id);
        Ok(state
            .logs
            .get(&key)
            .map(|log| log.events.clone())
            .unwrap_or_default())
    }

    async fn aggregate(
        &self,
        aggregate_type: &str,
        aggregate_id: &str,
    ) -> Result<Option<Aggregate>> {
        let state = self.state.read().await;
        let key = AggregateRef::new(aggregate_type, aggregate_id);
        Ok(state
            .logs
            .get(&key)
            .map(|log| Aggregate::at_version(key.clone(), log.version)))
    }

    async fn list_aggregates(
        &self,
        criteria: ListAggregatesCriteria,
    ) -> Result<ListAggregatesResult> {
        let after: Option<AggregateRef> = match &criteria.token {
            Some(token) => Some(serde_json::from_str(token)?),
            None => None,
        };

        let state = self.state.read().await;
        let mut matching: Vec<Aggregate> = state
            .logs
            .iter()
            .filter(|(key, _)| {
                if let Some(ref t) = criteria.aggregate_type
                    && &key.aggregate_type != t
                {
                    return false;
                }
                if let Some(ref after) = after
                    && *key <= after
                {
                    return false;
                }
                true
            })
            .map(|(key, log)| Aggregate::at_version(key.clone(), log.version))
            .collect();
        matching.sort_by(|a, b| a.reference().cmp(b.reference()));

        let page_size = criteria.page_size.max(1);
        let next_token = if matching.len() > page_size {
            matching.truncate(page_size);
            match matching.last() {
                Some(last) => Some(serde_json::to_string(last.reference())?),
                None => None,
            }
        } else {
            None
        };

        Ok(ListAggregatesResult {
            aggregates: matching,
            next_token,
        })
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.state.read().await.all.clone();
        Ok(Box::pin(stream::iter(events.into_iter().map(Ok))))
    }
}
