use chrono::{DateTime, Utc};
use common::AggregateRef;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventPayload, EventStoreError, Result};

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Version number for an aggregate, used for optimistic concurrency control.
///
/// A new aggregate is at version 0. Every appended event advances the
/// version by exactly 1.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(i64);

impl Version {
    /// Creates a new version from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the initial version (0) for a new aggregate.
    pub fn initial() -> Self {
        Self(0)
    }

    /// Returns the next version.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the version after `count` more events.
    pub fn advance(&self, count: usize) -> Self {
        Self(self.0 + count as i64)
    }

    /// Returns the raw version value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Version {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl From<Version> for i64 {
    fn from(version: Version) -> Self {
        version.0
    }
}

/// Position of an event in the store-wide total order.
///
/// Assigned by the store at append time; strictly increasing across all
/// aggregates.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Sequence(i64);

impl Sequence {
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Sequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies the process writing events; stamped into every event's metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceIdentity {
    /// Version of the service that appended the event.
    pub service_version: String,
    /// Name of the service (or host) that appended the event.
    pub source: String,
}

impl ServiceIdentity {
    pub fn new(service_version: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            service_version: service_version.into(),
            source: source.into(),
        }
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            source: "unknown".to_string(),
        }
    }
}

/// Store-assigned metadata of a persisted event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Global position of the event across all aggregates.
    pub sequence: Sequence,

    /// The aggregate version the event was computed against.
    pub originating_version: Version,

    /// When the event was appended.
    pub timestamp: DateTime<Utc>,

    /// Version of the service that appended the event.
    pub service_version: String,

    /// Name of the service that appended the event.
    pub source: String,
}

/// An event envelope: a type-tagged payload addressed to one aggregate.
///
/// Metadata is absent until the store appends the event and can be
/// assigned only once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique identifier for this event.
    pub event_id: EventId,

    /// Type discriminator of the payload (e.g., "ActionCompleted").
    pub event_type: String,

    /// The type of aggregate (e.g., "ServerGroup").
    pub aggregate_type: String,

    /// The aggregate this event belongs to.
    pub aggregate_id: String,

    /// The event payload as JSON.
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<EventMetadata>,
}

impl EventEnvelope {
    /// Creates a new event envelope builder.
    pub fn builder() -> EventEnvelopeBuilder {
        EventEnvelopeBuilder::default()
    }

    /// Wraps a typed payload, taking the discriminator from the payload itself.
    pub fn from_payload<P: EventPayload>(aggregate: &AggregateRef, payload: &P) -> Result<Self> {
        EventEnvelope::builder()
            .event_type(payload.event_type())
            .aggregate(aggregate)
            .payload(payload)?
            .build()
    }

    /// Returns the identity of the aggregate this event belongs to.
    pub fn aggregate_ref(&self) -> AggregateRef {
        AggregateRef::new(&self.aggregate_type, &self.aggregate_id)
    }

    /// Returns true if the event is addressed to `aggregate`.
    pub fn belongs_to(&self, aggregate: &AggregateRef) -> bool {
        self.aggregate_type == aggregate.aggregate_type && self.aggregate_id == aggregate.id
    }

    /// Returns true once the store has assigned metadata.
    pub fn is_initialized(&self) -> bool {
        self.metadata.is_some()
    }

    /// Returns the store-assigned metadata.
    ///
    /// Fails with `UninitializedEvent` if the event has not been appended yet.
    pub fn metadata(&self) -> Result<&EventMetadata> {
        self.metadata
            .as_ref()
            .ok_or(EventStoreError::UninitializedEvent(self.event_id))
    }

    /// Assigns metadata. Intended for event store implementations.
    pub fn assign_metadata(&mut self, metadata: EventMetadata) -> Result<()> {
        if self.metadata.is_some() {
            return Err(EventStoreError::MetadataAlreadyAssigned(self.event_id));
        }
        self.metadata = Some(metadata);
        Ok(())
    }
}

/// Builder for constructing event envelopes.
#[derive(Debug, Default)]
pub struct EventEnvelopeBuilder {
    event_id: Option<EventId>,
    event_type: Option<String>,
    aggregate_type: Option<String>,
    aggregate_id: Option<String>,
    payload: Option<serde_json::Value>,
}

impl EventEnvelopeBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the event type discriminator.
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the aggregate type and id.
    pub fn aggregate(mut self, aggregate: &AggregateRef) -> Self {
        self.aggregate_type = Some(aggregate.aggregate_type.clone());
        self.aggregate_id = Some(aggregate.id.clone());
        self
    }

    /// Sets the aggregate type.
    pub fn aggregate_type(mut self, aggregate_type: impl Into<String>) -> Self {
        self.aggregate_type = Some(aggregate_type.into());
        self
    }

    /// Sets the aggregate id.
    pub fn aggregate_id(mut self, aggregate_id: impl Into<String>) -> Self {
        self.aggregate_id = Some(aggregate_id.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Builds the event envelope.
    ///
    /// Fails with `InvalidEvent` if the type, aggregate or payload is missing,
    /// or if any identifying field is empty.
    pub fn build(self) -> Result<EventEnvelope> {
        let event_type = non_empty(self.event_type, "event_type")?;
        let aggregate_type = non_empty(self.aggregate_type, "aggregate_type")?;
        let aggregate_id = non_empty(self.aggregate_id, "aggregate_id")?;
        let payload = self
            .payload
            .ok_or_else(|| EventStoreError::InvalidEvent("payload is required".to_string()))?;

        Ok(EventEnvelope {
            event_id: self.event_id.unwrap_or_default(),
            event_type,
            aggregate_type,
            aggregate_id,
            payload,
            metadata: None,
        })
    }
}

fn non_empty(value: Option<String>, field: &str) -> Result<String> {
    match value {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(EventStoreError::InvalidEvent(format!("{field} is required"))),
    }
}
