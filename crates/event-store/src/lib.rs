//! Append-only, versioned event log per aggregate.
//!
//! Every aggregate owns an ordered stream of events guarded by optimistic
//! concurrency control. The store assigns each appended event a globally
//! increasing sequence number and publishes it to subscribers only after
//! the append succeeded.

pub mod aggregate;
pub mod error;
pub mod event;
pub mod memory;
pub mod publisher;
pub mod query;
pub mod registry;
pub mod store;

pub use aggregate::Aggregate;
pub use common::AggregateRef;
pub use error::{EventStoreError, Result};
pub use event::{
    EventEnvelope, EventEnvelopeBuilder, EventId, EventMetadata, Sequence, ServiceIdentity,
    Version,
};
pub use memory::InMemoryEventStore;
pub use publisher::{BroadcastPublisher, EventPublisher};
pub use query::{ListAggregatesCriteria, ListAggregatesResult};
pub use registry::{EventPayload, EventRegistry};
pub use store::{EventStore, EventStoreExt, EventStream};
