use std::hash::{Hash, Hasher};

use common::AggregateRef;
use serde::{Deserialize, Serialize};

use crate::{EventEnvelope, Result, Version};

/// An aggregate as tracked by the event store.
///
/// Equality and hashing consider only the type and the id; `version` is
/// state, not identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aggregate {
    #[serde(flatten)]
    reference: AggregateRef,
    version: Version,
}

impl Aggregate {
    /// Creates a new aggregate at the initial version.
    pub fn new(aggregate_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::at_version(AggregateRef::new(aggregate_type, id), Version::initial())
    }

    /// Creates an aggregate at a known version.
    pub fn at_version(reference: AggregateRef, version: Version) -> Self {
        Self { reference, version }
    }

    pub fn aggregate_type(&self) -> &str {
        &self.reference.aggregate_type
    }

    pub fn id(&self) -> &str {
        &self.reference.id
    }

    pub fn reference(&self) -> &AggregateRef {
        &self.reference
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Derives the aggregate's version from its complete, loaded log.
    ///
    /// The version is read from store-assigned metadata rather than the
    /// event count: the last batch started at its originating version and
    /// advanced it once per event in that batch.
    pub fn from_events(reference: AggregateRef, events: &[EventEnvelope]) -> Result<Self> {
        let Some(last) = events.last() else {
            return Ok(Self::at_version(reference, Version::initial()));
        };

        let origin = last.metadata()?.originating_version;
        let mut batch = 0;
        for event in events.iter().rev() {
            if event.metadata()?.originating_version != origin {
                break;
            }
            batch += 1;
        }

        Ok(Self::at_version(reference, origin.advance(batch)))
    }

    /// Moves the version forward. Versions never go backwards.
    pub fn set_version(&mut self, version: Version) {
        debug_assert!(version >= self.version, "aggregate version went backwards");
        self.version = version;
    }
}

impl PartialEq for Aggregate {
    fn eq(&self, other: &Self) -> bool {
        self.reference == other.reference
    }
}

impl Eq for Aggregate {}

impl Hash for Aggregate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.reference.hash(state);
    }
}

impl std::fmt::Display for Aggregate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.reference, self.version)
    }
}
