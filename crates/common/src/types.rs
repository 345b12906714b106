use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of an aggregate: its type plus its id within that type.
///
/// Two references are equal (and hash equally) exactly when both the type and
/// the id match. Versions are tracked elsewhere, so a reference stays a valid
/// map key for the lifetime of the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateRef {
    /// The kind of entity (e.g., "ServerGroup", "LoadBalancer").
    pub aggregate_type: String,
    /// The entity id, unique within `aggregate_type`.
    pub id: String,
}

impl AggregateRef {
    /// Creates a new aggregate reference.
    pub fn new(aggregate_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            id: id.into(),
        }
    }

    /// Returns true if both the type and the id are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.aggregate_type.is_empty() && !self.id.is_empty()
    }
}

impl std::fmt::Display for AggregateRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.id)
    }
}

/// Unique identifier for a saga execution.
///
/// Wraps a UUID to provide type safety and prevent mixing up
/// saga IDs with other UUID-based identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaId(Uuid);

impl SagaId {
    /// Creates a new random saga ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a saga ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for SagaId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SagaId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for SagaId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn saga_id_new_creates_unique_ids() {
        let id1 = SagaId::new();
        let id2 = SagaId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn saga_id_from_uuid_preserves_value() {
        let uuid = Uuid::new_v4();
        let id = SagaId::from_uuid(uuid);
        assert_eq!(id.as_uuid(), uuid);
    }

    #[test]
    fn aggregate_ref_identity_is_type_and_id() {
        let a = AggregateRef::new("ServerGroup", "app-v001");
        let b = AggregateRef::new("ServerGroup", "app-v001");
        let c = AggregateRef::new("LoadBalancer", "app-v001");

        let mut set = HashSet::new();
        set.insert(a.clone());
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        assert_eq!(a.to_string(), "ServerGroup/app-v001");
    }

    #[test]
    fn aggregate_ref_validity() {
        assert!(AggregateRef::new("ServerGroup", "x").is_valid());
        assert!(!AggregateRef::new("", "x").is_valid());
        assert!(!AggregateRef::new("ServerGroup", "").is_valid());
    }

    #[test]
    fn aggregate_ref_serialization_roundtrip() {
        let r = AggregateRef::new("ServerGroup", "app-v001");
        let json = serde_json::to_string(&r).unwrap();
        let deserialized: AggregateRef = serde_json::from_str(&json).unwrap();
        assert_eq!(r, deserialized);
    }
}
