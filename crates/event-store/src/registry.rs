//! Polymorphic payload decoding keyed by the event type discriminator.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Serialize, de::DeserializeOwned};

use crate::{EventEnvelope, EventStoreError, Result};

/// A payload type that shares a physical log with other payload types.
///
/// Implementors are usually serde internally-tagged enums; `EVENT_TYPES`
/// lists every discriminator the enum can produce.
pub trait EventPayload: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Every type discriminator this payload can carry.
    const EVENT_TYPES: &'static [&'static str];

    /// Returns the discriminator of this value.
    fn event_type(&self) -> &'static str;
}

type Decoder<T> = Arc<dyn Fn(&serde_json::Value) -> Result<T> + Send + Sync>;

/// Registry of decoders keyed by event type.
///
/// Registration happens at startup; decoding an event whose type has no
/// decoder fails with `UnknownEventType`.
pub struct EventRegistry<T> {
    decoders: HashMap<String, Decoder<T>>,
}

impl<T: 'static> EventRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Registers a decoder for one event type.
    pub fn register<F>(&mut self, event_type: impl Into<String>, decoder: F) -> Result<()>
    where
        F: Fn(&serde_json::Value) -> Result<T> + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        if self.decoders.contains_key(&event_type) {
            return Err(EventStoreError::DuplicateEventType(event_type));
        }
        self.decoders.insert(event_type, Arc::new(decoder));
        Ok(())
    }

    /// Returns true if a decoder exists for `event_type`.
    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Returns the number of registered event types.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }

    /// Checks that every listed event type can be decoded.
    pub fn validate(&self, event_types: &[&str]) -> Result<()> {
        match event_types.iter().find(|t| !self.contains(t)) {
            Some(missing) => Err(EventStoreError::UnknownEventType((*missing).to_string())),
            None => Ok(()),
        }
    }

    /// Decodes an envelope's payload using the decoder for its event type.
    pub fn decode(&self, envelope: &EventEnvelope) -> Result<T> {
        let decoder = self
            .decoders
            .get(&envelope.event_type)
            .ok_or_else(|| EventStoreError::UnknownEventType(envelope.event_type.clone()))?;
        decoder(&envelope.payload)
    }
}

impl<P: EventPayload> EventRegistry<P> {
    /// Builds a registry covering every event type of `P`.
    pub fn for_payload() -> Result<Self> {
        let mut registry = Self::new();
        for event_type in P::EVENT_TYPES {
            let expected = *event_type;
            registry.register(expected, move |value| {
                let payload: P = serde_json::from_value(value.clone())?;
                if payload.event_type() != expected {
                    return Err(EventStoreError::InvalidEvent(format!(
                        "payload tagged {} stored as {}",
                        payload.event_type(),
                        expected
                    )));
                }
                Ok(payload)
            })?;
        }
        Ok(registry)
    }
}

impl<T: 'static> Default for EventRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for EventRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("EventRegistry")
            .field("event_types", &types)
            .finish()
    }
}
