//! Shared identity types for the saga orchestration workspace.

pub mod types;

pub use types::{AggregateRef, SagaId};
