//! Event-sourced saga orchestration.
//!
//! A saga is a multi-step operation against one aggregate, expressed as a
//! [`SagaFlow`] of actions and predicate-gated nested flows. Each action
//! accepts one command type; a saga starts with one command and every action
//! may emit commands for the actions after it. The
//! [`SagaRuntime`] records every step in the aggregate's event log, so a
//! saga interrupted at any point can be resumed from the log without
//! repeating recorded actions.
//!
//! ```text
//! let flow = SagaFlow::new("deploy")
//!     .then(CreateServerGroup)
//!     .on(predicate("needsLoadBalancer", needs_lb), |flow| flow.then(AttachLoadBalancer))
//!     .then(EnableTraffic)
//!     .compile()?;
//!
//! let aggregate = AggregateRef::new("ServerGroup", "app-v001");
//! let saga = runtime.start(flow, aggregate, CreateServerGroupCommand { .. }).await?;
//! ```

pub mod action;
pub mod aggregate;
pub mod command;
pub mod condition;
pub mod config;
pub mod error;
pub mod events;
pub mod flow;
pub mod handlers;
pub mod runtime;
pub mod state;
pub mod telemetry;

pub use action::{ActionKey, ActionResult, SagaAction};
pub use aggregate::{CompletedStep, Saga};
pub use command::{CommandType, SagaCommand, resolve_command_type};
pub use condition::{ConditionPredicate, FnPredicate, predicate};
pub use config::SagaConfig;
pub use error::{Result, SagaError};
pub use events::{RecordedCommand, SagaEvent};
pub use flow::{ActionStep, CompiledFlow, ConditionStep, InjectLocation, SagaFlow, Step, StepPath};
pub use handlers::{CompletionHandler, ExceptionHandler, ExceptionOutcome, RetryAll};
pub use runtime::SagaRuntime;
pub use state::SagaStatus;
pub use telemetry::{NoopTelemetry, SagaTelemetry, TracingTelemetry};
