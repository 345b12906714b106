//! Saga state rebuilt from the target aggregate's event log.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{AggregateRef, SagaId};
use event_store::{Aggregate, EventEnvelope, EventPayload, EventRegistry, Version};
use serde::{Deserialize, Serialize};

use crate::command::{CommandType, SagaCommand};
use crate::error::Result;
use crate::events::{RecordedCommand, SagaEvent};
use crate::flow::StepPath;
use crate::state::SagaStatus;

/// An action recorded in the saga's event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedStep {
    pub path: StepPath,
    pub action: String,
    /// Name of the command the action consumed.
    pub command_type: String,
}

/// An event-sourced saga.
///
/// Holds everything an action or predicate may read: the target aggregate,
/// the commands recorded so far, the commands still waiting for their action
/// and the cached condition results. The state is a pure fold over the
/// aggregate's saga events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    id: Option<SagaId>,
    aggregate: Aggregate,
    flow_name: String,
    status: SagaStatus,
    completed_steps: Vec<CompletedStep>,
    commands: Vec<RecordedCommand>,
    pending: Vec<RecordedCommand>,
    condition_cache: HashMap<String, bool>,
    started_at: Option<DateTime<Utc>>,
    failed_step: Option<StepPath>,
    /// Reason for failure or cancellation, if any.
    failure_reason: Option<String>,
}

impl Saga {
    /// Creates a pending saga for `aggregate` with no recorded events.
    pub fn new(aggregate: AggregateRef) -> Self {
        Self {
            id: None,
            aggregate: Aggregate::at_version(aggregate, Version::initial()),
            flow_name: String::new(),
            status: SagaStatus::Pending,
            completed_steps: Vec::new(),
            commands: Vec::new(),
            pending: Vec::new(),
            condition_cache: HashMap::new(),
            started_at: None,
            failed_step: None,
            failure_reason: None,
        }
    }

    /// Rebuilds a saga by folding the aggregate's stored events.
    ///
    /// The aggregate's log may hold other payload types as well; events whose
    /// type is not a saga event are skipped but still count toward the
    /// version, which is taken from the events' store metadata.
    pub fn replay(
        aggregate: AggregateRef,
        events: &[EventEnvelope],
        registry: &EventRegistry<SagaEvent>,
    ) -> Result<Self> {
        let mut saga = Self::new(aggregate.clone());
        for envelope in events {
            if !registry.contains(&envelope.event_type) {
                tracing::trace!(
                    %aggregate,
                    event_type = %envelope.event_type,
                    "skipping non-saga event"
                );
                continue;
            }
            saga.apply(registry.decode(envelope)?);
        }
        saga.set_version(Aggregate::from_events(aggregate, events)?.version());
        Ok(saga)
    }

    /// Applies one event to the in-memory state.
    ///
    /// A `SagaStarted` event begins a fresh saga; other events arriving after
    /// a terminal status are ignored.
    pub fn apply(&mut self, event: SagaEvent) {
        if self.status.is_terminal() && !matches!(event, SagaEvent::SagaStarted(_)) {
            tracing::debug!(
                aggregate = %self.aggregate.reference(),
                event_type = event.event_type(),
                "ignoring event after terminal status"
            );
            return;
        }

        match event {
            SagaEvent::SagaStarted(data) => {
                self.id = Some(data.saga_id);
                self.flow_name = data.flow_name;
                self.status = SagaStatus::Running;
                self.completed_steps.clear();
                self.commands = vec![data.command.clone()];
                self.pending = vec![data.command];
                self.condition_cache.clear();
                self.started_at = Some(data.started_at);
                self.failed_step = None;
                self.failure_reason = None;
            }
            SagaEvent::ActionCompleted(data) => {
                match self
                    .pending
                    .iter()
                    .position(|c| c.command_type == data.command_type)
                {
                    Some(index) => {
                        self.pending.remove(index);
                    }
                    None => tracing::debug!(
                        aggregate = %self.aggregate.reference(),
                        command_type = %data.command_type,
                        "completed action consumed no pending command"
                    ),
                }
                self.commands.extend(data.next_commands.iter().cloned());
                self.pending.extend(data.next_commands);
                self.completed_steps.push(CompletedStep {
                    path: data.path,
                    action: data.action,
                    command_type: data.command_type,
                });
            }
            SagaEvent::ConditionEvaluated(data) => {
                self.condition_cache.entry(data.name).or_insert(data.result);
            }
            SagaEvent::SagaCompleted(_) => {
                self.status = SagaStatus::Completed;
            }
            SagaEvent::SagaFailed(data) => {
                self.status = SagaStatus::Failed;
                self.failed_step = data.step;
                self.failure_reason = Some(data.reason);
            }
            SagaEvent::SagaCancelled(data) => {
                self.status = SagaStatus::Cancelled;
                self.failure_reason = Some(data.reason);
            }
        }
    }

    pub(crate) fn set_version(&mut self, version: Version) {
        self.aggregate.set_version(version);
    }
}

// Query methods
impl Saga {
    /// Returns the saga ID, if the saga has started.
    pub fn id(&self) -> Option<SagaId> {
        self.id
    }

    /// Returns the target aggregate.
    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn aggregate_ref(&self) -> &AggregateRef {
        self.aggregate.reference()
    }

    /// Returns the version of the target aggregate's log as last observed.
    pub fn version(&self) -> Version {
        self.aggregate.version()
    }

    /// Returns the name of the flow being executed.
    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    pub fn status(&self) -> SagaStatus {
        self.status
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Number of actions recorded so far.
    pub fn cursor(&self) -> usize {
        self.completed_steps.len()
    }

    /// Returns the recorded actions in execution order.
    pub fn completed_steps(&self) -> &[CompletedStep] {
        &self.completed_steps
    }

    /// Returns the cached result of a condition predicate, if evaluated.
    pub fn cached_condition(&self, name: &str) -> Option<bool> {
        self.condition_cache.get(name).copied()
    }

    pub fn condition_cache(&self) -> &HashMap<String, bool> {
        &self.condition_cache
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Returns the step that failed, if the saga failed inside a step.
    pub fn failed_step(&self) -> Option<&StepPath> {
        self.failed_step.as_ref()
    }

    /// Returns the failure or cancellation reason, if any.
    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// Every command recorded by this saga, starting with the one it was
    /// started with.
    pub fn recorded_commands(&self) -> &[RecordedCommand] {
        &self.commands
    }

    /// Commands recorded but not yet consumed by an action, oldest first.
    pub fn pending_commands(&self) -> &[RecordedCommand] {
        &self.pending
    }

    /// The oldest pending command named `command_type`.
    pub fn next_command(&self, command_type: &str) -> Option<&RecordedCommand> {
        self.pending.iter().find(|c| c.command_type == command_type)
    }

    /// Returns the most recent command of type `C` recorded by this saga.
    pub fn command<C: SagaCommand>(&self) -> Result<Option<C>> {
        let name = CommandType::resolve::<C>()?.name();
        self.commands
            .iter()
            .rev()
            .find(|command| command.command_type == name)
            .map(RecordedCommand::decode::<C>)
            .transpose()
    }

    /// Returns every command of type `C` in the order they were recorded.
    pub fn commands<C: SagaCommand>(&self) -> Result<Vec<C>> {
        let name = CommandType::resolve::<C>()?.name();
        self.commands
            .iter()
            .filter(|command| command.command_type == name)
            .map(RecordedCommand::decode::<C>)
            .collect()
    }
}
