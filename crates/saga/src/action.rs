//! Saga actions: the units of work a flow executes.

use std::any::TypeId;

use async_trait::async_trait;

use crate::aggregate::Saga;
use crate::command::{CommandType, SagaCommand, resolve_command_type, short_type_name};
use crate::error::{Result, SagaError};
use crate::events::RecordedCommand;

/// A single step of work in a saga flow.
///
/// An action accepts exactly one command type. When its step comes up the
/// runtime takes the oldest pending command of that type from the saga, hands
/// it to [`apply`](SagaAction::apply), and records the consumed command
/// together with the commands the action emits in a single event. An action
/// that has been recorded is never invoked again for the same saga.
///
/// Actions may be invoked more than once if the process dies between the
/// side effect and the append; external side effects should be idempotent.
#[async_trait]
pub trait SagaAction: Send + Sync + 'static {
    /// The command type this action accepts.
    type Command: SagaCommand;

    /// Name recorded in the event log. Defaults to the unqualified type name.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }

    /// Command types this action may emit.
    ///
    /// Compiling a flow fails if a declared command is not accepted by some
    /// action of the flow. Emitting an undeclared command that no action
    /// accepts fails the saga at run time.
    fn emits() -> Result<Vec<CommandType>> {
        Ok(Vec::new())
    }

    async fn apply(&self, command: Self::Command, saga: &Saga) -> Result<ActionResult>;
}

/// Object-safe view of a command emitted by an action.
trait EmittedCommand: Send + Sync {
    fn record(&self) -> Result<RecordedCommand>;
}

impl<C: SagaCommand> EmittedCommand for C {
    fn record(&self) -> Result<RecordedCommand> {
        RecordedCommand::new(self)
    }
}

/// What an action hands back to the runtime: the commands for later steps.
#[derive(Default)]
pub struct ActionResult {
    commands: Vec<Box<dyn EmittedCommand>>,
}

impl ActionResult {
    /// A result that emits nothing.
    pub fn done() -> Self {
        Self::default()
    }

    /// A result emitting one command.
    pub fn next<C: SagaCommand>(command: C) -> Self {
        Self::done().with(command)
    }

    /// Adds another command to emit.
    pub fn with<C: SagaCommand>(mut self, command: C) -> Self {
        self.commands.push(Box::new(command));
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub(crate) fn into_recorded(self) -> Result<Vec<RecordedCommand>> {
        self.commands.iter().map(|command| command.record()).collect()
    }
}

impl std::fmt::Debug for ActionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionResult")
            .field("commands", &self.commands.len())
            .finish()
    }
}

/// Identifies an action type within a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActionKey {
    name: &'static str,
    type_id: TypeId,
}

impl ActionKey {
    /// Returns the key of action type `A`.
    pub fn of<A: SagaAction>() -> Self {
        Self {
            name: A::name(),
            type_id: TypeId::of::<A>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl std::fmt::Display for ActionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Object-safe view of a [`SagaAction`] over recorded commands.
#[async_trait]
pub(crate) trait ErasedAction: Send + Sync {
    fn key(&self) -> ActionKey;

    fn resolve_command_type(&self) -> Result<CommandType>;

    fn emits(&self) -> Result<Vec<CommandType>>;

    async fn apply(&self, command: &RecordedCommand, saga: &Saga) -> Result<ActionResult>;
}

pub(crate) struct ActionAdapter<A>(pub(crate) A);

#[async_trait]
impl<A: SagaAction> ErasedAction for ActionAdapter<A> {
    fn key(&self) -> ActionKey {
        ActionKey::of::<A>()
    }

    fn resolve_command_type(&self) -> Result<CommandType> {
        resolve_command_type::<A>()
    }

    fn emits(&self) -> Result<Vec<CommandType>> {
        A::emits()
    }

    async fn apply(&self, command: &RecordedCommand, saga: &Saga) -> Result<ActionResult> {
        let command = command.decode::<A::Command>().map_err(|e| {
            SagaError::System(format!(
                "action {} cannot decode {}: {}",
                A::name(),
                command.command_type,
                e
            ))
        })?;
        self.0.apply(command, saga).await
    }
}
