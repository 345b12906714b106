//! Saga execution runtime.
//!
//! The runtime walks a [`CompiledFlow`] depth-first, recording every action
//! result and every first condition evaluation in the target aggregate's
//! event log before moving on. Nothing is kept in memory between calls: a
//! saga's state is rebuilt from the log on every `resume` or `cancel`, so a
//! runtime in another process can pick up where a crashed one stopped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use common::{AggregateRef, SagaId};
use event_store::{EventEnvelope, EventRegistry, EventStore, EventStoreExt, ListAggregatesCriteria};
use tokio::sync::RwLock;
use tokio::time::timeout;

use crate::aggregate::Saga;
use crate::command::SagaCommand;
use crate::config::SagaConfig;
use crate::error::{Result, SagaError};
use crate::events::{RecordedCommand, SagaEvent};
use crate::flow::{ActionStep, CompiledFlow, ConditionStep, Step, StepPath};
use crate::handlers::ExceptionOutcome;
use crate::state::SagaStatus;
use crate::telemetry::{SagaTelemetry, TracingTelemetry};

/// A failure raised while walking the flow, with the step it happened at.
struct StepFailure {
    path: Option<StepPath>,
    error: SagaError,
}

impl StepFailure {
    fn at(path: StepPath, error: SagaError) -> Self {
        Self {
            path: Some(path),
            error,
        }
    }
}

struct Frame<'a> {
    steps: &'a [Step],
    next: usize,
}

/// Executes saga flows against an event store.
pub struct SagaRuntime<S: EventStore> {
    store: S,
    config: SagaConfig,
    registry: EventRegistry<SagaEvent>,
    flows: RwLock<HashMap<String, Arc<CompiledFlow>>>,
    telemetry: Arc<dyn SagaTelemetry>,
}

impl<S: EventStore> SagaRuntime<S> {
    /// Creates a runtime that reports through [`TracingTelemetry`].
    pub fn new(store: S, config: SagaConfig) -> Result<Self> {
        Ok(Self {
            store,
            config,
            registry: EventRegistry::for_payload()?,
            flows: RwLock::new(HashMap::new()),
            telemetry: Arc::new(TracingTelemetry),
        })
    }

    /// Replaces the telemetry sink.
    pub fn with_telemetry(mut self, telemetry: impl SagaTelemetry + 'static) -> Self {
        self.telemetry = Arc::new(telemetry);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &SagaConfig {
        &self.config
    }

    /// Makes a flow available to `resume` under its name.
    pub async fn register(&self, flow: Arc<CompiledFlow>) {
        let mut flows = self.flows.write().await;
        if let Some(previous) = flows.insert(flow.name().to_string(), Arc::clone(&flow))
            && !Arc::ptr_eq(&previous, &flow)
        {
            tracing::warn!(flow = flow.name(), "replaced registered flow");
        }
    }

    /// Returns the registered flow named `name`.
    pub async fn flow(&self, name: &str) -> Option<Arc<CompiledFlow>> {
        self.flows.read().await.get(name).cloned()
    }

    /// Starts a new saga running `flow` against `aggregate` with `command` as
    /// its first pending command, and drives it until it completes, fails, or
    /// stops on a retryable error.
    ///
    /// Fails with [`SagaError::AlreadyStarted`] if a saga is still running
    /// against the aggregate, and with a system error if no action of the
    /// flow accepts `command`.
    #[tracing::instrument(
        skip(self, flow, aggregate, command),
        fields(flow = %flow.name(), aggregate = %aggregate, command = C::command_name())
    )]
    pub async fn start<C: SagaCommand>(
        &self,
        flow: Arc<CompiledFlow>,
        aggregate: AggregateRef,
        command: C,
    ) -> Result<Saga> {
        let command = RecordedCommand::new(&command)?;
        if flow.action_for_command(&command.command_type).is_none() {
            return Err(SagaError::System(format!(
                "no action in flow {} accepts {}",
                flow.name(),
                command.command_type
            )));
        }

        self.register(Arc::clone(&flow)).await;

        let mut saga = self.replay(&aggregate).await?;
        if !saga.status().can_start() {
            return Err(SagaError::AlreadyStarted(aggregate));
        }

        self.append(
            &mut saga,
            SagaEvent::saga_started(SagaId::new(), flow.name(), command),
        )
        .await?;
        self.telemetry.saga_started(&saga);

        self.drive(&flow, saga).await
    }

    /// Continues a running saga from the last recorded step.
    ///
    /// Terminal sagas are returned unchanged.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate = %aggregate))]
    pub async fn resume(&self, aggregate: &AggregateRef) -> Result<Saga> {
        let saga = self.replay(aggregate).await?;
        match saga.status() {
            SagaStatus::Pending => Err(SagaError::SagaNotFound(aggregate.clone())),
            status if status.is_terminal() => {
                tracing::debug!(%status, "saga already finished");
                Ok(saga)
            }
            _ => {
                let flow = self
                    .flow(saga.flow_name())
                    .await
                    .ok_or_else(|| SagaError::FlowNotRegistered(saga.flow_name().to_string()))?;
                self.telemetry.saga_resumed(&saga);
                self.drive(&flow, saga).await
            }
        }
    }

    /// Cancels a running saga.
    ///
    /// A run in flight elsewhere hits a concurrency conflict on its next
    /// append; resuming it afterwards returns the cancelled saga.
    #[tracing::instrument(skip(self, aggregate), fields(aggregate = %aggregate))]
    pub async fn cancel(&self, aggregate: &AggregateRef, reason: &str) -> Result<Saga> {
        let mut saga = self.replay(aggregate).await?;
        match saga.status() {
            SagaStatus::Pending => Err(SagaError::SagaNotFound(aggregate.clone())),
            status if status.is_terminal() => Err(SagaError::InvalidState {
                expected: SagaStatus::Running.to_string(),
                actual: status,
            }),
            _ => {
                self.append(&mut saga, SagaEvent::saga_cancelled(reason))
                    .await?;
                self.telemetry.saga_cancelled(&saga);
                Ok(saga)
            }
        }
    }

    /// Loads the saga recorded against `aggregate`, if any.
    pub async fn load_saga(&self, aggregate: &AggregateRef) -> Result<Option<Saga>> {
        let saga = self.replay(aggregate).await?;
        Ok((saga.status() != SagaStatus::Pending).then_some(saga))
    }

    /// Resumes every running saga on aggregates of `aggregate_type`.
    ///
    /// Returns one outcome per resumed aggregate; a failure on one aggregate
    /// does not stop the others.
    #[tracing::instrument(skip(self))]
    pub async fn resume_pending(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<(AggregateRef, Result<Saga>)>> {
        let mut outcomes = Vec::new();
        let mut criteria = ListAggregatesCriteria::for_type(aggregate_type);

        loop {
            let page = self.store.list_aggregates(criteria.clone()).await?;
            for aggregate in page.aggregates {
                let reference = aggregate.reference().clone();
                match self.load_saga(&reference).await {
                    Ok(Some(saga)) if saga.status().is_active() => {
                        let outcome = self.resume(&reference).await;
                        outcomes.push((reference, outcome));
                    }
                    Ok(_) => {}
                    Err(e) => outcomes.push((reference, Err(e))),
                }
            }

            match page.next_token {
                Some(token) => criteria = criteria.token(token),
                None => break,
            }
        }

        tracing::info!(aggregate_type, resumed = outcomes.len(), "resumed pending sagas");
        Ok(outcomes)
    }

    async fn replay(&self, aggregate: &AggregateRef) -> Result<Saga> {
        let events = self.store.load_ref(aggregate).await?;
        Saga::replay(aggregate.clone(), &events, &self.registry)
    }

    async fn drive(&self, flow: &CompiledFlow, mut saga: Saga) -> Result<Saga> {
        let started = Instant::now();

        if let Err(failure) = self.walk(flow, &mut saga).await {
            return Err(self.fail(flow, &mut saga, failure).await);
        }

        self.append(&mut saga, SagaEvent::saga_completed()).await?;
        self.telemetry.saga_completed(&saga, started.elapsed());

        if let Some(handler) = flow.completion_handler() {
            match timeout(self.config.step_timeout, handler.on_complete(&saga)).await {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::warn!(flow = flow.name(), error = %error, "completion handler failed");
                }
                Err(_) => {
                    tracing::warn!(flow = flow.name(), "completion handler timed out");
                }
            }
        }

        Ok(saga)
    }

    /// Runs every step not yet recorded, verifying recorded ones against the
    /// flow.
    async fn walk(&self, flow: &CompiledFlow, saga: &mut Saga) -> std::result::Result<(), StepFailure> {
        let mut frames = vec![Frame {
            steps: flow.steps(),
            next: 0,
        }];
        let mut position = 0;

        while let Some(frame) = frames.last_mut() {
            let steps = frame.steps;
            let Some(step) = steps.get(frame.next) else {
                frames.pop();
                continue;
            };
            frame.next += 1;
            let path = StepPath::new(frames.iter().map(|f| f.next - 1).collect());

            match step {
                Step::Action(action) => {
                    if position < saga.cursor() {
                        verify_recorded(saga, position, &path, action)?;
                    } else {
                        self.run_action(flow, saga, action, &path)
                            .await
                            .map_err(|error| StepFailure::at(path.clone(), error))?;
                    }
                    position += 1;
                }
                Step::Condition(condition) => {
                    let holds = self
                        .evaluate_condition(saga, condition, &path)
                        .await
                        .map_err(|error| StepFailure::at(path.clone(), error))?;
                    if holds {
                        frames.push(Frame {
                            steps: condition.flow().steps(),
                            next: 0,
                        });
                    }
                }
            }
        }

        if position < saga.cursor() {
            return Err(StepFailure {
                path: None,
                error: SagaError::System(format!(
                    "event log records {} actions but flow {} reaches only {}",
                    saga.cursor(),
                    flow.name(),
                    position
                )),
            });
        }
        Ok(())
    }

    async fn run_action(
        &self,
        flow: &CompiledFlow,
        saga: &mut Saga,
        step: &ActionStep,
        path: &StepPath,
    ) -> Result<()> {
        let name = step.name();
        let command_type = flow.command_type(&step.key()).ok_or_else(|| {
            SagaError::System(format!("action {name} has no resolved command type"))
        })?;
        let command = saga
            .next_command(command_type.name())
            .cloned()
            .ok_or_else(|| SagaError::MissingCommand {
                step: name.to_string(),
                command_type: command_type.name().to_string(),
            })?;

        self.telemetry.step_started(saga, path, name);
        let started = Instant::now();

        let result = match timeout(self.config.step_timeout, step.action().apply(&command, saga))
            .await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) if error.is_system() => return Err(error),
            Ok(Err(error)) => {
                return Err(SagaError::StepFailed {
                    step: name.to_string(),
                    source: Box::new(error),
                });
            }
            Err(_) => {
                return Err(SagaError::StepTimeout {
                    step: name.to_string(),
                    timeout: self.config.step_timeout,
                });
            }
        };

        let next_commands = result.into_recorded()?;
        if let Some(unrouted) = next_commands
            .iter()
            .find(|c| flow.action_for_command(&c.command_type).is_none())
        {
            return Err(SagaError::System(format!(
                "action {name} emitted {} but no action in flow {} accepts it",
                unrouted.command_type,
                flow.name()
            )));
        }

        let event =
            SagaEvent::action_completed(path.clone(), name, command_type.name(), next_commands);
        self.append(saga, event).await?;
        self.telemetry
            .step_completed(saga, path, name, started.elapsed());
        Ok(())
    }

    async fn evaluate_condition(
        &self,
        saga: &mut Saga,
        step: &ConditionStep,
        path: &StepPath,
    ) -> Result<bool> {
        let name = step.name();
        if let Some(result) = saga.cached_condition(name) {
            self.telemetry.condition_cache_hit(saga, name, result);
            return Ok(result);
        }

        let result = match timeout(self.config.step_timeout, step.predicate().evaluate(saga)).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(error)) => {
                return Err(SagaError::StepFailed {
                    step: format!("on({name})"),
                    source: Box::new(error),
                });
            }
            Err(_) => {
                return Err(SagaError::StepTimeout {
                    step: format!("on({name})"),
                    timeout: self.config.step_timeout,
                });
            }
        };

        tracing::debug!(%path, condition = name, result, "condition evaluated");
        self.append(saga, SagaEvent::condition_evaluated(path.clone(), name, result))
            .await?;
        Ok(result)
    }

    /// Settles a failed walk. Returns the error to surface to the caller.
    async fn fail(&self, flow: &CompiledFlow, saga: &mut Saga, failure: StepFailure) -> SagaError {
        let StepFailure { path, error } = failure;
        let step = path.as_ref().map(ToString::to_string).unwrap_or_default();

        // The log moved on or is unreachable; leave the saga as recorded.
        if let SagaError::EventStore(store_error) = &error {
            tracing::warn!(
                aggregate = %saga.aggregate_ref(),
                step = %step,
                error = %store_error,
                "saga step could not be recorded"
            );
            return error;
        }

        let handler = flow.exception_handler().filter(|_| !error.is_system());
        let error = match handler {
            Some(handler) => match handler.handle(saga, error) {
                ExceptionOutcome::Retry(error) => {
                    tracing::info!(
                        aggregate = %saga.aggregate_ref(),
                        step = %step,
                        error = %error,
                        "saga step failed; left running for retry"
                    );
                    return error.into_retryable();
                }
                ExceptionOutcome::Fail(error) => error,
            },
            None => error,
        };

        let event = SagaEvent::saga_failed(path, error.to_string());
        if let Err(append_error) = self.append(saga, event).await {
            tracing::error!(
                aggregate = %saga.aggregate_ref(),
                step = %step,
                error = %error,
                append_error = %append_error,
                "could not record saga failure"
            );
        }
        self.telemetry.saga_failed(saga, &error);
        error
    }

    /// Appends one saga event at the saga's current version and applies it.
    async fn append(&self, saga: &mut Saga, event: SagaEvent) -> Result<()> {
        let envelope = EventEnvelope::from_payload(saga.aggregate_ref(), &event)?;
        let result = self
            .store
            .append(saga.aggregate_ref(), saga.version(), vec![envelope])
            .await;

        match result {
            Ok(version) => {
                saga.apply(event);
                saga.set_version(version);
                Ok(())
            }
            Err(error) => {
                if error.is_retryable() {
                    self.telemetry.append_conflict(saga, &error);
                }
                Err(error.into())
            }
        }
    }
}

fn verify_recorded(
    saga: &Saga,
    position: usize,
    path: &StepPath,
    step: &ActionStep,
) -> std::result::Result<(), StepFailure> {
    match saga.completed_steps().get(position) {
        Some(recorded) if recorded.path == *path && recorded.action == step.name() => Ok(()),
        recorded => {
            let recorded = recorded
                .map(|r| format!("{} at {}", r.action, r.path))
                .unwrap_or_else(|| "nothing".to_string());
            Err(StepFailure::at(
                path.clone(),
                SagaError::System(format!(
                    "event log diverges from flow {}: recorded {}, flow runs {} at {}",
                    saga.flow_name(),
                    recorded,
                    step.name(),
                    path
                )),
            ))
        }
    }
}
