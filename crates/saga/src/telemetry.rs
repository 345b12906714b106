//! Saga lifecycle hooks for logging and metrics.

use std::time::Duration;

use event_store::EventStoreError;

use crate::aggregate::Saga;
use crate::error::SagaError;
use crate::flow::StepPath;

/// Observes saga execution. Every hook defaults to a no-op.
pub trait SagaTelemetry: Send + Sync {
    fn saga_started(&self, _saga: &Saga) {}

    fn saga_resumed(&self, _saga: &Saga) {}

    fn saga_completed(&self, _saga: &Saga, _duration: Duration) {}

    fn saga_failed(&self, _saga: &Saga, _error: &SagaError) {}

    fn saga_cancelled(&self, _saga: &Saga) {}

    fn step_started(&self, _saga: &Saga, _path: &StepPath, _step: &str) {}

    fn step_completed(&self, _saga: &Saga, _path: &StepPath, _step: &str, _duration: Duration) {}

    fn condition_cache_hit(&self, _saga: &Saga, _name: &str, _result: bool) {}

    fn append_conflict(&self, _saga: &Saga, _error: &EventStoreError) {}
}

/// Discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl SagaTelemetry for NoopTelemetry {}

/// Emits `tracing` events and `metrics` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

fn saga_id(saga: &Saga) -> String {
    saga.id().map(|id| id.to_string()).unwrap_or_default()
}

impl SagaTelemetry for TracingTelemetry {
    fn saga_started(&self, saga: &Saga) {
        metrics::counter!("saga_started_total", "flow" => saga.flow_name().to_string())
            .increment(1);
        tracing::info!(
            saga_id = %saga_id(saga),
            flow = saga.flow_name(),
            aggregate = %saga.aggregate_ref(),
            "saga started"
        );
    }

    fn saga_resumed(&self, saga: &Saga) {
        metrics::counter!("saga_resumed_total", "flow" => saga.flow_name().to_string())
            .increment(1);
        tracing::info!(
            saga_id = %saga_id(saga),
            flow = saga.flow_name(),
            cursor = saga.cursor(),
            "saga resumed"
        );
    }

    fn saga_completed(&self, saga: &Saga, duration: Duration) {
        metrics::counter!("saga_completed_total", "flow" => saga.flow_name().to_string())
            .increment(1);
        metrics::histogram!("saga_duration_seconds").record(duration.as_secs_f64());
        tracing::info!(
            saga_id = %saga_id(saga),
            flow = saga.flow_name(),
            duration_ms = duration.as_millis() as u64,
            "saga completed"
        );
    }

    fn saga_failed(&self, saga: &Saga, error: &SagaError) {
        metrics::counter!("saga_failed_total", "flow" => saga.flow_name().to_string())
            .increment(1);
        tracing::warn!(
            saga_id = %saga_id(saga),
            flow = saga.flow_name(),
            error = %error,
            "saga failed"
        );
    }

    fn saga_cancelled(&self, saga: &Saga) {
        metrics::counter!("saga_cancelled_total", "flow" => saga.flow_name().to_string())
            .increment(1);
        tracing::info!(
            saga_id = %saga_id(saga),
            reason = saga.failure_reason().unwrap_or_default(),
            "saga cancelled"
        );
    }

    fn step_started(&self, saga: &Saga, path: &StepPath, step: &str) {
        tracing::info!(saga_id = %saga_id(saga), %path, step, "saga step started");
    }

    fn step_completed(&self, saga: &Saga, path: &StepPath, step: &str, duration: Duration) {
        metrics::counter!("saga_steps_completed_total", "step" => step.to_string()).increment(1);
        metrics::histogram!("saga_step_duration_seconds").record(duration.as_secs_f64());
        tracing::info!(
            saga_id = %saga_id(saga),
            %path,
            step,
            duration_ms = duration.as_millis() as u64,
            "saga step completed"
        );
    }

    fn condition_cache_hit(&self, saga: &Saga, name: &str, result: bool) {
        metrics::counter!("saga_condition_cache_hits_total").increment(1);
        tracing::debug!(saga_id = %saga_id(saga), condition = name, result, "condition cache hit");
    }

    fn append_conflict(&self, saga: &Saga, error: &EventStoreError) {
        metrics::counter!("saga_append_conflicts_total").increment(1);
        tracing::warn!(
            saga_id = %saga_id(saga),
            aggregate = %saga.aggregate_ref(),
            error = %error,
            "saga append conflict"
        );
    }
}
