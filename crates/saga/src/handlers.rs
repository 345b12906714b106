//! Completion and exception handlers attached to a flow.

use async_trait::async_trait;

use crate::aggregate::Saga;
use crate::error::{Result, SagaError};

/// Runs once after a saga has been recorded as completed.
///
/// Failures are logged and do not change the saga's status.
#[async_trait]
pub trait CompletionHandler: Send + Sync + 'static {
    async fn on_complete(&self, saga: &Saga) -> Result<()>;
}

/// What the runtime does with a failure after the exception handler saw it.
#[derive(Debug)]
pub enum ExceptionOutcome {
    /// Leave the saga running; the error is surfaced as retryable and the
    /// saga may be resumed later.
    Retry(SagaError),
    /// Record the saga as failed.
    Fail(SagaError),
}

impl ExceptionOutcome {
    pub fn error(&self) -> &SagaError {
        match self {
            ExceptionOutcome::Retry(e) | ExceptionOutcome::Fail(e) => e,
        }
    }
}

/// Translates step failures into retry-or-fail decisions.
///
/// Not consulted for concurrency conflicts or system errors.
pub trait ExceptionHandler: Send + Sync + 'static {
    fn handle(&self, saga: &Saga, error: SagaError) -> ExceptionOutcome;
}

impl<F> ExceptionHandler for F
where
    F: Fn(&Saga, SagaError) -> ExceptionOutcome + Send + Sync + 'static,
{
    fn handle(&self, saga: &Saga, error: SagaError) -> ExceptionOutcome {
        self(saga, error)
    }
}

/// Marks every failure retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAll;

impl ExceptionHandler for RetryAll {
    fn handle(&self, _saga: &Saga, error: SagaError) -> ExceptionOutcome {
        ExceptionOutcome::Retry(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateRef;

    fn saga() -> Saga {
        Saga::new(AggregateRef::new("ServerGroup", "app-v001"))
    }

    #[test]
    fn closures_are_exception_handlers() {
        let handler = |_: &Saga, error: SagaError| match error {
            SagaError::StepTimeout { .. } => ExceptionOutcome::Retry(error),
            other => ExceptionOutcome::Fail(other),
        };

        let outcome = handler.handle(&saga(), SagaError::action("boom"));
        assert!(matches!(outcome, ExceptionOutcome::Fail(SagaError::Action(_))));

        let outcome = handler.handle(
            &saga(),
            SagaError::StepTimeout {
                step: "Deploy".into(),
                timeout: std::time::Duration::from_secs(1),
            },
        );
        assert!(matches!(outcome, ExceptionOutcome::Retry(_)));
    }

    #[test]
    fn retry_all() {
        let outcome = RetryAll.handle(&saga(), SagaError::action("boom"));
        assert!(matches!(outcome, ExceptionOutcome::Retry(_)));
        assert_eq!(outcome.error().to_string(), "boom");
    }
}
