//! Condition predicates that gate nested flows.

use std::any::TypeId;

use async_trait::async_trait;

use crate::aggregate::Saga;
use crate::error::Result;

/// A named boolean test over the saga state.
///
/// The first evaluation of a predicate name is recorded in the saga's event
/// log; every later occurrence of the same name in the same saga reuses the
/// recorded result, including after a resume.
#[async_trait]
pub trait ConditionPredicate: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn evaluate(&self, saga: &Saga) -> Result<bool>;
}

/// A predicate backed by a synchronous closure.
pub struct FnPredicate<F> {
    name: String,
    test: F,
}

/// Creates a predicate from a name and a closure over the saga state.
pub fn predicate<F>(name: impl Into<String>, test: F) -> FnPredicate<F>
where
    F: Fn(&Saga) -> bool + Send + Sync + 'static,
{
    FnPredicate {
        name: name.into(),
        test,
    }
}

#[async_trait]
impl<F> ConditionPredicate for FnPredicate<F>
where
    F: Fn(&Saga) -> bool + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, saga: &Saga) -> Result<bool> {
        Ok((self.test)(saga))
    }
}

/// Identifies the Rust type behind a predicate, used to detect two different
/// predicates sharing one name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PredicateType {
    pub(crate) type_name: &'static str,
    pub(crate) type_id: TypeId,
}

impl PredicateType {
    pub(crate) fn of<P: ConditionPredicate>() -> Self {
        Self {
            type_name: std::any::type_name::<P>(),
            type_id: TypeId::of::<P>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateRef;

    #[tokio::test]
    async fn closure_predicate_evaluates_saga() {
        let saga = Saga::new(AggregateRef::new("ServerGroup", "app-v001"));
        let needs_lb = predicate("needsLoadBalancer", |saga: &Saga| {
            saga.aggregate_ref().id.ends_with("v001")
        });

        assert_eq!(needs_lb.name(), "needsLoadBalancer");
        assert!(needs_lb.evaluate(&saga).await.unwrap());
    }

    #[test]
    fn predicate_types_differ_per_closure() {
        fn type_of<P: ConditionPredicate>(_: &P) -> PredicateType {
            PredicateType::of::<P>()
        }

        let a = predicate("p", |_: &Saga| true);
        let b = predicate("p", |_: &Saga| false);
        assert_ne!(type_of(&a), type_of(&b));
        assert_eq!(type_of(&a), type_of(&a));
    }
}
