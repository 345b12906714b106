//! Saga flow definitions.
//!
//! A [`SagaFlow`] is an ordered tree of steps built with a fluent API:
//!
//! ```text
//! SagaFlow::new("deploy")
//!     .then(CreateServerGroup)
//!     .on(needs_load_balancer, |flow| flow.then(AttachLoadBalancer))
//!     .then(EnableTraffic)
//!     .compile()?
//! ```
//!
//! Steps run depth-first in declaration order. Compiling a flow resolves the
//! command type every action accepts and checks that each command an action
//! declares it emits is accepted by some action of the flow, so a flow that
//! compiles can be executed without further lookups.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::action::{ActionAdapter, ActionKey, ErasedAction, SagaAction};
use crate::command::CommandType;
use crate::condition::{ConditionPredicate, PredicateType};
use crate::error::{Result, SagaError};
use crate::handlers::{CompletionHandler, ExceptionHandler};

/// Where `inject` places the new step relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectLocation {
    Before,
    After,
}

/// Position of a step in a flow tree: one index per nesting level.
///
/// `0.2.1` is the second step of the nested flow of the third step of the
/// nested flow of the first root step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepPath(Vec<usize>);

impl StepPath {
    pub fn new(indices: Vec<usize>) -> Self {
        Self(indices)
    }

    pub fn indices(&self) -> &[usize] {
        &self.0
    }

    /// Nesting depth; root steps have depth 1.
    pub fn depth(&self) -> usize {
        self.0.len()
    }
}

impl std::fmt::Display for StepPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, index) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{index}")?;
        }
        Ok(())
    }
}

/// An action step.
#[derive(Clone)]
pub struct ActionStep {
    action: Arc<dyn ErasedAction>,
}

impl ActionStep {
    fn new<A: SagaAction>(action: A) -> Self {
        Self {
            action: Arc::new(ActionAdapter(action)),
        }
    }

    pub fn key(&self) -> ActionKey {
        self.action.key()
    }

    pub fn name(&self) -> &'static str {
        self.action.key().name()
    }

    pub(crate) fn action(&self) -> &dyn ErasedAction {
        self.action.as_ref()
    }
}

impl std::fmt::Debug for ActionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionStep")
            .field("action", &self.name())
            .finish()
    }
}

/// A predicate-gated nested flow.
#[derive(Clone)]
pub struct ConditionStep {
    predicate: Arc<dyn ConditionPredicate>,
    predicate_type: PredicateType,
    flow: SagaFlow,
}

impl ConditionStep {
    fn new<P: ConditionPredicate>(predicate: P, flow: SagaFlow) -> Self {
        Self {
            predicate: Arc::new(predicate),
            predicate_type: PredicateType::of::<P>(),
            flow,
        }
    }

    pub fn name(&self) -> &str {
        self.predicate.name()
    }

    pub fn predicate(&self) -> &dyn ConditionPredicate {
        self.predicate.as_ref()
    }

    /// The steps run when the predicate holds.
    pub fn flow(&self) -> &SagaFlow {
        &self.flow
    }
}

impl std::fmt::Debug for ConditionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionStep")
            .field("predicate", &self.name())
            .field("flow", &self.flow)
            .finish()
    }
}

/// One node of a flow tree.
#[derive(Debug, Clone)]
pub enum Step {
    Action(ActionStep),
    Condition(ConditionStep),
}

/// A saga flow under construction.
#[derive(Clone, Default)]
pub struct SagaFlow {
    name: String,
    steps: Vec<Step>,
    completion_handler: Option<Arc<dyn CompletionHandler>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
}

impl SagaFlow {
    /// Creates an empty flow. The name identifies the flow when a saga is
    /// resumed.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Appends an action step.
    pub fn then<A: SagaAction>(mut self, action: A) -> Self {
        self.steps.push(Step::Action(ActionStep::new(action)));
        self
    }

    /// Inserts an action immediately before or after the first step running
    /// `target`, searching nested flows depth-first.
    ///
    /// Fails with [`SagaError::ActionNotFound`] if no step runs `target`.
    pub fn inject<A: SagaAction>(
        mut self,
        location: InjectLocation,
        target: ActionKey,
        action: A,
    ) -> Result<Self> {
        let mut step = Some(Step::Action(ActionStep::new(action)));
        if inject_into(&mut self.steps, location, target, &mut step) {
            Ok(self)
        } else {
            Err(SagaError::ActionNotFound(target.name().to_string()))
        }
    }

    /// Inserts an action before every existing step.
    pub fn inject_first<A: SagaAction>(mut self, action: A) -> Self {
        self.steps.insert(0, Step::Action(ActionStep::new(action)));
        self
    }

    /// Appends a nested flow that only runs if `predicate` holds.
    pub fn on<P, F>(self, predicate: P, build: F) -> Self
    where
        P: ConditionPredicate,
        F: FnOnce(SagaFlow) -> SagaFlow,
    {
        let nested = build(SagaFlow::new(predicate.name()));
        self.on_flow(predicate, nested)
    }

    /// Appends an already-built nested flow gated by `predicate`.
    pub fn on_flow<P: ConditionPredicate>(mut self, predicate: P, flow: SagaFlow) -> Self {
        self.steps
            .push(Step::Condition(ConditionStep::new(predicate, flow)));
        self
    }

    /// Sets the completion handler, replacing any earlier one.
    pub fn completion_handler(mut self, handler: impl CompletionHandler) -> Self {
        self.completion_handler = Some(Arc::new(handler));
        self
    }

    /// Sets the exception handler, replacing any earlier one.
    pub fn exception_handler(mut self, handler: impl ExceptionHandler) -> Self {
        self.exception_handler = Some(Arc::new(handler));
        self
    }

    /// Names of every action step, depth-first.
    pub fn action_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        collect_action_names(&self.steps, &mut names);
        names
    }

    /// Validates the flow and resolves its command types.
    pub fn compile(self) -> Result<Arc<CompiledFlow>> {
        if self.name.is_empty() {
            return Err(SagaError::System("flow name is empty".to_string()));
        }

        let mut compiler = Compiler::default();
        compiler.visit(&self.steps)?;
        compiler.check_emitted(&self.name)?;

        tracing::debug!(
            flow = %self.name,
            actions = compiler.command_types.len(),
            predicates = compiler.predicates.len(),
            "flow compiled"
        );

        Ok(Arc::new(CompiledFlow {
            name: self.name,
            steps: self.steps,
            completion_handler: self.completion_handler,
            exception_handler: self.exception_handler,
            command_types: compiler.command_types,
            routes: compiler.routes,
        }))
    }
}

impl std::fmt::Debug for SagaFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SagaFlow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .field("completion_handler", &self.completion_handler.is_some())
            .field("exception_handler", &self.exception_handler.is_some())
            .finish()
    }
}

fn inject_into(
    steps: &mut Vec<Step>,
    location: InjectLocation,
    target: ActionKey,
    step: &mut Option<Step>,
) -> bool {
    for index in 0..steps.len() {
        let found = match &mut steps[index] {
            Step::Action(action) => action.key() == target,
            Step::Condition(condition) => {
                if inject_into(&mut condition.flow.steps, location, target, step) {
                    return true;
                }
                false
            }
        };

        if found {
            let at = match location {
                InjectLocation::Before => index,
                InjectLocation::After => index + 1,
            };
            if let Some(step) = step.take() {
                steps.insert(at, step);
            }
            return true;
        }
    }
    false
}

fn collect_action_names(steps: &[Step], names: &mut Vec<&'static str>) {
    for step in steps {
        match step {
            Step::Action(action) => names.push(action.name()),
            Step::Condition(condition) => collect_action_names(&condition.flow.steps, names),
        }
    }
}

#[derive(Default)]
struct Compiler {
    command_types: HashMap<ActionKey, CommandType>,
    routes: HashMap<&'static str, ActionKey>,
    emitted: Vec<(ActionKey, CommandType)>,
    predicates: HashMap<String, PredicateType>,
}

impl Compiler {
    fn visit(&mut self, steps: &[Step]) -> Result<()> {
        for step in steps {
            match step {
                Step::Action(action) => self.visit_action(action)?,
                Step::Condition(condition) => {
                    self.visit_condition(condition)?;
                    self.visit(&condition.flow.steps)?;
                }
            }
        }
        Ok(())
    }

    fn visit_action(&mut self, step: &ActionStep) -> Result<()> {
        let key = step.key();
        if self.command_types.contains_key(&key) {
            return Ok(());
        }

        let command_type = step.action().resolve_command_type()?;

        if let Some(existing) = self.routes.get(command_type.name())
            && *existing != key
        {
            return Err(SagaError::System(format!(
                "actions {} and {} both accept command {}",
                existing,
                key,
                command_type.name()
            )));
        }

        for emitted in step.action().emits()? {
            self.emitted.push((key, emitted));
        }
        self.routes.insert(command_type.name(), key);
        self.command_types.insert(key, command_type);
        Ok(())
    }

    fn check_emitted(&self, flow: &str) -> Result<()> {
        match self
            .emitted
            .iter()
            .find(|(_, command)| !self.routes.contains_key(command.name()))
        {
            Some((action, command)) => Err(SagaError::System(format!(
                "action {action} emits {command} but no action in flow {flow} accepts it"
            ))),
            None => Ok(()),
        }
    }

    fn visit_condition(&mut self, step: &ConditionStep) -> Result<()> {
        let name = step.name();
        if name.is_empty() {
            return Err(SagaError::System("condition predicate name is empty".to_string()));
        }
        if step.flow.completion_handler.is_some() || step.flow.exception_handler.is_some() {
            return Err(SagaError::System(format!(
                "nested flow {name} registers handlers; handlers belong to the root flow"
            )));
        }

        match self.predicates.get(name) {
            Some(existing) if existing.type_id != step.predicate_type.type_id => {
                Err(SagaError::System(format!(
                    "predicate name {} is used by both {} and {}",
                    name, existing.type_name, step.predicate_type.type_name
                )))
            }
            Some(_) => Ok(()),
            None => {
                self.predicates
                    .insert(name.to_string(), step.predicate_type);
                Ok(())
            }
        }
    }
}

/// A validated flow, ready to run.
pub struct CompiledFlow {
    name: String,
    steps: Vec<Step>,
    completion_handler: Option<Arc<dyn CompletionHandler>>,
    exception_handler: Option<Arc<dyn ExceptionHandler>>,
    command_types: HashMap<ActionKey, CommandType>,
    routes: HashMap<&'static str, ActionKey>,
}

impl CompiledFlow {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The resolved command type an action of this flow accepts.
    pub fn command_type(&self, action: &ActionKey) -> Option<&CommandType> {
        self.command_types.get(action)
    }

    /// The action that accepts commands named `command_name`.
    pub fn action_for_command(&self, command_name: &str) -> Option<ActionKey> {
        self.routes.get(command_name).copied()
    }

    /// Number of distinct action types in the flow.
    pub fn action_count(&self) -> usize {
        self.command_types.len()
    }

    pub fn action_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        collect_action_names(&self.steps, &mut names);
        names
    }

    pub fn completion_handler(&self) -> Option<&dyn CompletionHandler> {
        self.completion_handler.as_deref()
    }

    pub fn exception_handler(&self) -> Option<&dyn ExceptionHandler> {
        self.exception_handler.as_deref()
    }
}

impl std::fmt::Debug for CompiledFlow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFlow")
            .field("name", &self.name)
            .field("steps", &self.steps)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionResult;
    use crate::aggregate::Saga;
    use crate::command::SagaCommand;
    use crate::condition::predicate;
    use crate::handlers::{ExceptionOutcome, RetryAll};
    use async_trait::async_trait;

    macro_rules! action {
        ($action:ident, $command:ident) => {
            #[derive(Debug, Serialize, Deserialize)]
            struct $command;

            impl SagaCommand for $command {}

            struct $action;

            #[async_trait]
            impl SagaAction for $action {
                type Command = $command;

                async fn apply(&self, _command: $command, _saga: &Saga) -> Result<ActionResult> {
                    Ok(ActionResult::done())
                }
            }
        };
    }

    action!(A, ACommand);
    action!(B, BCommand);
    action!(C, CCommand);
    action!(X, XCommand);

    struct AlsoAcceptsA;

    #[async_trait]
    impl SagaAction for AlsoAcceptsA {
        type Command = ACommand;

        async fn apply(&self, _command: ACommand, _saga: &Saga) -> Result<ActionResult> {
            Ok(ActionResult::done())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Generic<T>(T);

    impl SagaCommand for Generic<u8> {}

    struct AcceptsGeneric;

    #[async_trait]
    impl SagaAction for AcceptsGeneric {
        type Command = Generic<u8>;

        async fn apply(&self, _command: Generic<u8>, _saga: &Saga) -> Result<ActionResult> {
            Ok(ActionResult::done())
        }
    }

    /// Accepts `ACommand` and hands `BCommand` to the next step.
    struct EmitsB;

    #[async_trait]
    impl SagaAction for EmitsB {
        type Command = ACommand;

        fn emits() -> Result<Vec<CommandType>> {
            Ok(vec![CommandType::resolve::<BCommand>()?])
        }

        async fn apply(&self, _command: ACommand, _saga: &Saga) -> Result<ActionResult> {
            Ok(ActionResult::next(BCommand))
        }
    }

    fn always(name: &'static str) -> impl ConditionPredicate {
        predicate(name, |_: &Saga| true)
    }

    #[test]
    fn then_preserves_declaration_order() {
        let flow = SagaFlow::new("deploy").then(A).then(B).then(C);
        assert_eq!(flow.action_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn inject_before_and_after() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .then(C)
            .inject(InjectLocation::After, ActionKey::of::<A>(), B)
            .unwrap();
        assert_eq!(flow.action_names(), vec!["A", "B", "C"]);

        let flow = flow
            .inject(InjectLocation::Before, ActionKey::of::<A>(), X)
            .unwrap();
        assert_eq!(flow.action_names(), vec!["X", "A", "B", "C"]);
    }

    #[test]
    fn inject_after_last_step_appends() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .then(B)
            .inject(InjectLocation::After, ActionKey::of::<B>(), C)
            .unwrap();
        assert_eq!(flow.action_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn inject_after_last_nested_step_appends_to_nested_flow() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .on(always("p"), |flow| flow.then(B))
            .inject(InjectLocation::After, ActionKey::of::<B>(), C)
            .unwrap();

        assert_eq!(flow.steps().len(), 2);
        let Step::Condition(condition) = &flow.steps()[1] else {
            panic!("expected condition step");
        };
        assert_eq!(condition.flow().action_names(), vec!["B", "C"]);
        assert_eq!(flow.action_names(), vec!["A", "B", "C"]);
    }

    #[test]
    fn inject_targets_first_match_only() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .then(B)
            .then(A)
            .inject(InjectLocation::After, ActionKey::of::<A>(), X)
            .unwrap();
        assert_eq!(flow.action_names(), vec!["A", "X", "B", "A"]);
    }

    #[test]
    fn inject_searches_nested_flows() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .on(always("p"), |flow| flow.then(B))
            .then(C)
            .inject(InjectLocation::Before, ActionKey::of::<B>(), X)
            .unwrap();

        assert_eq!(flow.action_names(), vec!["A", "X", "B", "C"]);
        let Step::Condition(condition) = &flow.steps()[1] else {
            panic!("expected condition step");
        };
        assert_eq!(condition.flow().action_names(), vec!["X", "B"]);
    }

    #[test]
    fn inject_unknown_target_fails() {
        let result = SagaFlow::new("deploy")
            .then(A)
            .inject(InjectLocation::After, ActionKey::of::<C>(), B);
        assert!(matches!(result, Err(SagaError::ActionNotFound(name)) if name == "C"));
    }

    #[test]
    fn inject_first_prepends() {
        let flow = SagaFlow::new("deploy").then(A).then(B).inject_first(X);
        assert_eq!(flow.action_names(), vec!["X", "A", "B"]);
    }

    #[test]
    fn step_path_display() {
        assert_eq!(StepPath::new(vec![0, 2, 1]).to_string(), "0.2.1");
        assert_eq!(StepPath::new(vec![3]).to_string(), "3");
        assert_eq!(StepPath::new(vec![0, 2]).depth(), 2);
    }

    #[test]
    fn step_path_serializes_as_array() {
        let json = serde_json::to_value(StepPath::new(vec![1, 0])).unwrap();
        assert_eq!(json, serde_json::json!([1, 0]));
    }

    #[test]
    fn compile_resolves_command_types_and_routes() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .on(always("p"), |flow| flow.then(B))
            .compile()
            .unwrap();

        assert_eq!(flow.name(), "deploy");
        assert_eq!(flow.action_count(), 2);
        assert_eq!(
            flow.command_type(&ActionKey::of::<B>()).unwrap().name(),
            "BCommand"
        );
        assert_eq!(flow.action_for_command("ACommand"), Some(ActionKey::of::<A>()));
        assert_eq!(flow.action_for_command("CCommand"), None);
    }

    #[test]
    fn routes_lead_to_the_accepting_action() {
        let flow = SagaFlow::new("deploy").then(EmitsB).then(B).compile().unwrap();

        assert_eq!(flow.action_for_command("ACommand"), Some(ActionKey::of::<EmitsB>()));
        assert_eq!(flow.action_for_command("BCommand"), Some(ActionKey::of::<B>()));
    }

    #[test]
    fn compile_rejects_emitted_command_nobody_accepts() {
        let err = SagaFlow::new("deploy").then(EmitsB).then(C).compile().unwrap_err();

        assert!(err.is_system());
        assert!(err.to_string().contains("BCommand"));
    }

    #[test]
    fn compile_accepts_emitted_command_handled_in_nested_flow() {
        SagaFlow::new("deploy")
            .then(EmitsB)
            .on(always("p"), |flow| flow.then(B))
            .compile()
            .unwrap();
    }

    #[test]
    fn compile_allows_repeated_action() {
        let flow = SagaFlow::new("deploy").then(A).then(B).then(A).compile().unwrap();
        assert_eq!(flow.action_count(), 2);
        assert_eq!(flow.action_names(), vec!["A", "B", "A"]);
    }

    #[test]
    fn compile_rejects_unresolvable_command_type() {
        let err = SagaFlow::new("deploy")
            .then(A)
            .then(AcceptsGeneric)
            .compile()
            .unwrap_err();
        assert!(err.is_system());
    }

    #[test]
    fn compile_rejects_ambiguous_command_route() {
        let err = SagaFlow::new("deploy")
            .then(A)
            .then(AlsoAcceptsA)
            .compile()
            .unwrap_err();
        assert!(err.to_string().contains("ACommand"));
    }

    #[test]
    fn compile_rejects_predicate_name_shared_by_different_types() {
        let err = SagaFlow::new("deploy")
            .on(predicate("p", |_: &Saga| true), |flow| flow.then(A))
            .on(predicate("p", |_: &Saga| false), |flow| flow.then(B))
            .compile()
            .unwrap_err();
        assert!(matches!(err, SagaError::System(_)));
    }

    #[test]
    fn compile_allows_repeated_predicate_of_same_type() {
        fn gate() -> impl ConditionPredicate {
            predicate("p", |_: &Saga| true)
        }

        SagaFlow::new("deploy")
            .on(gate(), |flow| flow.then(A))
            .on(gate(), |flow| flow.then(B))
            .compile()
            .unwrap();
    }

    #[test]
    fn compile_rejects_handlers_on_nested_flows() {
        let err = SagaFlow::new("deploy")
            .on(always("p"), |flow| flow.then(A).exception_handler(RetryAll))
            .compile()
            .unwrap_err();
        assert!(err.is_system());
    }

    #[test]
    fn compile_rejects_empty_name() {
        assert!(SagaFlow::new("").then(A).compile().is_err());
    }

    #[test]
    fn handlers_are_last_write_wins() {
        let flow = SagaFlow::new("deploy")
            .then(A)
            .exception_handler(RetryAll)
            .exception_handler(|_: &Saga, e: SagaError| ExceptionOutcome::Fail(e))
            .compile()
            .unwrap();

        let saga = Saga::new(common::AggregateRef::new("ServerGroup", "app"));
        let outcome = flow
            .exception_handler()
            .unwrap()
            .handle(&saga, SagaError::action("boom"));
        assert!(matches!(outcome, ExceptionOutcome::Fail(_)));
    }
}
