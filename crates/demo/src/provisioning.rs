//! A server group provisioning saga.
//!
//! Creates the server group, attaches load balancers when the request names
//! any, then enables traffic.

use std::sync::Arc;

use async_trait::async_trait;
use saga::{
    ActionResult, CommandType, CompiledFlow, CompletionHandler, Result, Saga, SagaAction,
    SagaCommand, SagaError, SagaFlow, predicate,
};
use serde::{Deserialize, Serialize};

pub const FLOW_NAME: &str = "provision-server-group";

/// What the caller asked for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerGroupRequest {
    pub application: String,
    pub region: String,
    pub capacity: u32,
    pub load_balancers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServerGroupCommand {
    pub server_group: String,
    pub region: String,
    pub capacity: u32,
    pub load_balancers: Vec<String>,
}

impl SagaCommand for CreateServerGroupCommand {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachLoadBalancersCommand {
    pub server_group: String,
    pub load_balancers: Vec<String>,
}

impl SagaCommand for AttachLoadBalancersCommand {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnableTrafficCommand {
    pub server_group: String,
    pub capacity: u32,
}

impl SagaCommand for EnableTrafficCommand {}

impl ServerGroupRequest {
    /// The command that starts provisioning `server_group`.
    pub fn into_command(self, server_group: &str) -> CreateServerGroupCommand {
        CreateServerGroupCommand {
            server_group: server_group.to_string(),
            region: self.region,
            capacity: self.capacity,
            load_balancers: self.load_balancers,
        }
    }
}

pub struct CreateServerGroup;

#[async_trait]
impl SagaAction for CreateServerGroup {
    type Command = CreateServerGroupCommand;

    fn emits() -> Result<Vec<CommandType>> {
        Ok(vec![
            CommandType::resolve::<AttachLoadBalancersCommand>()?,
            CommandType::resolve::<EnableTrafficCommand>()?,
        ])
    }

    async fn apply(&self, command: CreateServerGroupCommand, _saga: &Saga) -> Result<ActionResult> {
        if command.capacity == 0 {
            return Err(SagaError::action("capacity must be at least 1"));
        }
        tracing::info!(
            server_group = %command.server_group,
            region = %command.region,
            capacity = command.capacity,
            "server group created"
        );

        let mut result = ActionResult::done();
        if !command.load_balancers.is_empty() {
            result = result.with(AttachLoadBalancersCommand {
                server_group: command.server_group.clone(),
                load_balancers: command.load_balancers,
            });
        }
        Ok(result.with(EnableTrafficCommand {
            server_group: command.server_group,
            capacity: command.capacity,
        }))
    }
}

pub struct AttachLoadBalancers;

#[async_trait]
impl SagaAction for AttachLoadBalancers {
    type Command = AttachLoadBalancersCommand;

    async fn apply(
        &self,
        command: AttachLoadBalancersCommand,
        _saga: &Saga,
    ) -> Result<ActionResult> {
        tracing::info!(
            server_group = %command.server_group,
            load_balancers = ?command.load_balancers,
            "load balancers attached"
        );
        Ok(ActionResult::done())
    }
}

pub struct EnableTraffic;

#[async_trait]
impl SagaAction for EnableTraffic {
    type Command = EnableTrafficCommand;

    async fn apply(&self, command: EnableTrafficCommand, _saga: &Saga) -> Result<ActionResult> {
        tracing::info!(server_group = %command.server_group, "traffic enabled");
        Ok(ActionResult::done())
    }
}

struct LogCompletion;

#[async_trait]
impl CompletionHandler for LogCompletion {
    async fn on_complete(&self, saga: &Saga) -> Result<()> {
        let enabled = saga.command::<EnableTrafficCommand>()?;
        tracing::info!(
            aggregate = %saga.aggregate_ref(),
            capacity = enabled.map(|c| c.capacity).unwrap_or_default(),
            "server group is taking traffic"
        );
        Ok(())
    }
}

/// Builds the provisioning flow.
pub fn flow() -> Result<Arc<CompiledFlow>> {
    let needs_load_balancer = predicate("needsLoadBalancer", |saga: &Saga| {
        saga.command::<CreateServerGroupCommand>()
            .ok()
            .flatten()
            .is_some_and(|c| !c.load_balancers.is_empty())
    });

    SagaFlow::new(FLOW_NAME)
        .then(CreateServerGroup)
        .on(needs_load_balancer, |flow| flow.then(AttachLoadBalancers))
        .then(EnableTraffic)
        .completion_handler(LogCompletion)
        .compile()
}
