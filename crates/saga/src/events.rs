//! Saga events recorded in the target aggregate's event log.

use chrono::{DateTime, Utc};
use common::SagaId;
use event_store::EventPayload;
use serde::{Deserialize, Serialize};

use crate::command::{CommandType, SagaCommand};
use crate::error::Result;
use crate::flow::StepPath;

/// A command as stored in the log: its resolved type name and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedCommand {
    pub command_type: String,
    pub command: serde_json::Value,
}

impl RecordedCommand {
    /// Serializes `command` under its resolved command name.
    pub fn new<C: SagaCommand>(command: &C) -> Result<Self> {
        Ok(Self {
            command_type: CommandType::resolve::<C>()?.name().to_string(),
            command: serde_json::to_value(command)?,
        })
    }

    /// Decodes the payload as `C`.
    pub fn decode<C: SagaCommand>(&self) -> Result<C> {
        Ok(serde_json::from_value(self.command.clone())?)
    }
}

/// Events that can occur during saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum SagaEvent {
    /// Saga execution started.
    SagaStarted(SagaStartedData),

    /// An action consumed a command and emitted the commands for later steps.
    ActionCompleted(ActionCompletedData),

    /// A condition predicate was evaluated for the first time.
    ConditionEvaluated(ConditionEvaluatedData),

    /// Every step completed.
    SagaCompleted(SagaCompletedData),

    /// A step failed and the failure was not handled.
    SagaFailed(SagaFailedData),

    /// The saga was cancelled.
    SagaCancelled(SagaCancelledData),
}

impl EventPayload for SagaEvent {
    const EVENT_TYPES: &'static [&'static str] = &[
        "SagaStarted",
        "ActionCompleted",
        "ConditionEvaluated",
        "SagaCompleted",
        "SagaFailed",
        "SagaCancelled",
    ];

    fn event_type(&self) -> &'static str {
        match self {
            SagaEvent::SagaStarted(_) => "SagaStarted",
            SagaEvent::ActionCompleted(_) => "ActionCompleted",
            SagaEvent::ConditionEvaluated(_) => "ConditionEvaluated",
            SagaEvent::SagaCompleted(_) => "SagaCompleted",
            SagaEvent::SagaFailed(_) => "SagaFailed",
            SagaEvent::SagaCancelled(_) => "SagaCancelled",
        }
    }
}

/// Data for SagaStarted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaStartedData {
    /// The saga instance ID.
    pub saga_id: SagaId,
    /// Name of the flow being executed; used to find the flow on resume.
    pub flow_name: String,
    /// The command the saga was started with.
    pub command: RecordedCommand,
    /// When the saga started.
    pub started_at: DateTime<Utc>,
}

/// Data for ActionCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCompletedData {
    /// Position of the action in the flow.
    pub path: StepPath,
    /// The action name.
    pub action: String,
    /// Resolved name of the command the action consumed.
    pub command_type: String,
    /// Commands the action emitted, in order.
    #[serde(default)]
    pub next_commands: Vec<RecordedCommand>,
    /// When the action completed.
    pub completed_at: DateTime<Utc>,
}

/// Data for ConditionEvaluated event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionEvaluatedData {
    pub path: StepPath,
    /// Predicate name; the cache key.
    pub name: String,
    pub result: bool,
}

/// Data for SagaCompleted event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCompletedData {
    /// When the saga completed.
    pub completed_at: DateTime<Utc>,
}

/// Data for SagaFailed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailedData {
    /// The step that failed, if the failure happened inside a step.
    pub step: Option<StepPath>,
    /// Reason for failure.
    pub reason: String,
    /// When the saga failed.
    pub failed_at: DateTime<Utc>,
}

/// Data for SagaCancelled event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaCancelledData {
    pub reason: String,
    pub cancelled_at: DateTime<Utc>,
}

// Convenience constructors
impl SagaEvent {
    /// Creates a SagaStarted event.
    pub fn saga_started(
        saga_id: SagaId,
        flow_name: impl Into<String>,
        command: RecordedCommand,
    ) -> Self {
        SagaEvent::SagaStarted(SagaStartedData {
            saga_id,
            flow_name: flow_name.into(),
            command,
            started_at: Utc::now(),
        })
    }

    /// Creates an ActionCompleted event.
    pub fn action_completed(
        path: StepPath,
        action: impl Into<String>,
        command_type: impl Into<String>,
        next_commands: Vec<RecordedCommand>,
    ) -> Self {
        SagaEvent::ActionCompleted(ActionCompletedData {
            path,
            action: action.into(),
            command_type: command_type.into(),
            next_commands,
            completed_at: Utc::now(),
        })
    }

    /// Creates a ConditionEvaluated event.
    pub fn condition_evaluated(path: StepPath, name: impl Into<String>, result: bool) -> Self {
        SagaEvent::ConditionEvaluated(ConditionEvaluatedData {
            path,
            name: name.into(),
            result,
        })
    }

    /// Creates a SagaCompleted event.
    pub fn saga_completed() -> Self {
        SagaEvent::SagaCompleted(SagaCompletedData {
            completed_at: Utc::now(),
        })
    }

    /// Creates a SagaFailed event.
    pub fn saga_failed(step: Option<StepPath>, reason: impl Into<String>) -> Self {
        SagaEvent::SagaFailed(SagaFailedData {
            step,
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }

    /// Creates a SagaCancelled event.
    pub fn saga_cancelled(reason: impl Into<String>) -> Self {
        SagaEvent::SagaCancelled(SagaCancelledData {
            reason: reason.into(),
            cancelled_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::AggregateRef;
    use event_store::{EventEnvelope, EventRegistry};

    fn deploy_command() -> RecordedCommand {
        RecordedCommand {
            command_type: "CreateServerGroupCommand".to_string(),
            command: serde_json::json!({ "region": "us-west-2" }),
        }
    }

    #[test]
    fn test_event_type_names() {
        assert_eq!(
            SagaEvent::saga_started(SagaId::new(), "deploy", deploy_command()).event_type(),
            "SagaStarted"
        );
        assert_eq!(
            SagaEvent::action_completed(
                StepPath::new(vec![0]),
                "CreateServerGroup",
                "CreateServerGroupCommand",
                vec![deploy_command()],
            )
            .event_type(),
            "ActionCompleted"
        );
        assert_eq!(
            SagaEvent::condition_evaluated(StepPath::new(vec![1]), "needsLb", true).event_type(),
            "ConditionEvaluated"
        );
        assert_eq!(SagaEvent::saga_completed().event_type(), "SagaCompleted");
        assert_eq!(SagaEvent::saga_failed(None, "boom").event_type(), "SagaFailed");
        assert_eq!(SagaEvent::saga_cancelled("user").event_type(), "SagaCancelled");
    }

    #[test]
    fn test_tagged_serialization() {
        let event = SagaEvent::condition_evaluated(StepPath::new(vec![1, 0]), "needsLb", false);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "ConditionEvaluated");
        assert_eq!(json["data"]["path"], serde_json::json!([1, 0]));
        assert_eq!(json["data"]["name"], "needsLb");
        assert_eq!(json["data"]["result"], false);
    }

    #[test]
    fn test_action_completed_carries_next_commands() {
        let event = SagaEvent::action_completed(
            StepPath::new(vec![0]),
            "CreateServerGroup",
            "CreateServerGroupCommand",
            vec![deploy_command()],
        );
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["data"]["command_type"], "CreateServerGroupCommand");
        assert_eq!(
            json["data"]["next_commands"][0]["command"]["region"],
            "us-west-2"
        );
    }

    #[test]
    fn test_registry_covers_every_event_type() {
        let registry = EventRegistry::<SagaEvent>::for_payload().unwrap();
        assert_eq!(registry.len(), SagaEvent::EVENT_TYPES.len());

        let aggregate = AggregateRef::new("ServerGroup", "app-v001");
        let event = SagaEvent::saga_failed(Some(StepPath::new(vec![2])), "quota exceeded");
        let envelope = EventEnvelope::from_payload(&aggregate, &event).unwrap();

        assert_eq!(envelope.event_type, "SagaFailed");
        assert_eq!(registry.decode(&envelope).unwrap(), event);
    }
}
