//! Commands accepted by saga actions and their resolved type names.

use std::any::TypeId;

use serde::{Serialize, de::DeserializeOwned};

use crate::action::SagaAction;
use crate::error::{Result, SagaError};

/// The input of a saga action, recorded verbatim in the saga's event log.
///
/// A saga starts with one command and every action may emit more; each is
/// routed to the action that accepts it. The command name is the routing key. It defaults to the
/// unqualified Rust type name; types whose name cannot serve as a stable key
/// (generic types, for instance) must override [`SagaCommand::command_name`].
pub trait SagaCommand: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn command_name() -> &'static str {
        short_type_name::<Self>()
    }
}

/// A command type resolved at flow compile time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandType {
    name: &'static str,
    type_name: &'static str,
    type_id: TypeId,
}

impl CommandType {
    /// Resolves the command type of `C`.
    ///
    /// Fails with a system error if the command name cannot be used as a
    /// routing key.
    pub fn resolve<C: SagaCommand>() -> Result<Self> {
        let name = C::command_name();
        validate_command_name(name).map_err(|reason| {
            SagaError::System(format!(
                "cannot resolve command type {}: {}",
                std::any::type_name::<C>(),
                reason
            ))
        })?;

        Ok(Self {
            name,
            type_name: std::any::type_name::<C>(),
            type_id: TypeId::of::<C>(),
        })
    }

    /// The routing name recorded in the event log.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The fully qualified Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns true if this is the command type of `C`.
    pub fn is<C: SagaCommand>(&self) -> bool {
        self.type_id == TypeId::of::<C>()
    }
}

impl std::fmt::Display for CommandType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Resolves the command type accepted by action `A`.
pub fn resolve_command_type<A: SagaAction>() -> Result<CommandType> {
    CommandType::resolve::<A::Command>().map_err(|e| {
        tracing::warn!(action = A::name(), error = %e, "command type resolution failed");
        e
    })
}

fn validate_command_name(name: &str) -> std::result::Result<(), String> {
    if name.is_empty() {
        return Err("command name is empty".to_string());
    }
    if name.contains('<') {
        return Err(format!(
            "{name} is generic; override SagaCommand::command_name with a concrete name"
        ));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(format!("{name} contains invalid character {c:?}"));
    }
    Ok(())
}

/// Returns the type name of `T` without its module path.
///
/// Generic types keep their full name, which never validates as a command
/// name.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize)]
    struct CreateServerGroupCommand {
        region: String,
    }

    impl SagaCommand for CreateServerGroupCommand {}

    #[derive(Serialize, Deserialize)]
    struct Wrapped<T> {
        inner: T,
    }

    impl<T> SagaCommand for Wrapped<T> where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

    #[derive(Serialize, Deserialize)]
    struct Named<T> {
        inner: T,
    }

    impl SagaCommand for Named<String> {
        fn command_name() -> &'static str {
            "NamedString"
        }
    }

    #[derive(Serialize, Deserialize)]
    struct BadName;

    impl SagaCommand for BadName {
        fn command_name() -> &'static str {
            "bad name"
        }
    }

    #[test]
    fn default_name_is_unqualified_type_name() {
        let command_type = CommandType::resolve::<CreateServerGroupCommand>().unwrap();
        assert_eq!(command_type.name(), "CreateServerGroupCommand");
        assert!(command_type.type_name().ends_with("::CreateServerGroupCommand"));
        assert!(command_type.is::<CreateServerGroupCommand>());
        assert!(!command_type.is::<BadName>());
    }

    #[test]
    fn generic_commands_need_an_explicit_name() {
        let err = CommandType::resolve::<Wrapped<u32>>().unwrap_err();
        assert!(matches!(err, SagaError::System(_)));
        assert!(err.is_system());
    }

    #[test]
    fn explicit_name_resolves_generic_command() {
        let command_type = CommandType::resolve::<Named<String>>().unwrap();
        assert_eq!(command_type.name(), "NamedString");
    }

    #[test]
    fn invalid_characters_are_rejected() {
        let err = CommandType::resolve::<BadName>().unwrap_err();
        assert!(err.to_string().contains("invalid character"));
    }

    struct Create;

    #[async_trait::async_trait]
    impl SagaAction for Create {
        type Command = CreateServerGroupCommand;

        async fn apply(
            &self,
            _command: CreateServerGroupCommand,
            _saga: &crate::Saga,
        ) -> Result<crate::ActionResult> {
            Ok(crate::ActionResult::done())
        }
    }

    #[test]
    fn resolves_command_type_of_action() {
        let command_type = resolve_command_type::<Create>().unwrap();
        assert_eq!(command_type.name(), "CreateServerGroupCommand");
    }

    #[test]
    fn short_type_name_strips_module_path() {
        assert_eq!(short_type_name::<CreateServerGroupCommand>(), "CreateServerGroupCommand");
        assert_eq!(short_type_name::<u64>(), "u64");
    }
}
