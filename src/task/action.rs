//! Actions and their results
//!
//! A scheduler asks for work by returning an [`Action`]. The runner performs
//! it and hands the outcome back as an [`ActionResult`] carrying the same
//! sequence number, so a scheduler always knows which request a result
//! answers.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::params::ParamValue;

/// In-process work run by a callback action
pub type CallbackFn = Box<dyn FnOnce() -> Result<Value, String> + Send + 'static>;

/// Kind of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    /// Call a procedure
    Procedure,
    /// Run an in-process callback
    Callback,
    /// Wait, then ask for the next action
    Delay,
    /// Stop the scheduler normally
    Exit,
    /// Stop the scheduler with an error
    Error,
}

impl ActionKind {
    /// Whether the runner stops after receiving this kind
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Exit | ActionKind::Error)
    }
}

pub(crate) enum Payload {
    Procedure { name: String, params: Vec<ParamValue> },
    Callback(CallbackFn),
    Delay,
    Exit { message: Option<String> },
    Error { message: String },
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Procedure { name, params } => f
                .debug_struct("Procedure")
                .field("name", name)
                .field("params", params)
                .finish(),
            Payload::Callback(_) => f.write_str("Callback(<fn>)"),
            Payload::Delay => f.write_str("Delay"),
            Payload::Exit { message } => f.debug_struct("Exit").field("message", message).finish(),
            Payload::Error { message } => {
                f.debug_struct("Error").field("message", message).finish()
            }
        }
    }
}

/// Next unit of work requested by a scheduler
#[derive(Debug)]
pub struct Action {
    pub(crate) delay: Duration,
    pub(crate) payload: Payload,
}

impl Action {
    /// Call `procedure` with `params` once `delay` has elapsed
    pub fn procedure(delay: Duration, procedure: impl Into<String>, params: Vec<ParamValue>) -> Self {
        Self {
            delay,
            payload: Payload::Procedure {
                name: procedure.into(),
                params,
            },
        }
    }

    /// Run `callback` once `delay` has elapsed
    pub fn callback<F>(delay: Duration, callback: F) -> Self
    where
        F: FnOnce() -> Result<Value, String> + Send + 'static,
    {
        Self {
            delay,
            payload: Payload::Callback(Box::new(callback)),
        }
    }

    /// Do nothing for `delay`, then ask for the next action
    pub fn delay(delay: Duration) -> Self {
        Self {
            delay,
            payload: Payload::Delay,
        }
    }

    /// Stop the scheduler normally
    pub fn exit(message: Option<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            payload: Payload::Exit { message },
        }
    }

    /// Stop the scheduler and put it in the error state
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            delay: Duration::ZERO,
            payload: Payload::Error {
                message: message.into(),
            },
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self.payload {
            Payload::Procedure { .. } => ActionKind::Procedure,
            Payload::Callback(_) => ActionKind::Callback,
            Payload::Delay => ActionKind::Delay,
            Payload::Exit { .. } => ActionKind::Exit,
            Payload::Error { .. } => ActionKind::Error,
        }
    }

    pub fn delay_duration(&self) -> Duration {
        self.delay
    }

    /// Procedure name, for procedure actions
    pub fn procedure_name(&self) -> Option<&str> {
        match &self.payload {
            Payload::Procedure { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Message carried by exit and error actions
    pub fn message(&self) -> Option<&str> {
        match &self.payload {
            Payload::Exit { message } => message.as_deref(),
            Payload::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Outcome of an executed action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "lowercase")]
pub enum ActionOutcome {
    /// Procedure response or callback return value; `null` for delays
    Success(Value),
    /// Failure cause
    Failure(String),
}

/// Result of the previous action, fed back into the scheduler
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionResult {
    pub(crate) sequence: u64,
    pub(crate) kind: ActionKind,
    pub(crate) delay: Duration,
    pub(crate) procedure: Option<String>,
    pub(crate) params: Vec<ParamValue>,
    pub(crate) outcome: ActionOutcome,
}

impl ActionResult {
    /// Sequence number of the action this result answers, starting at 1
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Delay the action waited before running
    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn procedure(&self) -> Option<&str> {
        self.procedure.as_deref()
    }

    pub fn params(&self) -> &[ParamValue] {
        &self.params
    }

    pub fn outcome(&self) -> &ActionOutcome {
        &self.outcome
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ActionOutcome::Success(_))
    }

    /// Response value, when the action succeeded
    pub fn response(&self) -> Option<&Value> {
        match &self.outcome {
            ActionOutcome::Success(value) => Some(value),
            ActionOutcome::Failure(_) => None,
        }
    }

    /// Failure cause, when the action failed
    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            ActionOutcome::Success(_) => None,
            ActionOutcome::Failure(cause) => Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_procedure_action() {
        let action = Action::procedure(
            Duration::from_secs(5),
            "PurgeSessions",
            vec![ParamValue::Integer(30)],
        );
        assert_eq!(action.kind(), ActionKind::Procedure);
        assert_eq!(action.procedure_name(), Some("PurgeSessions"));
        assert_eq!(action.delay_duration(), Duration::from_secs(5));
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(Action::exit(None).kind().is_terminal());
        assert!(Action::error("bad").kind().is_terminal());
        assert!(!Action::delay(Duration::from_millis(1)).kind().is_terminal());
        assert_eq!(Action::error("bad").message(), Some("bad"));
    }

    #[test]
    fn test_callback_debug_hides_closure() {
        let action = Action::callback(Duration::ZERO, || Ok(Value::Null));
        assert!(format!("{:?}", action).contains("Callback(<fn>)"));
    }

    #[test]
    fn test_result_accessors() {
        let result = ActionResult {
            sequence: 3,
            kind: ActionKind::Procedure,
            delay: Duration::ZERO,
            procedure: Some("Count".to_string()),
            params: vec![],
            outcome: ActionOutcome::Failure("timeout".to_string()),
        };
        assert!(!result.is_success());
        assert_eq!(result.failure(), Some("timeout"));
        assert!(result.response().is_none());
        assert_eq!(result.sequence(), 3);
    }
}
