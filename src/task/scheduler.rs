//! Scheduler capability
//!
//! A [`Scheduler`] is a pluggable state machine that turns the result of
//! its previous action into the next action. It never performs work
//! itself; the runner does.
//!
//! Optional behaviour is declared up front through [`SchedulerCapabilities`],
//! read once when the runner is built.

use std::collections::BTreeSet;
use std::fmt;

use super::action::{Action, ActionResult};
use super::errors::TaskResult;
use super::params::{ParamValue, ParameterSignature};
use super::scope::TaskScope;
use crate::observability::{Logger, Severity};

/// Error raised by scheduler logic
pub type SchedulerError = Box<dyn std::error::Error + Send + Sync>;

/// What a scheduler returns when asked for work.
///
/// `Ok(None)` and `Err(_)` are both scheduler faults.
pub type ActionResponse = Result<Option<Action>, SchedulerError>;

/// Pluggable producer of actions
pub trait Scheduler: Send {
    /// First action to perform. Called exactly once.
    fn first_action(&mut self) -> ActionResponse;

    /// Consume the result of the previous action and return the next one.
    fn next_action(&mut self, result: ActionResult) -> ActionResponse;

    /// Optional behaviour this scheduler opts into.
    fn capabilities(&self) -> SchedulerCapabilities;
}

/// Names whose change should restart a scheduler
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Dependencies {
    /// Restart on any change
    #[default]
    Undeclared,
    /// Restart only when one of these names changes
    Declared(BTreeSet<String>),
}

impl Dependencies {
    /// Whether a change to `changed` should restart the scheduler
    pub fn affected_by(&self, changed: &[String]) -> bool {
        match self {
            Dependencies::Undeclared => true,
            Dependencies::Declared(names) => changed.iter().any(|c| names.contains(c)),
        }
    }
}

/// Optional scheduler behaviour
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SchedulerCapabilities {
    /// Restart-on-change hint for the owning system
    pub dependencies: Dependencies,

    /// Reject procedures that are not admissible in the task's scope
    pub restrict_procedure_by_scope: bool,
}

impl SchedulerCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the names this scheduler depends on
    pub fn with_dependencies<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = Dependencies::Declared(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn restricted_by_scope(mut self) -> Self {
        self.restrict_procedure_by_scope = true;
        self
    }
}

/// Context handed to a scheduler when it is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHelper {
    task: String,
    scope: TaskScope,
    partition: Option<u32>,
}

impl TaskHelper {
    pub fn new(task: impl Into<String>, scope: TaskScope, partition: Option<u32>) -> Self {
        Self {
            task: task.into(),
            scope,
            partition,
        }
    }

    pub fn task_name(&self) -> &str {
        &self.task
    }

    pub fn scope(&self) -> TaskScope {
        self.scope
    }

    /// Partition this instance runs for; only set for PARTITIONS scope
    pub fn partition(&self) -> Option<u32> {
        self.partition
    }

    /// Log a scheduler message tagged with the task name
    pub fn log(&self, severity: Severity, message: &str) {
        let partition = self.partition.map(|p| p.to_string()).unwrap_or_default();
        Logger::log(
            severity,
            "TASK_MESSAGE",
            &[
                ("task", &self.task),
                ("scope", self.scope.as_str()),
                ("partition", &partition),
                ("message", message),
            ],
        );
    }

    pub fn log_info(&self, message: &str) {
        self.log(Severity::Info, message);
    }

    pub fn log_warn(&self, message: &str) {
        self.log(Severity::Warn, message);
    }

    pub fn log_error(&self, message: &str) {
        self.log(Severity::Error, message);
    }
}

/// Builds scheduler instances for task definitions
pub trait SchedulerFactory: Send + Sync {
    /// Name shown in logs and errors
    fn name(&self) -> &str;

    /// Shape of the parameters `create` accepts
    fn signature(&self) -> ParameterSignature;

    /// Extra checks beyond the signature. `Some(message)` rejects the
    /// parameters.
    fn validate_parameters(&self, _params: &[ParamValue]) -> Option<String> {
        None
    }

    /// Build a new scheduler. Parameters have already been validated.
    fn create(&self, helper: TaskHelper, params: &[ParamValue]) -> TaskResult<Box<dyn Scheduler>>;
}

impl fmt::Debug for dyn SchedulerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerFactory")
            .field("name", &self.name())
            .finish()
    }
}

/// Validate `params` for `factory`: signature first, then the factory's own
/// check. Returns the rejection message.
pub fn validate_parameters(factory: &dyn SchedulerFactory, params: &[ParamValue]) -> Result<(), String> {
    factory.signature().check(params)?;
    match factory.validate_parameters(params) {
        Some(message) if !message.is_empty() => Err(message),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::params::ParamType;

    #[test]
    fn test_undeclared_dependencies_always_affected() {
        assert!(Dependencies::Undeclared.affected_by(&[]));
        assert!(Dependencies::Undeclared.affected_by(&["anything".to_string()]));
    }

    #[test]
    fn test_declared_dependencies() {
        let caps = SchedulerCapabilities::new().with_dependencies(["orders", "sessions"]);
        assert!(caps.dependencies.affected_by(&["sessions".to_string()]));
        assert!(!caps.dependencies.affected_by(&["inventory".to_string()]));
        assert!(!caps.dependencies.affected_by(&[]));
    }

    #[test]
    fn test_default_capabilities() {
        let caps = SchedulerCapabilities::default();
        assert_eq!(caps.dependencies, Dependencies::Undeclared);
        assert!(!caps.restrict_procedure_by_scope);
        assert!(SchedulerCapabilities::new().restricted_by_scope().restrict_procedure_by_scope);
    }

    struct Picky;

    impl SchedulerFactory for Picky {
        fn name(&self) -> &str {
            "picky"
        }

        fn signature(&self) -> ParameterSignature {
            ParameterSignature::new(vec![ParamType::Integer])
        }

        fn validate_parameters(&self, params: &[ParamValue]) -> Option<String> {
            match params[0].as_i64() {
                Some(v) if v > 0 => None,
                _ => Some("interval must be positive".to_string()),
            }
        }

        fn create(&self, _helper: TaskHelper, _params: &[ParamValue]) -> TaskResult<Box<dyn Scheduler>> {
            Err(crate::task::TaskError::Internal("not used".to_string()))
        }
    }

    #[test]
    fn test_validate_signature_then_custom() {
        assert!(validate_parameters(&Picky, &[ParamValue::Integer(3)]).is_ok());
        assert_eq!(
            validate_parameters(&Picky, &[ParamValue::Integer(0)]).unwrap_err(),
            "interval must be positive"
        );
        assert!(validate_parameters(&Picky, &[]).unwrap_err().contains("expected 1"));
    }
}
