//! Recurring tasks
//!
//! A task pairs a [`Scheduler`] with a scope. The scheduler decides what to
//! do next; a [`SchedulerRunner`] performs it and feeds the result back.
//!
//! - [`Action`] / [`ActionResult`]: one request and its answer
//! - [`SchedulerFactory`]: builds schedulers from validated parameters
//! - [`ProcedureInvoker`]: the owning system's procedure catalog
//! - [`TaskManager`]: starts runners where their scope says they belong

mod action;
mod builtin;
mod errors;
mod invoker;
mod manager;
mod params;
mod runner;
mod scheduler;
mod scope;

pub use action::{Action, ActionKind, ActionOutcome, ActionResult, CallbackFn};
pub use builtin::{
    builtin_factories, CronScheduler, CronSchedulerFactory, DelayScheduler,
    DelaySchedulerFactory, IntervalScheduler, IntervalSchedulerFactory, TimeUnit,
    CRON_SCHEDULER, DELAY_SCHEDULER, INTERVAL_SCHEDULER,
};
pub use errors::{TaskError, TaskResult};
pub use invoker::ProcedureInvoker;
pub use manager::{RestartOutcome, TaskDefinition, TaskManager, TASK_MANAGER_SERVICE};
pub use params::{ParamType, ParamValue, ParameterSignature, VarArgs};
pub use runner::{ErrorPolicy, RunnerHandle, RunnerReport, RunnerState, SchedulerRunner};
pub use scheduler::{
    validate_parameters, ActionResponse, Dependencies, Scheduler, SchedulerCapabilities,
    SchedulerError, SchedulerFactory, TaskHelper,
};
pub use scope::{check_procedure_scope, ProcedureKind, TaskScope};
