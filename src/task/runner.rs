//! Scheduler Runner
//!
//! Drives one [`Scheduler`] through its action cycle:
//!
//! ```text
//! Initial ──first_action──▶ Running ──next_action(result)──▶ Running
//!    │                         │
//!    └────── fault ──▶ Errored ◀┘── fault / error action / STOP policy
//!                              │
//!                   Halted ◀───┘── exit action / shutdown
//! ```
//!
//! - One action is outstanding at a time; its result is delivered before
//!   the next action is requested.
//! - An action's effect never runs before its delay has elapsed.
//! - Errored and Halted are terminal. A runner in either state never calls
//!   its scheduler again.
//! - Shutdown is cooperative: it abandons a pending delay but does not
//!   interrupt a procedure or callback already running.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use super::action::{Action, ActionKind, ActionOutcome, ActionResult, CallbackFn, Payload};
use super::errors::TaskError;
use super::invoker::ProcedureInvoker;
use super::params::ParamValue;
use super::scheduler::{ActionResponse, Scheduler, SchedulerCapabilities, SchedulerError, TaskHelper};
use super::scope::check_procedure_scope;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Lifecycle state of a runner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunnerState {
    Initial,
    Running,
    Errored,
    Halted,
}

impl RunnerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerState::Errored | RunnerState::Halted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunnerState::Initial => "INITIAL",
            RunnerState::Running => "RUNNING",
            RunnerState::Errored => "ERRORED",
            RunnerState::Halted => "HALTED",
        }
    }
}

/// What the runner does when a procedure or callback fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorPolicy {
    /// Stop the task in the error state
    Stop,
    /// Log the failure and hand it to the scheduler
    #[default]
    Log,
    /// Hand the failure to the scheduler without logging
    Ignore,
}

/// Final (or current) account of a runner, reported to its owner
#[derive(Debug, Clone)]
pub struct RunnerReport {
    pub task: String,
    pub partition: Option<u32>,
    pub runner_id: Uuid,
    pub state: RunnerState,
    pub message: Option<String>,
    pub error: Option<TaskError>,
    pub actions_executed: u64,
}

/// Control handle for a runner that may be running on another task
#[derive(Debug, Clone)]
pub struct RunnerHandle {
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<RunnerState>,
}

impl RunnerHandle {
    /// Ask the runner to stop at its next action boundary
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Last state published by the runner
    pub fn state(&self) -> RunnerState {
        *self.state.borrow()
    }
}

enum Ready {
    Procedure { name: String, params: Vec<ParamValue> },
    Callback(CallbackFn),
    Delay,
}

struct Pending {
    sequence: u64,
    delay: Duration,
    ready: Ready,
}

/// Drives one scheduler instance
pub struct SchedulerRunner {
    id: Uuid,
    helper: TaskHelper,
    scheduler: Box<dyn Scheduler>,
    capabilities: SchedulerCapabilities,
    invoker: Arc<dyn ProcedureInvoker>,
    metrics: Arc<MetricsRegistry>,
    on_error: ErrorPolicy,
    min_delay: Duration,

    state: RunnerState,
    message: Option<String>,
    error: Option<TaskError>,
    pending: Option<Pending>,
    sequence: u64,
    actions_executed: u64,

    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<RunnerState>,
    state_rx: watch::Receiver<RunnerState>,
}

impl SchedulerRunner {
    /// Create a runner. The scheduler's capabilities are read here, once.
    pub fn new(
        helper: TaskHelper,
        scheduler: Box<dyn Scheduler>,
        invoker: Arc<dyn ProcedureInvoker>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        let capabilities = scheduler.capabilities();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(RunnerState::Initial);

        Self {
            id: Uuid::new_v4(),
            helper,
            scheduler,
            capabilities,
            invoker,
            metrics,
            on_error: ErrorPolicy::default(),
            min_delay: Duration::ZERO,
            state: RunnerState::Initial,
            message: None,
            error: None,
            pending: None,
            sequence: 0,
            actions_executed: 0,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            state_tx,
            state_rx,
        }
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Lower bound applied to every action delay
    pub fn with_min_delay(mut self, min_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self
    }

    pub fn handle(&self) -> RunnerHandle {
        RunnerHandle {
            shutdown: Arc::clone(&self.shutdown_tx),
            state: self.state_rx.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> RunnerState {
        self.state
    }

    /// Capabilities captured at construction
    pub fn capabilities(&self) -> &SchedulerCapabilities {
        &self.capabilities
    }

    /// Terminal message: exit message, fault description or "shutdown"
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn error(&self) -> Option<&TaskError> {
        self.error.as_ref()
    }

    pub fn report(&self) -> RunnerReport {
        RunnerReport {
            task: self.helper.task_name().to_string(),
            partition: self.helper.partition(),
            runner_id: self.id,
            state: self.state,
            message: self.message.clone(),
            error: self.error.clone(),
            actions_executed: self.actions_executed,
        }
    }

    /// Drive the scheduler until it reaches a terminal state.
    pub async fn run(&mut self) -> RunnerReport {
        while !self.step().await.is_terminal() {}
        self.report()
    }

    /// Perform one request/response cycle.
    ///
    /// From Initial this asks for the first action. From Running it waits
    /// out the pending action's delay, performs it and asks for the next
    /// one. In a terminal state it does nothing.
    pub async fn step(&mut self) -> RunnerState {
        if self.state.is_terminal() {
            return self.state;
        }
        if self.shutdown_pending() {
            self.cancel();
            return self.state;
        }

        match self.state {
            RunnerState::Initial => {
                self.set_state(RunnerState::Running);
                self.log_started();
                let response = self.ask(|scheduler| scheduler.first_action());
                self.accept(response);
            }
            RunnerState::Running => {
                let Some(pending) = self.pending.take() else {
                    self.fail(TaskError::scheduler_fault(
                        self.helper.task_name(),
                        "no action pending",
                    ));
                    return self.state;
                };

                if !self.wait(pending.delay).await {
                    self.cancel();
                    return self.state;
                }

                let result = self.execute(pending).await;
                // Shutdown requested while the action ran: stop before asking again.
                if self.shutdown_pending() {
                    self.cancel();
                    return self.state;
                }
                if let (ErrorPolicy::Stop, Some(cause)) = (self.on_error, result.failure()) {
                    let message = match result.procedure() {
                        Some(name) => format!("procedure {} failed: {}", name, cause),
                        None => format!("callback failed: {}", cause),
                    };
                    self.fail(TaskError::ActionFailed {
                        task: self.helper.task_name().to_string(),
                        message,
                    });
                    return self.state;
                }

                let response = self.ask(move |scheduler| scheduler.next_action(result));
                self.accept(response);
            }
            RunnerState::Errored | RunnerState::Halted => {}
        }
        self.state
    }

    /// Call into scheduler code, turning a panic into a fault.
    fn ask<F>(&mut self, call: F) -> ActionResponse
    where
        F: FnOnce(&mut dyn Scheduler) -> ActionResponse,
    {
        let scheduler = self.scheduler.as_mut();
        panic::catch_unwind(AssertUnwindSafe(|| call(scheduler)))
            .unwrap_or_else(|payload| Err(SchedulerError::from(panic_message(payload.as_ref()))))
    }

    fn accept(&mut self, response: ActionResponse) {
        let task = self.helper.task_name().to_string();
        let action: Action = match response {
            Ok(Some(action)) => action,
            Ok(None) => {
                return self.fail(TaskError::scheduler_fault(task, "scheduler returned no action"));
            }
            Err(fault) => return self.fail(TaskError::scheduler_fault(task, fault.to_string())),
        };

        let delay = action.delay.max(self.min_delay);
        let ready = match action.payload {
            Payload::Exit { message } => return self.halt(message),
            Payload::Error { message } => {
                return self.fail(TaskError::scheduler_fault(task, message));
            }
            Payload::Procedure { name, params } => {
                if self.capabilities.restrict_procedure_by_scope {
                    let kind = self.invoker.procedure_kind(&name);
                    if let Err(message) = check_procedure_scope(self.helper.scope(), &name, kind) {
                        self.metrics.increment_validation_rejections();
                        return self.fail(TaskError::validation(task, message));
                    }
                }
                Ready::Procedure { name, params }
            }
            Payload::Callback(callback) => Ready::Callback(callback),
            Payload::Delay => Ready::Delay,
        };

        self.sequence += 1;
        self.pending = Some(Pending {
            sequence: self.sequence,
            delay,
            ready,
        });
    }

    /// Wait out `delay`. Returns `false` if shutdown was requested meanwhile.
    async fn wait(&mut self, delay: Duration) -> bool {
        if delay.is_zero() {
            tokio::task::yield_now().await;
            return !self.shutdown_pending();
        }
        let mut shutdown = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = shutdown_requested(&mut shutdown) => false,
        }
    }

    async fn execute(&mut self, pending: Pending) -> ActionResult {
        let Pending {
            sequence,
            delay,
            ready,
        } = pending;

        let (kind, procedure, params, outcome) = match ready {
            Ready::Procedure { name, params } => {
                let invoker = Arc::clone(&self.invoker);
                let partition = self.helper.partition();
                let call_name = name.clone();
                let call_params = params.clone();
                let joined = tokio::task::spawn_blocking(move || {
                    invoker.invoke(&call_name, &call_params, partition)
                })
                .await;
                let outcome = match joined {
                    Ok(Ok(value)) => ActionOutcome::Success(value),
                    Ok(Err(cause)) => ActionOutcome::Failure(cause),
                    Err(err) => ActionOutcome::Failure(format!("procedure did not complete: {}", err)),
                };
                (ActionKind::Procedure, Some(name), params, outcome)
            }
            Ready::Callback(callback) => {
                let outcome = match tokio::task::spawn_blocking(callback).await {
                    Ok(Ok(value)) => ActionOutcome::Success(value),
                    Ok(Err(cause)) => ActionOutcome::Failure(cause),
                    Err(err) => ActionOutcome::Failure(format!("callback did not complete: {}", err)),
                };
                (ActionKind::Callback, None, Vec::new(), outcome)
            }
            Ready::Delay => (
                ActionKind::Delay,
                None,
                Vec::new(),
                ActionOutcome::Success(Value::Null),
            ),
        };

        self.actions_executed += 1;
        self.metrics.increment_actions_executed();

        if let ActionOutcome::Failure(cause) = &outcome {
            self.metrics.increment_action_failures();
            if self.on_error != ErrorPolicy::Ignore {
                let partition = self.partition_field();
                log_event_with_fields(
                    Event::TaskActionFailed,
                    &[
                        ("task", self.helper.task_name()),
                        ("partition", &partition),
                        ("procedure", procedure.as_deref().unwrap_or("")),
                        ("sequence", &sequence.to_string()),
                        ("error", cause),
                    ],
                );
            }
        }

        ActionResult {
            sequence,
            kind,
            delay,
            procedure,
            params,
            outcome,
        }
    }

    fn set_state(&mut self, state: RunnerState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn fail(&mut self, error: TaskError) {
        if matches!(error, TaskError::SchedulerFault { .. }) {
            self.metrics.increment_scheduler_faults();
        }
        let event = if matches!(error, TaskError::Validation { .. }) {
            Event::TaskRejected
        } else {
            Event::TaskErrored
        };
        let message = error.to_string();
        let partition = self.partition_field();
        log_event_with_fields(
            event,
            &[
                ("task", self.helper.task_name()),
                ("scope", self.helper.scope().as_str()),
                ("partition", &partition),
                ("runner", &self.id.to_string()),
                ("code", error.code()),
                ("error", &message),
            ],
        );
        self.pending = None;
        self.message = Some(message);
        self.error = Some(error);
        self.set_state(RunnerState::Errored);
    }

    fn halt(&mut self, message: Option<String>) {
        self.metrics.increment_tasks_halted();
        let partition = self.partition_field();
        log_event_with_fields(
            Event::TaskHalted,
            &[
                ("task", self.helper.task_name()),
                ("partition", &partition),
                ("runner", &self.id.to_string()),
                ("message", message.as_deref().unwrap_or("")),
            ],
        );
        self.pending = None;
        self.message = message;
        self.set_state(RunnerState::Halted);
    }

    fn cancel(&mut self) {
        let partition = self.partition_field();
        log_event_with_fields(
            Event::TaskShutdown,
            &[
                ("task", self.helper.task_name()),
                ("partition", &partition),
                ("runner", &self.id.to_string()),
            ],
        );
        self.pending = None;
        self.message = Some("shutdown".to_string());
        self.set_state(RunnerState::Halted);
    }

    fn log_started(&self) {
        let partition = self.partition_field();
        log_event_with_fields(
            Event::TaskStarted,
            &[
                ("task", self.helper.task_name()),
                ("scope", self.helper.scope().as_str()),
                ("partition", &partition),
                ("runner", &self.id.to_string()),
                (
                    "restricted",
                    if self.capabilities.restrict_procedure_by_scope {
                        "true"
                    } else {
                        "false"
                    },
                ),
            ],
        );
    }

    fn shutdown_pending(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    fn partition_field(&self) -> String {
        self.helper
            .partition()
            .map(|p| p.to_string())
            .unwrap_or_default()
    }
}

async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("scheduler panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("scheduler panicked: {}", message)
    } else {
        "scheduler panicked".to_string()
    }
}
