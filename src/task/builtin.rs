//! Built-in schedulers
//!
//! Each one calls a single procedure over and over:
//!
//! - `interval`: every N units, measured start-to-start
//! - `delay`: N units after the previous call completed
//! - `cron`: at the instants of a cron expression
//!
//! Parameters:
//!
//! ```text
//! interval | delay:  (amount INTEGER, unit STRING, procedure STRING, params...)
//! cron:             (expression STRING, procedure STRING, params...)
//! ```
//!
//! A failed procedure response is logged through the task helper and the
//! schedule continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use croner::Cron;
use tokio::time::Instant;

use super::action::{Action, ActionResult};
use super::errors::{TaskError, TaskResult};
use super::params::{ParamType, ParamValue, ParameterSignature, VarArgs};
use super::scheduler::{
    ActionResponse, Scheduler, SchedulerError, SchedulerCapabilities, SchedulerFactory, TaskHelper,
};

pub const INTERVAL_SCHEDULER: &str = "interval";
pub const DELAY_SCHEDULER: &str = "delay";
pub const CRON_SCHEDULER: &str = "cron";

/// Time unit accepted by the interval and delay schedulers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
}

impl TimeUnit {
    /// Parse a unit name, case-insensitively
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "MILLISECONDS" => Some(TimeUnit::Milliseconds),
            "SECONDS" => Some(TimeUnit::Seconds),
            "MINUTES" => Some(TimeUnit::Minutes),
            "HOURS" => Some(TimeUnit::Hours),
            "DAYS" => Some(TimeUnit::Days),
            _ => None,
        }
    }

    pub fn duration(&self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
            TimeUnit::Hours => Duration::from_secs(amount.saturating_mul(3_600)),
            TimeUnit::Days => Duration::from_secs(amount.saturating_mul(86_400)),
        }
    }
}

/// The procedure a built-in scheduler keeps calling
#[derive(Debug, Clone)]
struct Call {
    helper: TaskHelper,
    procedure: String,
    params: Vec<ParamValue>,
}

impl Call {
    fn from_params(helper: TaskHelper, params: &[ParamValue]) -> TaskResult<Self> {
        let procedure = params
            .first()
            .and_then(ParamValue::as_str)
            .ok_or_else(|| TaskError::validation(helper.task_name(), "procedure name is required"))?
            .to_string();
        Ok(Self {
            helper,
            procedure,
            params: params[1..].to_vec(),
        })
    }

    fn action(&self, delay: Duration) -> Action {
        Action::procedure(delay, self.procedure.clone(), self.params.clone())
    }

    fn report(&self, result: &ActionResult) {
        if let Some(cause) = result.failure() {
            self.helper.log_warn(&format!(
                "procedure {} failed: {}",
                self.procedure, cause
            ));
        }
    }

    fn capabilities(&self) -> SchedulerCapabilities {
        SchedulerCapabilities::new()
            .with_dependencies([self.procedure.clone()])
            .restricted_by_scope()
    }
}

fn amount_and_unit(params: &[ParamValue]) -> Result<Duration, String> {
    let amount = params
        .first()
        .and_then(ParamValue::as_i64)
        .ok_or_else(|| "amount must be an integer".to_string())?;
    if amount <= 0 {
        return Err(format!("amount must be positive, got {}", amount));
    }
    let unit = params
        .get(1)
        .and_then(ParamValue::as_str)
        .ok_or_else(|| "time unit is required".to_string())?;
    let unit = TimeUnit::parse(unit).ok_or_else(|| format!("unknown time unit: {}", unit))?;
    Ok(unit.duration(amount as u64))
}

fn timed_signature() -> ParameterSignature {
    ParameterSignature::new(vec![ParamType::BigInt, ParamType::String, ParamType::String])
        .with_varargs(VarArgs::Any)
}

// =============================================================================
// Interval
// =============================================================================

/// Calls a procedure every `interval`, start-to-start. A call that overruns
/// the interval is followed immediately by the next one.
#[derive(Debug)]
pub struct IntervalScheduler {
    call: Call,
    interval: Duration,
    last_start: Option<Instant>,
}

impl IntervalScheduler {
    fn schedule(&mut self, delay: Duration) -> ActionResponse {
        self.last_start = Some(Instant::now() + delay);
        Ok(Some(self.call.action(delay)))
    }
}

impl Scheduler for IntervalScheduler {
    fn first_action(&mut self) -> ActionResponse {
        self.schedule(self.interval)
    }

    fn next_action(&mut self, result: ActionResult) -> ActionResponse {
        self.call.report(&result);
        let ran_for = self
            .last_start
            .map(|start| Instant::now().saturating_duration_since(start))
            .unwrap_or_default();
        self.schedule(self.interval.saturating_sub(ran_for))
    }

    fn capabilities(&self) -> SchedulerCapabilities {
        self.call.capabilities()
    }
}

#[derive(Debug, Default)]
pub struct IntervalSchedulerFactory;

impl SchedulerFactory for IntervalSchedulerFactory {
    fn name(&self) -> &str {
        INTERVAL_SCHEDULER
    }

    fn signature(&self) -> ParameterSignature {
        timed_signature()
    }

    fn validate_parameters(&self, params: &[ParamValue]) -> Option<String> {
        amount_and_unit(params).err()
    }

    fn create(&self, helper: TaskHelper, params: &[ParamValue]) -> TaskResult<Box<dyn Scheduler>> {
        let interval =
            amount_and_unit(params).map_err(|e| TaskError::validation(helper.task_name(), e))?;
        Ok(Box::new(IntervalScheduler {
            call: Call::from_params(helper, &params[2..])?,
            interval,
            last_start: None,
        }))
    }
}

// =============================================================================
// Delay
// =============================================================================

/// Calls a procedure, then waits `delay` after it completes.
#[derive(Debug)]
pub struct DelayScheduler {
    call: Call,
    delay: Duration,
}

impl Scheduler for DelayScheduler {
    fn first_action(&mut self) -> ActionResponse {
        Ok(Some(self.call.action(self.delay)))
    }

    fn next_action(&mut self, result: ActionResult) -> ActionResponse {
        self.call.report(&result);
        Ok(Some(self.call.action(self.delay)))
    }

    fn capabilities(&self) -> SchedulerCapabilities {
        self.call.capabilities()
    }
}

#[derive(Debug, Default)]
pub struct DelaySchedulerFactory;

impl SchedulerFactory for DelaySchedulerFactory {
    fn name(&self) -> &str {
        DELAY_SCHEDULER
    }

    fn signature(&self) -> ParameterSignature {
        timed_signature()
    }

    fn validate_parameters(&self, params: &[ParamValue]) -> Option<String> {
        amount_and_unit(params).err()
    }

    fn create(&self, helper: TaskHelper, params: &[ParamValue]) -> TaskResult<Box<dyn Scheduler>> {
        let delay =
            amount_and_unit(params).map_err(|e| TaskError::validation(helper.task_name(), e))?;
        Ok(Box::new(DelayScheduler {
            call: Call::from_params(helper, &params[2..])?,
            delay,
        }))
    }
}

// =============================================================================
// Cron
// =============================================================================

/// Calls a procedure at each instant matched by a cron expression (UTC).
pub struct CronScheduler {
    call: Call,
    cron: Cron,
}

impl CronScheduler {
    fn until_next(&self) -> ActionResponse {
        let now = Utc::now();
        let next = self
            .cron
            .find_next_occurrence(&now, false)
            .map_err(|e| SchedulerError::from(format!("no next cron occurrence: {}", e)))?;
        let delay = (next - now).to_std().unwrap_or(Duration::ZERO);
        Ok(Some(self.call.action(delay)))
    }
}

impl Scheduler for CronScheduler {
    fn first_action(&mut self) -> ActionResponse {
        self.until_next()
    }

    fn next_action(&mut self, result: ActionResult) -> ActionResponse {
        self.call.report(&result);
        self.until_next()
    }

    fn capabilities(&self) -> SchedulerCapabilities {
        self.call.capabilities()
    }
}

fn parse_cron(params: &[ParamValue]) -> Result<Cron, String> {
    let expression = params
        .first()
        .and_then(ParamValue::as_str)
        .ok_or_else(|| "cron expression is required".to_string())?;
    Cron::new(expression)
        .parse()
        .map_err(|e| format!("invalid cron expression '{}': {}", expression, e))
}

#[derive(Debug, Default)]
pub struct CronSchedulerFactory;

impl SchedulerFactory for CronSchedulerFactory {
    fn name(&self) -> &str {
        CRON_SCHEDULER
    }

    fn signature(&self) -> ParameterSignature {
        ParameterSignature::new(vec![ParamType::String, ParamType::String]).with_varargs(VarArgs::Any)
    }

    fn validate_parameters(&self, params: &[ParamValue]) -> Option<String> {
        parse_cron(params).err()
    }

    fn create(&self, helper: TaskHelper, params: &[ParamValue]) -> TaskResult<Box<dyn Scheduler>> {
        let cron = parse_cron(params).map_err(|e| TaskError::validation(helper.task_name(), e))?;
        Ok(Box::new(CronScheduler {
            call: Call::from_params(helper, &params[1..])?,
            cron,
        }))
    }
}

/// Factories for every built-in scheduler
pub fn builtin_factories() -> Vec<Arc<dyn SchedulerFactory>> {
    vec![
        Arc::new(IntervalSchedulerFactory),
        Arc::new(DelaySchedulerFactory),
        Arc::new(CronSchedulerFactory),
    ]
}
