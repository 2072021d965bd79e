//! Task Manager
//!
//! Owns the task definitions of one node and the runners that execute them.
//!
//! | Scope      | Runs when                      | Instances          |
//! |------------|--------------------------------|--------------------|
//! | SYSTEM     | this node is the global leader | one                |
//! | HOSTS      | always                         | one                |
//! | PARTITIONS | always                         | one per partition  |
//!
//! The manager is itself a [`PromotableService`]: promotion starts the
//! SYSTEM tasks that were waiting for leadership.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::errors::{TaskError, TaskResult};
use super::invoker::ProcedureInvoker;
use super::params::ParamValue;
use super::runner::{ErrorPolicy, RunnerHandle, RunnerReport, RunnerState, SchedulerRunner};
use super::scheduler::{validate_parameters, Dependencies, SchedulerFactory, TaskHelper};
use super::scope::TaskScope;
use crate::config::TaskConfig;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::promotion::{PromotableService, ServiceError};

/// Name the manager registers under with the coordinator
pub const TASK_MANAGER_SERVICE: &str = "task-manager";

/// A named, scoped task
#[derive(Clone)]
pub struct TaskDefinition {
    pub name: String,
    pub scope: TaskScope,
    pub factory: Arc<dyn SchedulerFactory>,
    pub params: Vec<ParamValue>,
    /// Falls back to the configured default when unset
    pub on_error: Option<ErrorPolicy>,
    pub enabled: bool,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, scope: TaskScope, factory: Arc<dyn SchedulerFactory>) -> Self {
        Self {
            name: name.into(),
            scope,
            factory,
            params: Vec::new(),
            on_error: None,
            enabled: true,
        }
    }

    pub fn with_params(mut self, params: Vec<ParamValue>) -> Self {
        self.params = params;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = Some(policy);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl fmt::Debug for TaskDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskDefinition")
            .field("name", &self.name)
            .field("scope", &self.scope)
            .field("factory", &self.factory.name())
            .field("params", &self.params)
            .field("on_error", &self.on_error)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Result of [`TaskManager::dependencies_changed`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestartOutcome {
    /// Tasks stopped and started again
    pub restarted: Vec<String>,
    /// Tasks stopped but not recreated, with the reason
    pub failed: Vec<(String, TaskError)>,
}

impl RestartOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Instance {
    partition: Option<u32>,
    handle: RunnerHandle,
    join: JoinHandle<RunnerReport>,
}

struct ManagedTask {
    definition: TaskDefinition,
    dependencies: Dependencies,
    instances: Vec<Instance>,
}

#[derive(Default)]
struct ManagerState {
    tasks: BTreeMap<String, ManagedTask>,
    leader: bool,
}

/// Runs task definitions on the local node
pub struct TaskManager {
    invoker: Arc<dyn ProcedureInvoker>,
    metrics: Arc<MetricsRegistry>,
    config: TaskConfig,
    runtime: Handle,
    state: Mutex<ManagerState>,
}

impl TaskManager {
    /// Create a manager bound to the current tokio runtime.
    pub fn new(
        invoker: Arc<dyn ProcedureInvoker>,
        metrics: Arc<MetricsRegistry>,
        config: TaskConfig,
    ) -> TaskResult<Self> {
        let runtime = Handle::try_current()
            .map_err(|e| TaskError::Internal(format!("no tokio runtime: {}", e)))?;
        Ok(Self {
            invoker,
            metrics,
            config,
            runtime,
            state: Mutex::new(ManagerState::default()),
        })
    }

    fn lock(&self) -> TaskResult<MutexGuard<'_, ManagerState>> {
        self.state
            .lock()
            .map_err(|_| TaskError::Internal("task manager lock poisoned".to_string()))
    }

    /// Add a task, starting it if its scope allows it to run here.
    pub fn add_task(&self, definition: TaskDefinition) -> TaskResult<()> {
        let mut state = self.lock()?;
        if state.tasks.contains_key(&definition.name) {
            return Err(TaskError::AlreadyExists(definition.name));
        }

        if let Err(message) = validate_parameters(definition.factory.as_ref(), &definition.params) {
            self.metrics.increment_validation_rejections();
            log_event_with_fields(
                Event::TaskRejected,
                &[
                    ("task", &definition.name),
                    ("scheduler", definition.factory.name()),
                    ("error", &message),
                ],
            );
            return Err(TaskError::validation(definition.name, message));
        }

        let mut task = ManagedTask {
            definition,
            dependencies: Dependencies::default(),
            instances: Vec::new(),
        };
        if self.should_run(&task.definition, state.leader) {
            self.start_instances(&mut task)?;
        }
        state.tasks.insert(task.definition.name.clone(), task);
        Ok(())
    }

    /// Remove a task and ask its runners to stop.
    pub fn remove_task(&self, name: &str) -> TaskResult<TaskDefinition> {
        let mut state = self.lock()?;
        let task = state
            .tasks
            .remove(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
        for instance in &task.instances {
            instance.handle.shutdown();
        }
        Ok(task.definition)
    }

    pub fn task_names(&self) -> Vec<String> {
        self.lock()
            .map(|state| state.tasks.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current state of each instance of a task, by partition
    pub fn instance_states(&self, name: &str) -> TaskResult<Vec<(Option<u32>, RunnerState)>> {
        let state = self.lock()?;
        let task = state
            .tasks
            .get(name)
            .ok_or_else(|| TaskError::NotFound(name.to_string()))?;
        Ok(task
            .instances
            .iter()
            .map(|i| (i.partition, i.handle.state()))
            .collect())
    }

    pub fn is_leader(&self) -> bool {
        self.lock().map(|state| state.leader).unwrap_or(false)
    }

    /// Restart every running task whose scheduler depends on one of the
    /// changed names.
    ///
    /// A task that cannot be recreated is left without instances and reported
    /// in [`RestartOutcome::failed`]; the remaining tasks are still restarted.
    pub fn dependencies_changed(&self, changed: &[String]) -> TaskResult<RestartOutcome> {
        let mut state = self.lock()?;
        let mut outcome = RestartOutcome::default();

        for (name, task) in state.tasks.iter_mut() {
            if task.instances.is_empty() || !task.dependencies.affected_by(changed) {
                continue;
            }
            for instance in task.instances.drain(..) {
                instance.handle.shutdown();
            }
            if let Err(err) = self.start_instances(task) {
                self.log_start_failure(&task.definition, &err);
                outcome.failed.push((name.clone(), err));
                continue;
            }

            self.metrics.increment_tasks_restarted();
            log_event_with_fields(
                Event::TaskRestarted,
                &[("task", name), ("changed", &changed.join(","))],
            );
            outcome.restarted.push(name.clone());
        }
        Ok(outcome)
    }

    /// Stop every runner and wait for them to finish. Definitions are kept.
    pub async fn shutdown(&self) -> Vec<RunnerReport> {
        let instances: Vec<Instance> = match self.lock() {
            Ok(mut state) => state
                .tasks
                .values_mut()
                .flat_map(|task| task.instances.drain(..))
                .collect(),
            Err(_) => return Vec::new(),
        };

        for instance in &instances {
            instance.handle.shutdown();
        }

        let mut reports = Vec::with_capacity(instances.len());
        for instance in instances {
            if let Ok(report) = instance.join.await {
                reports.push(report);
            }
        }
        reports
    }

    fn log_start_failure(&self, definition: &TaskDefinition, err: &TaskError) {
        log_event_with_fields(
            Event::TaskErrored,
            &[
                ("task", &definition.name),
                ("scope", definition.scope.as_str()),
                ("scheduler", definition.factory.name()),
                ("code", err.code()),
                ("error", &err.to_string()),
            ],
        );
    }

    fn should_run(&self, definition: &TaskDefinition, leader: bool) -> bool {
        definition.enabled && (!definition.scope.requires_leadership() || leader)
    }

    fn start_instances(&self, task: &mut ManagedTask) -> TaskResult<()> {
        let definition = &task.definition;
        let partitions: Vec<Option<u32>> = match definition.scope {
            TaskScope::Partitions => (0..self.config.partition_count).map(Some).collect(),
            TaskScope::System | TaskScope::Hosts => vec![None],
        };

        let mut started: Vec<Instance> = Vec::with_capacity(partitions.len());
        for partition in partitions {
            let helper = TaskHelper::new(definition.name.clone(), definition.scope, partition);
            let scheduler = match definition.factory.create(helper.clone(), &definition.params) {
                Ok(scheduler) => scheduler,
                Err(e) => {
                    for instance in &started {
                        instance.handle.shutdown();
                    }
                    return Err(e);
                }
            };

            let mut runner = SchedulerRunner::new(
                helper,
                scheduler,
                Arc::clone(&self.invoker),
                Arc::clone(&self.metrics),
            )
            .with_error_policy(definition.on_error.unwrap_or(self.config.default_on_error))
            .with_min_delay(self.config.min_delay());

            task.dependencies = runner.capabilities().dependencies.clone();
            let handle = runner.handle();
            let join = self.runtime.spawn(async move { runner.run().await });
            started.push(Instance {
                partition,
                handle,
                join,
            });
        }

        task.instances = started;
        Ok(())
    }
}

impl PromotableService for TaskManager {
    fn service_name(&self) -> &str {
        TASK_MANAGER_SERVICE
    }

    /// Start the SYSTEM tasks held back until this node led.
    ///
    /// Every pending task is attempted. Tasks that fail to start stay
    /// pending, so a later promotion retries them; the first failure is
    /// returned.
    fn accept_promotion(&self) -> Result<(), ServiceError> {
        let mut state = self.lock()?;
        state.leader = true;

        let mut first_failure: Option<TaskError> = None;
        for task in state.tasks.values_mut() {
            if !task.instances.is_empty() || !self.should_run(&task.definition, true) {
                continue;
            }
            if let Err(err) = self.start_instances(task) {
                self.log_start_failure(&task.definition, &err);
                first_failure.get_or_insert(err);
            }
        }

        match first_failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
