//! # Task Errors

use thiserror::Error;

/// Result type for task operations
pub type TaskResult<T> = Result<T, TaskError>;

/// Task errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The scheduler raised, panicked or produced no action
    #[error("scheduler fault in task '{task}': {message}")]
    SchedulerFault { task: String, message: String },

    /// Parameters or a requested procedure failed type or scope checks
    #[error("validation failed for task '{task}': {message}")]
    Validation { task: String, message: String },

    /// A procedure or callback failed under the STOP error policy
    #[error("action failed in task '{task}': {message}")]
    ActionFailed { task: String, message: String },

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("task already exists: {0}")]
    AlreadyExists(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl TaskError {
    pub fn scheduler_fault(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchedulerFault {
            task: task.into(),
            message: message.into(),
        }
    }

    pub fn validation(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Stable error code for logs
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::SchedulerFault { .. } => "SCHEDULER_FAULT",
            TaskError::Validation { .. } => "VALIDATION_FAILURE",
            TaskError::ActionFailed { .. } => "ACTION_FAILED",
            TaskError::NotFound(_) => "TASK_NOT_FOUND",
            TaskError::AlreadyExists(_) => "TASK_ALREADY_EXISTS",
            TaskError::Internal(_) => "TASK_INTERNAL",
        }
    }
}
