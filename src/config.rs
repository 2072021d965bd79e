//! Configuration
//!
//! Loaded from a JSON file, validated once, immutable afterwards. Every
//! field has a default so a partial file (or none at all) is valid.
//!
//! ```json
//! {
//!   "election": { "path": "/db/leaders/globalservice", "participant_label": "host-3" },
//!   "tasks": { "partition_count": 16, "default_on_error": "LOG" },
//!   "logging": { "min_severity": "INFO" }
//! }
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::election::validate_path;
use crate::observability::{log_event_with_fields, Event, Logger, Severity};
use crate::task::ErrorPolicy;

/// Well-known election path of the global-service group
pub const DEFAULT_ELECTION_PATH: &str = "/db/leaders/globalservice";

/// Default participant label
pub const DEFAULT_PARTICIPANT_LABEL: &str = "globalservice";

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// What happens to a service registered while this node already leads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LateRegistrationPolicy {
    /// Leave it unpromoted until the next leadership event
    #[default]
    DeferToNextElection,
    /// Promote it immediately, inside the registration call
    PromoteImmediately,
}

/// Global-service election settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElectionConfig {
    /// Election path shared by every participant
    pub path: String,

    /// Human-readable label attached to this participant's node
    pub participant_label: String,

    /// Handling of registrations after leadership was granted
    pub late_registration: LateRegistrationPolicy,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_ELECTION_PATH.to_string(),
            participant_label: DEFAULT_PARTICIPANT_LABEL.to_string(),
            late_registration: LateRegistrationPolicy::default(),
        }
    }
}

impl ElectionConfig {
    /// Config for a labelled participant on the default path
    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            participant_label: label.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        validate_path(&self.path).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.participant_label.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "election.participant_label must not be empty".to_string(),
            ));
        }
        if self.participant_label.contains('/') {
            return Err(ConfigError::Invalid(
                "election.participant_label must not contain '/'".to_string(),
            ));
        }
        Ok(())
    }
}

/// Task scheduling settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskConfig {
    /// Lower bound applied to every action delay, in milliseconds
    pub min_delay_ms: u64,

    /// Procedure failure policy for tasks that do not set one
    pub default_on_error: ErrorPolicy,

    /// Number of local partitions; PARTITIONS-scoped tasks run once per partition
    pub partition_count: u32,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: 0,
            default_on_error: ErrorPolicy::default(),
            partition_count: 8,
        }
    }
}

impl TaskConfig {
    pub fn min_delay(&self) -> Duration {
        Duration::from_millis(self.min_delay_ms)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.partition_count == 0 {
            return Err(ConfigError::Invalid(
                "tasks.partition_count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub min_severity: Severity,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            min_severity: Severity::Info,
        }
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordConfig {
    pub election: ElectionConfig,
    pub tasks: TaskConfig,
    pub logging: LoggingConfig,
}

impl CoordConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: display.clone(),
            message: e.to_string(),
        })?;

        let config = Self::parse(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: display.clone(),
                message,
            },
            other => other,
        })?;

        log_event_with_fields(
            Event::ConfigLoaded,
            &[
                ("path", &display),
                ("election_path", &config.election.path),
                ("participant", &config.election.participant_label),
            ],
        );
        Ok(config)
    }

    /// Parse and validate configuration JSON.
    pub fn parse(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.election.validate()?;
        self.tasks.validate()
    }

    /// Apply the logging section to the process-wide logger.
    pub fn apply_logging(&self) {
        Logger::set_min_severity(self.logging.min_severity);
    }
}
