//! Execution scope
//!
//! A task runs in one scope; when its scheduler asks for it, the scope also
//! limits which kinds of procedure the task may call:
//!
//! - SYSTEM: anything, on the global-service leader only
//! - HOSTS: non-transactional procedures, on every host
//! - PARTITIONS: partitioned procedures, once per local partition

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a task runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskScope {
    System,
    Hosts,
    Partitions,
}

impl TaskScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskScope::System => "SYSTEM",
            TaskScope::Hosts => "HOSTS",
            TaskScope::Partitions => "PARTITIONS",
        }
    }

    /// Whether a procedure of `kind` is admissible under this scope
    pub fn admits(&self, kind: ProcedureKind) -> bool {
        match self {
            TaskScope::System => true,
            TaskScope::Hosts => kind == ProcedureKind::NonTransactional,
            TaskScope::Partitions => kind == ProcedureKind::Partitioned,
        }
    }

    /// SYSTEM tasks only run on the node holding global-service leadership
    pub fn requires_leadership(&self) -> bool {
        matches!(self, TaskScope::System)
    }
}

impl fmt::Display for TaskScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Kind of a callable procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcedureKind {
    /// Multi-partition transactional procedure
    Transactional,
    /// Non-transactional procedure
    NonTransactional,
    /// Single-partition procedure
    Partitioned,
}

/// Check a procedure request against a scope.
///
/// `kind` is `None` when the procedure does not exist.
pub fn check_procedure_scope(
    scope: TaskScope,
    procedure: &str,
    kind: Option<ProcedureKind>,
) -> Result<(), String> {
    let Some(kind) = kind else {
        return Err(format!("procedure {} does not exist", procedure));
    };
    if !scope.admits(kind) {
        return Err(format!(
            "procedure {} ({:?}) is not allowed in {} scope",
            procedure, kind, scope
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_admits_everything() {
        assert!(TaskScope::System.admits(ProcedureKind::Transactional));
        assert!(TaskScope::System.admits(ProcedureKind::NonTransactional));
        assert!(TaskScope::System.admits(ProcedureKind::Partitioned));
    }

    #[test]
    fn test_hosts_only_non_transactional() {
        assert!(TaskScope::Hosts.admits(ProcedureKind::NonTransactional));
        assert!(!TaskScope::Hosts.admits(ProcedureKind::Partitioned));
        assert!(!TaskScope::Hosts.admits(ProcedureKind::Transactional));
    }

    #[test]
    fn test_partitions_only_partitioned() {
        assert!(TaskScope::Partitions.admits(ProcedureKind::Partitioned));
        assert!(!TaskScope::Partitions.admits(ProcedureKind::NonTransactional));
    }

    #[test]
    fn test_check_unknown_procedure() {
        let err = check_procedure_scope(TaskScope::System, "Missing", None).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_check_out_of_scope() {
        let err = check_procedure_scope(
            TaskScope::Hosts,
            "PurgeOrders",
            Some(ProcedureKind::Partitioned),
        )
        .unwrap_err();
        assert!(err.contains("HOSTS"));
    }
}
