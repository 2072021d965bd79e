//! Observable lifecycle events
//!
//! Every log line emitted by the election, promotion and task subsystems is
//! named by one of these events.

use std::fmt;

use super::logger::Severity;

/// Observable events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Configuration
    /// Configuration loaded
    ConfigLoaded,

    // Election
    /// Participant node created under the election path
    ElectionJoined,
    /// Election participation could not be established
    ElectionJoinFailed,
    /// Live participants could not be read; leadership left unchanged
    ElectionEvaluationFailed,
    /// This participant became the lowest live node
    LeadershipAcquired,
    /// This participant is no longer the leader
    LeadershipLost,
    /// Participant node removed during shutdown
    ElectionLeft,
    /// Participant node vanished underneath the elector
    SessionExpired,

    // Promotion
    /// Service added to the coordinator
    ServiceRegistered,
    /// Promotion pass begins
    PromotionBegin,
    /// A single service accepted promotion
    ServicePromoted,
    /// Promotion pass finished for every registered service
    PromotionComplete,
    /// A service rejected promotion; the pass was aborted
    PromotionFailed,

    // Tasks
    /// Task definition rejected before construction or execution
    TaskRejected,
    /// Runner started driving a scheduler
    TaskStarted,
    /// A procedure or callback reported failure back to its scheduler
    TaskActionFailed,
    /// Scheduler stopped voluntarily
    TaskHalted,
    /// Scheduler fault; runner stopped
    TaskErrored,
    /// Task recreated after a dependency change
    TaskRestarted,
    /// Runner cancelled by its owner
    TaskShutdown,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ConfigLoaded => "CONFIG_LOADED",

            Event::ElectionJoined => "ELECTION_JOINED",
            Event::ElectionJoinFailed => "ELECTION_JOIN_FAILED",
            Event::ElectionEvaluationFailed => "ELECTION_EVALUATION_FAILED",
            Event::LeadershipAcquired => "LEADERSHIP_ACQUIRED",
            Event::LeadershipLost => "LEADERSHIP_LOST",
            Event::ElectionLeft => "ELECTION_LEFT",
            Event::SessionExpired => "ELECTION_SESSION_EXPIRED",

            Event::ServiceRegistered => "SERVICE_REGISTERED",
            Event::PromotionBegin => "PROMOTION_BEGIN",
            Event::ServicePromoted => "SERVICE_PROMOTED",
            Event::PromotionComplete => "PROMOTION_COMPLETE",
            Event::PromotionFailed => "PROMOTION_FAILED",

            Event::TaskRejected => "TASK_REJECTED",
            Event::TaskStarted => "TASK_STARTED",
            Event::TaskActionFailed => "TASK_ACTION_FAILED",
            Event::TaskHalted => "TASK_HALTED",
            Event::TaskErrored => "TASK_ERRORED",
            Event::TaskRestarted => "TASK_RESTARTED",
            Event::TaskShutdown => "TASK_SHUTDOWN",
        }
    }

    /// Severity the event is logged at
    pub fn severity(&self) -> Severity {
        match self {
            Event::LeadershipLost
            | Event::SessionExpired
            | Event::ElectionEvaluationFailed
            | Event::TaskActionFailed => Severity::Warn,
            Event::ElectionJoinFailed
            | Event::PromotionFailed
            | Event::TaskRejected
            | Event::TaskErrored => Severity::Error,
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_events_are_errors() {
        assert_eq!(Event::PromotionFailed.severity(), Severity::Error);
        assert_eq!(Event::TaskErrored.severity(), Severity::Error);
        assert_eq!(Event::LeadershipLost.severity(), Severity::Warn);
        assert_eq!(Event::ServicePromoted.severity(), Severity::Info);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(Event::LeadershipAcquired.to_string(), "LEADERSHIP_ACQUIRED");
        assert_eq!(Event::SessionExpired.as_str(), "ELECTION_SESSION_EXPIRED");
    }

    #[test]
    fn test_evaluation_failure_distinct_from_join_failure() {
        assert_ne!(
            Event::ElectionEvaluationFailed.as_str(),
            Event::ElectionJoinFailed.as_str()
        );
        assert_eq!(Event::ElectionEvaluationFailed.severity(), Severity::Warn);
        assert_eq!(Event::ElectionJoinFailed.severity(), Severity::Error);
    }
}
