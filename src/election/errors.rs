//! Election errors
//!
//! Everything that can go wrong between this process and the coordination
//! service. These surface to the coordinator's caller as a coordination
//! failure; retrying is the caller's decision.

use thiserror::Error;

use super::client::SessionId;

/// Result type for election operations
pub type ElectionResult<T> = Result<T, ElectionError>;

/// Election errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ElectionError {
    #[error("coordination service unreachable: {0}")]
    Unreachable(String),

    #[error("no node at {0}")]
    NoNode(String),

    #[error("invalid election path: {0}")]
    InvalidPath(String),

    #[error("session {0} expired")]
    SessionExpired(SessionId),

    #[error("interrupted while waiting on {0}")]
    Interrupted(String),

    #[error("election on {0} already started")]
    AlreadyStarted(String),

    #[error("election on {0} requires a tokio runtime")]
    NoRuntime(String),
}

impl ElectionError {
    /// Stable error code for logs
    pub fn code(&self) -> &'static str {
        match self {
            ElectionError::Unreachable(_) => "ELECTION_UNREACHABLE",
            ElectionError::NoNode(_) => "ELECTION_NO_NODE",
            ElectionError::InvalidPath(_) => "ELECTION_INVALID_PATH",
            ElectionError::SessionExpired(_) => "ELECTION_SESSION_EXPIRED",
            ElectionError::Interrupted(_) => "ELECTION_INTERRUPTED",
            ElectionError::AlreadyStarted(_) => "ELECTION_ALREADY_STARTED",
            ElectionError::NoRuntime(_) => "ELECTION_NO_RUNTIME",
        }
    }

    /// Whether calling `start()` again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ElectionError::Unreachable(_)
                | ElectionError::SessionExpired(_)
                | ElectionError::Interrupted(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ElectionError::Interrupted("/a".into()).is_retryable());
        assert!(ElectionError::Unreachable("down".into()).is_retryable());
        assert!(!ElectionError::InvalidPath("a".into()).is_retryable());
    }

    #[test]
    fn test_codes() {
        assert_eq!(ElectionError::NoNode("/a/b".into()).code(), "ELECTION_NO_NODE");
        assert_eq!(ElectionError::SessionExpired(3).to_string(), "session 3 expired");
    }
}
