//! Promotion Error Types
//!
//! - A coordination failure means this node could not take part in the
//!   election at all.
//! - A promotion failure means a registered service refused promotion; the
//!   pass stops there and nothing after it is promoted.

use thiserror::Error;

use crate::election::ElectionError;

/// Result type for promotion operations
pub type PromotionResult<T> = Result<T, PromotionError>;

/// Promotion errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromotionError {
    #[error("coordination failure: {0}")]
    Coordination(#[from] ElectionError),

    #[error("service '{service}' failed promotion: {message}")]
    ServiceFailed { service: String, message: String },

    #[error("internal error: {0}")]
    Internal(String),
}

impl PromotionError {
    /// Create a service failure
    pub fn service_failed(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ServiceFailed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Stable error code for logs
    pub fn code(&self) -> &'static str {
        match self {
            PromotionError::Coordination(_) => "COORDINATION_FAILURE",
            PromotionError::ServiceFailed { .. } => "PROMOTION_FAILURE",
            PromotionError::Internal(_) => "PROMOTION_INTERNAL",
        }
    }

    /// Name of the service that failed, for promotion failures
    pub fn failed_service(&self) -> Option<&str> {
        match self {
            PromotionError::ServiceFailed { service, .. } => Some(service),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coordination_from_election() {
        let err: PromotionError = ElectionError::Unreachable("down".into()).into();
        assert_eq!(err.code(), "COORDINATION_FAILURE");
        assert!(err.failed_service().is_none());
    }

    #[test]
    fn test_service_failed_display() {
        let err = PromotionError::service_failed("dr-producer", "disk full");
        assert_eq!(err.failed_service(), Some("dr-producer"));
        assert_eq!(
            err.to_string(),
            "service 'dr-producer' failed promotion: disk full"
        );
    }
}
