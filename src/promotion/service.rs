//! Promotable service capability

/// Error returned by a service that could not be promoted
pub type ServiceError = Box<dyn std::error::Error + Send + Sync>;

/// A cluster-wide singleton that runs only on the global-service leader.
pub trait PromotableService: Send + Sync {
    /// Name used in logs when promotion of this service fails
    fn service_name(&self) -> &str;

    /// Activate the service on this node.
    ///
    /// Called at most once per leadership event. An error aborts the
    /// promotion pass.
    fn accept_promotion(&self) -> Result<(), ServiceError>;
}
