//! Global service promotion
//!
//! Exactly one node in the cluster runs the cluster-wide singleton services.
//! That node is the winner of the global-service election; when it wins,
//! every registered [`PromotableService`] is promoted, in registration order.
//!
//! The coordinator is an ordinary value: construct it, share it through an
//! `Arc`, and hand it to whatever needs to register services.

mod coordinator;
mod errors;
mod service;

pub use coordinator::{GlobalServiceCoordinator, PromotionStatus};
pub use errors::{PromotionError, PromotionResult};
pub use service::{PromotableService, ServiceError};
