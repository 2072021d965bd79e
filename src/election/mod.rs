//! Leader election
//!
//! - [`CoordinationClient`]: what the election needs from the coordination service
//! - [`MemoryCoordinator`]: in-process implementation of that contract
//! - [`LeaderElector`]: lowest-sequence-wins election over one path
//!
//! Leadership changes are delivered as explicit [`LeadershipEvent`] messages
//! on a channel owned by whoever consumes them. The elector never calls back
//! into its consumer.

mod client;
mod elector;
mod errors;
mod memory;

pub use client::{
    sequence_of, sequential_name, validate_node_prefix, validate_path, CoordinationClient,
    SessionId, WatchEvent, SEQUENCE_WIDTH,
};
pub use elector::{ElectorState, LeaderElector, LeadershipEvent};
pub use errors::{ElectionError, ElectionResult};
pub use memory::{MemoryCoordinator, MemorySession};
