//! aerocoord - global service coordination and recurring tasks
//!
//! Two cooperating subsystems for a clustered server:
//!
//! - [`promotion`]: elects one node as the global-service leader and
//!   promotes every registered singleton service on that node
//! - [`task`]: runs pluggable schedulers that issue procedure calls,
//!   scoped to the leader, every host, or every partition
//!
//! Both rest on [`election`] for leadership, [`config`] for settings and
//! [`observability`] for logging and counters.

pub mod config;
pub mod election;
pub mod observability;
pub mod promotion;
pub mod task;
