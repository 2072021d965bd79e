//! Observability for the coordination and task subsystems
//!
//! - Structured JSON logging
//! - Typed lifecycle events
//! - Monotonic counters
//!
//! Observability never influences control flow: a failed log write is
//! ignored and counters are never read back by the subsystems they describe.

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{MetricsRegistry, MetricsSnapshot};

/// Log a lifecycle event at its own severity
pub fn log_event(event: Event) {
    Logger::log(event.severity(), event.as_str(), &[]);
}

/// Log a lifecycle event with fields at its own severity
pub fn log_event_with_fields(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
