//! Counters for election, promotion and task activity
//!
//! Monotonic counters, reset only on process start. Relaxed ordering is
//! enough; nothing synchronizes on these values.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics registry shared by the coordinator and the task manager
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    leadership_acquired: AtomicU64,
    leadership_lost: AtomicU64,
    services_promoted: AtomicU64,
    promotion_failures: AtomicU64,
    actions_executed: AtomicU64,
    action_failures: AtomicU64,
    scheduler_faults: AtomicU64,
    validation_rejections: AtomicU64,
    tasks_halted: AtomicU64,
    tasks_restarted: AtomicU64,
}

impl MetricsRegistry {
    /// Create a new metrics registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_leadership_acquired(&self) {
        self.leadership_acquired.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_leadership_lost(&self) {
        self.leadership_lost.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_services_promoted(&self) {
        self.services_promoted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_promotion_failures(&self) {
        self.promotion_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_actions_executed(&self) {
        self.actions_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_action_failures(&self) {
        self.action_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scheduler_faults(&self) {
        self.scheduler_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_validation_rejections(&self) {
        self.validation_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tasks_halted(&self) {
        self.tasks_halted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_tasks_restarted(&self) {
        self.tasks_restarted.fetch_add(1, Ordering::Relaxed);
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            leadership_acquired: self.leadership_acquired.load(Ordering::Relaxed),
            leadership_lost: self.leadership_lost.load(Ordering::Relaxed),
            services_promoted: self.services_promoted.load(Ordering::Relaxed),
            promotion_failures: self.promotion_failures.load(Ordering::Relaxed),
            actions_executed: self.actions_executed.load(Ordering::Relaxed),
            action_failures: self.action_failures.load(Ordering::Relaxed),
            scheduler_faults: self.scheduler_faults.load(Ordering::Relaxed),
            validation_rejections: self.validation_rejections.load(Ordering::Relaxed),
            tasks_halted: self.tasks_halted.load(Ordering::Relaxed),
            tasks_restarted: self.tasks_restarted.load(Ordering::Relaxed),
        }
    }

    /// Snapshot rendered as a JSON object
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub leadership_acquired: u64,
    pub leadership_lost: u64,
    pub services_promoted: u64,
    pub promotion_failures: u64,
    pub actions_executed: u64,
    pub action_failures: u64,
    pub scheduler_faults: u64,
    pub validation_rejections: u64,
    pub tasks_halted: u64,
    pub tasks_restarted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_registry_is_zero() {
        let snapshot = MetricsRegistry::new().snapshot();
        assert_eq!(snapshot.leadership_acquired, 0);
        assert_eq!(snapshot.scheduler_faults, 0);
    }

    #[test]
    fn test_to_json() {
        let registry = MetricsRegistry::new();
        registry.increment_services_promoted();
        registry.increment_services_promoted();
        registry.increment_scheduler_faults();

        let parsed: serde_json::Value = serde_json::from_str(&registry.to_json()).unwrap();
        assert_eq!(parsed["services_promoted"], 2);
        assert_eq!(parsed["scheduler_faults"], 1);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    for _ in 0..100 {
                        reg.increment_actions_executed();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot().actions_executed, 800);
    }
}
