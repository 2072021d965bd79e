//! Global Service Coordinator
//!
//! Runs the global-service election and promotes every registered
//! [`PromotableService`] when this node wins it.
//!
//! - Services are promoted in registration order.
//! - Registration and the promotion pass share one mutex, so a pass sees a
//!   consistent snapshot and a registration is never lost or promoted twice
//!   within one leadership event.
//! - Promotion is fail-fast: the first service that refuses aborts the pass.
//!   A partially promoted node is left as is and reported, never rolled back.
//! - Leadership notifications arrive as [`LeadershipEvent`] messages consumed
//!   by a single task; nothing calls `become_leader` from another thread.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::errors::{PromotionError, PromotionResult};
use super::service::PromotableService;
use crate::config::{ElectionConfig, LateRegistrationPolicy};
use crate::election::{CoordinationClient, ElectionError, LeaderElector, LeadershipEvent};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

/// Outcome of the most recent promotion pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromotionStatus {
    /// No pass has run yet
    Idle,
    /// Every registered service accepted promotion
    Promoted { services: usize },
    /// A service refused; the services after it were not promoted
    Failed { service: String, message: String },
}

struct Registry {
    services: Vec<Arc<dyn PromotableService>>,
    leader: bool,
    status: PromotionStatus,
    /// Leadership tenures that started a promotion pass
    tenures: u64,
}

struct Participation {
    elector: LeaderElector,
    consumer: JoinHandle<()>,
}

/// Coordinator for the global-service election
pub struct GlobalServiceCoordinator {
    client: Arc<dyn CoordinationClient>,
    config: ElectionConfig,
    metrics: Arc<MetricsRegistry>,
    registry: Mutex<Registry>,
    participation: Mutex<Option<Participation>>,
}

impl GlobalServiceCoordinator {
    /// Create a coordinator. Nothing happens until [`start`](Self::start).
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        config: ElectionConfig,
        metrics: Arc<MetricsRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            config,
            metrics,
            registry: Mutex::new(Registry {
                services: Vec::new(),
                leader: false,
                status: PromotionStatus::Idle,
                tenures: 0,
            }),
            participation: Mutex::new(None),
        })
    }

    fn registry(&self) -> PromotionResult<MutexGuard<'_, Registry>> {
        self.registry
            .lock()
            .map_err(|_| PromotionError::Internal("service registry lock poisoned".to_string()))
    }

    /// Add a service to be promoted when this node becomes the leader.
    ///
    /// If this node already leads, the service is promoted now only under
    /// [`LateRegistrationPolicy::PromoteImmediately`]; otherwise it waits for
    /// the next leadership event.
    pub fn register_service(&self, service: Arc<dyn PromotableService>) -> PromotionResult<()> {
        let mut registry = self.registry()?;
        registry.services.push(Arc::clone(&service));
        let position = registry.services.len().to_string();

        log_event_with_fields(
            Event::ServiceRegistered,
            &[
                ("service", service.service_name()),
                ("position", &position),
                ("leader", if registry.leader { "true" } else { "false" }),
            ],
        );

        if registry.leader
            && self.config.late_registration == LateRegistrationPolicy::PromoteImmediately
        {
            self.promote_one(&mut registry, service.as_ref(), &position)?;
        }
        Ok(())
    }

    /// Join the election.
    ///
    /// The election settings are validated first; an invalid path or label
    /// is a coordination failure and nothing is created. Must be called from within a tokio runtime. A failure leaves the
    /// coordinator in its unstarted state, so `start` may be retried.
    pub fn start(self: &Arc<Self>) -> PromotionResult<()> {
        self.config
            .validate()
            .map_err(|e| ElectionError::InvalidPath(e.to_string()))?;

        let mut participation = self
            .participation
            .lock()
            .map_err(|_| PromotionError::Internal("participation lock poisoned".to_string()))?;
        if participation.is_some() {
            return Err(ElectionError::AlreadyStarted(self.config.path.clone()).into());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ElectionError::NoRuntime(self.config.path.clone()))?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let elector = LeaderElector::new(
            Arc::clone(&self.client),
            self.config.path.clone(),
            self.config.participant_label.clone(),
            tx,
        );

        let weak: Weak<Self> = Arc::downgrade(self);
        let consumer = runtime.spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(coordinator) = weak.upgrade() else {
                    break;
                };
                coordinator.handle_event(event);
            }
        });

        if let Err(err) = elector.start() {
            consumer.abort();
            log_event_with_fields(
                Event::ElectionJoinFailed,
                &[
                    ("path", &self.config.path),
                    ("participant", &self.config.participant_label),
                    ("error", &err.to_string()),
                    ("code", err.code()),
                ],
            );
            return Err(err.into());
        }

        *participation = Some(Participation { elector, consumer });
        Ok(())
    }

    fn handle_event(&self, event: LeadershipEvent) {
        match event {
            // Failures are logged and recorded in the status by the pass itself.
            LeadershipEvent::BecameLeader => {
                let _ = self.become_leader();
            }
            LeadershipEvent::LostLeadership => self.become_not_leader(),
        }
    }

    /// Promote every registered service, in registration order.
    ///
    /// Returns the number of services promoted by this pass. A repeated
    /// notification within the same leadership tenure promotes nothing.
    pub(crate) fn become_leader(&self) -> PromotionResult<usize> {
        let mut registry = self.registry()?;
        if registry.leader {
            return Ok(0);
        }
        registry.leader = true;
        registry.tenures += 1;
        self.metrics.increment_leadership_acquired();

        let total = registry.services.len();
        log_event_with_fields(
            Event::PromotionBegin,
            &[
                ("path", &self.config.path),
                ("participant", &self.config.participant_label),
                ("services", &total.to_string()),
            ],
        );

        let services = registry.services.clone();
        for (index, service) in services.iter().enumerate() {
            let position = (index + 1).to_string();
            self.promote_one(&mut registry, service.as_ref(), &position)?;
        }

        registry.status = PromotionStatus::Promoted { services: total };
        log_event_with_fields(
            Event::PromotionComplete,
            &[
                ("path", &self.config.path),
                ("participant", &self.config.participant_label),
                ("services", &total.to_string()),
            ],
        );
        Ok(total)
    }

    fn promote_one(
        &self,
        registry: &mut Registry,
        service: &dyn PromotableService,
        position: &str,
    ) -> PromotionResult<()> {
        match service.accept_promotion() {
            Ok(()) => {
                self.metrics.increment_services_promoted();
                log_event_with_fields(
                    Event::ServicePromoted,
                    &[("service", service.service_name()), ("position", position)],
                );
                Ok(())
            }
            Err(cause) => {
                self.metrics.increment_promotion_failures();
                let message = cause.to_string();
                log_event_with_fields(
                    Event::PromotionFailed,
                    &[
                        ("path", &self.config.path),
                        ("participant", &self.config.participant_label),
                        ("service", service.service_name()),
                        ("position", position),
                        ("error", &message),
                    ],
                );
                registry.status = PromotionStatus::Failed {
                    service: service.service_name().to_string(),
                    message: message.clone(),
                };
                Err(PromotionError::service_failed(service.service_name(), message))
            }
        }
    }

    /// Record that leadership was lost.
    ///
    /// Promoted services are not demoted here; the next leadership event
    /// starts a fresh promotion pass.
    pub(crate) fn become_not_leader(&self) {
        let Ok(mut registry) = self.registry() else {
            return;
        };
        if registry.leader {
            registry.leader = false;
            self.metrics.increment_leadership_lost();
            log_event_with_fields(
                Event::LeadershipLost,
                &[
                    ("path", &self.config.path),
                    ("participant", &self.config.participant_label),
                ],
            );
        }
    }

    /// Leave the election.
    ///
    /// Releases the participant node before touching the service registry,
    /// so it proceeds while a promotion pass is running. Safe to call when
    /// never started or already shut down.
    pub fn shutdown(&self) -> PromotionResult<()> {
        let participation = self
            .participation
            .lock()
            .map_err(|_| PromotionError::Internal("participation lock poisoned".to_string()))?
            .take();

        let Some(participation) = participation else {
            return Ok(());
        };
        participation.consumer.abort();
        let released = participation.elector.shutdown();

        if let Ok(mut registry) = self.registry() {
            registry.leader = false;
        }
        released.map_err(PromotionError::from)
    }

    /// Whether this node currently holds global-service leadership
    pub fn is_leader(&self) -> bool {
        self.registry().map(|r| r.leader).unwrap_or(false)
    }

    /// Number of registered services, promoted or not
    pub fn service_count(&self) -> usize {
        self.registry().map(|r| r.services.len()).unwrap_or(0)
    }

    /// Outcome of the most recent promotion pass
    pub fn promotion_status(&self) -> PromotionStatus {
        self.registry()
            .map(|r| r.status.clone())
            .unwrap_or(PromotionStatus::Idle)
    }

    /// Number of leadership events this node has acted on
    pub fn leadership_events(&self) -> u64 {
        self.registry().map(|r| r.tenures).unwrap_or(0)
    }

    /// Whether the election has been joined
    pub fn is_started(&self) -> bool {
        self.participation
            .lock()
            .map(|p| p.is_some())
            .unwrap_or(false)
    }

    /// Path of this node's participant node, while joined
    pub fn node_path(&self) -> Option<String> {
        self.participation
            .lock()
            .ok()
            .and_then(|p| p.as_ref().and_then(|p| p.elector.node_path()))
    }

    /// Path under which participant nodes are created
    pub fn election_path(&self) -> &str {
        &self.config.path
    }

    /// Label prefixed to this participant's node name
    pub fn participant_label(&self) -> &str {
        &self.config.participant_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::MemoryCoordinator;
    use crate::promotion::ServiceError;

    type CallLog = Arc<Mutex<Vec<String>>>;

    struct Recording {
        name: String,
        fail: bool,
        calls: CallLog,
    }

    impl Recording {
        fn new(name: &str, calls: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail: false,
                calls: Arc::clone(calls),
            })
        }

        fn failing(name: &str, calls: &CallLog) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                fail: true,
                calls: Arc::clone(calls),
            })
        }
    }

    impl PromotableService for Recording {
        fn service_name(&self) -> &str {
            &self.name
        }

        fn accept_promotion(&self) -> Result<(), ServiceError> {
            self.calls.lock().unwrap().push(self.name.clone());
            if self.fail {
                return Err(format!("{} refused", self.name).into());
            }
            Ok(())
        }
    }

    fn coordinator(config: ElectionConfig) -> Arc<GlobalServiceCoordinator> {
        let memory = MemoryCoordinator::new();
        GlobalServiceCoordinator::new(
            Arc::new(memory.connect()),
            config,
            Arc::new(MetricsRegistry::new()),
        )
    }

    fn calls(log: &CallLog) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_promotes_in_registration_order() {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.register_service(Recording::new("A", &log)).unwrap();
        coordinator.register_service(Recording::new("B", &log)).unwrap();
        coordinator.register_service(Recording::new("C", &log)).unwrap();

        assert_eq!(coordinator.become_leader().unwrap(), 3);

        assert_eq!(calls(&log), vec!["A", "B", "C"]);
        assert_eq!(
            coordinator.promotion_status(),
            PromotionStatus::Promoted { services: 3 }
        );
        assert!(coordinator.is_leader());
    }

    #[test]
    fn test_fail_fast_skips_remaining_services() {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.register_service(Recording::new("A", &log)).unwrap();
        coordinator.register_service(Recording::failing("B", &log)).unwrap();
        coordinator.register_service(Recording::new("C", &log)).unwrap();

        let err = coordinator.become_leader().unwrap_err();

        assert_eq!(err.failed_service(), Some("B"));
        assert_eq!(calls(&log), vec!["A", "B"]);
        assert!(matches!(
            coordinator.promotion_status(),
            PromotionStatus::Failed { ref service, .. } if service == "B"
        ));
    }

    #[test]
    fn test_duplicate_notification_is_ignored() {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.register_service(Recording::new("A", &log)).unwrap();

        coordinator.become_leader().unwrap();
        assert_eq!(coordinator.become_leader().unwrap(), 0);

        assert_eq!(calls(&log), vec!["A"]);
        assert_eq!(coordinator.leadership_events(), 1);
    }

    #[test]
    fn test_new_leadership_event_promotes_again() {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.register_service(Recording::new("A", &log)).unwrap();

        coordinator.become_leader().unwrap();
        coordinator.become_not_leader();
        coordinator.become_leader().unwrap();

        assert_eq!(calls(&log), vec!["A", "A"]);
        assert_eq!(coordinator.leadership_events(), 2);
    }

    #[test]
    fn test_late_registration_deferred_by_default() {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.become_leader().unwrap();

        coordinator.register_service(Recording::new("late", &log)).unwrap();

        assert!(calls(&log).is_empty());
        assert_eq!(coordinator.service_count(), 1);
    }

    #[test]
    fn test_late_registration_promoted_immediately() {
        let log = CallLog::default();
        let config = ElectionConfig {
            late_registration: LateRegistrationPolicy::PromoteImmediately,
            ..ElectionConfig::default()
        };
        let coordinator = coordinator(config);
        coordinator.register_service(Recording::new("early", &log)).unwrap();
        coordinator.become_leader().unwrap();

        coordinator.register_service(Recording::new("late", &log)).unwrap();

        assert_eq!(calls(&log), vec!["early", "late"]);
    }

    #[test]
    fn test_late_registration_failure_surfaces() {
        let log = CallLog::default();
        let config = ElectionConfig {
            late_registration: LateRegistrationPolicy::PromoteImmediately,
            ..ElectionConfig::default()
        };
        let coordinator = coordinator(config);
        coordinator.become_leader().unwrap();

        let err = coordinator
            .register_service(Recording::failing("late", &log))
            .unwrap_err();
        assert_eq!(err.code(), "PROMOTION_FAILURE");
    }

    #[test]
    fn test_shutdown_without_start() {
        let coordinator = coordinator(ElectionConfig::default());
        coordinator.shutdown().unwrap();
        coordinator.shutdown().unwrap();
        assert!(!coordinator.is_started());
    }

    fn registered(coordinator: &GlobalServiceCoordinator) -> Vec<String> {
        coordinator
            .registry()
            .unwrap()
            .services
            .iter()
            .map(|s| s.service_name().to_string())
            .collect()
    }

    /// Registers `count` services from separate threads while another thread
    /// runs a promotion pass. Returns the promotion calls and the final
    /// registration order.
    fn register_during_pass(
        policy: LateRegistrationPolicy,
        count: usize,
    ) -> (Vec<String>, Vec<String>, Arc<GlobalServiceCoordinator>) {
        let log = CallLog::default();
        let coordinator = coordinator(ElectionConfig {
            late_registration: policy,
            ..ElectionConfig::default()
        });
        let barrier = std::sync::Barrier::new(count + 1);

        std::thread::scope(|scope| {
            for i in 0..count {
                let (coordinator, log, barrier) = (&coordinator, &log, &barrier);
                scope.spawn(move || {
                    barrier.wait();
                    coordinator
                        .register_service(Recording::new(&format!("svc-{}", i), log))
                        .unwrap();
                });
            }
            scope.spawn(|| {
                barrier.wait();
                coordinator.become_leader().unwrap();
            });
        });

        (calls(&log), registered(&coordinator), coordinator)
    }

    #[test]
    fn test_registration_racing_pass_deferred() {
        for _ in 0..20 {
            let (calls, registered, coordinator) =
                register_during_pass(LateRegistrationPolicy::DeferToNextElection, 16);

            assert_eq!(coordinator.service_count(), 16);
            assert_eq!(registered.len(), 16);
            // The pass saw a prefix of the registration order, each once.
            assert_eq!(calls, registered[..calls.len()].to_vec());
            assert_eq!(
                coordinator.promotion_status(),
                PromotionStatus::Promoted {
                    services: calls.len()
                }
            );
        }
    }

    #[test]
    fn test_registration_racing_pass_promote_immediately() {
        for _ in 0..20 {
            let (calls, registered, coordinator) =
                register_during_pass(LateRegistrationPolicy::PromoteImmediately, 16);

            assert_eq!(coordinator.service_count(), 16);
            // Every service is promoted exactly once, in registration order.
            assert_eq!(calls, registered);
        }
    }

    #[tokio::test]
    async fn test_start_rejects_label_with_slash() {
        let memory = MemoryCoordinator::new();
        let coordinator = GlobalServiceCoordinator::new(
            Arc::new(memory.connect()),
            ElectionConfig::with_label("rack1/host-a"),
            Arc::new(MetricsRegistry::new()),
        );

        let err = coordinator.start().unwrap_err();

        assert_eq!(err.code(), "COORDINATION_FAILURE");
        assert!(!coordinator.is_started());
        assert!(memory.children_of(coordinator.election_path()).is_empty());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let coordinator = coordinator(ElectionConfig::default());
        let err = coordinator.start().unwrap_err();
        assert!(matches!(
            err,
            PromotionError::Coordination(ElectionError::NoRuntime(_))
        ));
        assert!(!coordinator.is_started());
    }
}
