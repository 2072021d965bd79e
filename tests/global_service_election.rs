//! Global Service Election Tests
//!
//! Several coordinators share one in-memory coordination service:
//! - exactly one of them promotes its services
//! - services are promoted in registration order, fail-fast
//! - leadership moves when the leader's session expires or it leaves

use std::sync::{Arc, Mutex};
use std::time::Duration;

use aerocoord::config::ElectionConfig;
use aerocoord::election::{CoordinationClient, MemoryCoordinator};
use aerocoord::observability::MetricsRegistry;
use aerocoord::promotion::{
    GlobalServiceCoordinator, PromotableService, PromotionStatus, ServiceError,
};

// =============================================================================
// Helpers
// =============================================================================

type Journal = Arc<Mutex<Vec<String>>>;

struct Service {
    name: String,
    journal: Journal,
    refuse: bool,
}

impl PromotableService for Service {
    fn service_name(&self) -> &str {
        &self.name
    }

    fn accept_promotion(&self) -> Result<(), ServiceError> {
        self.journal.lock().unwrap().push(self.name.clone());
        if self.refuse {
            return Err(format!("{} cannot take over", self.name).into());
        }
        Ok(())
    }
}

fn service(name: &str, journal: &Journal) -> Arc<Service> {
    Arc::new(Service {
        name: name.to_string(),
        journal: Arc::clone(journal),
        refuse: false,
    })
}

fn refusing(name: &str, journal: &Journal) -> Arc<Service> {
    Arc::new(Service {
        name: name.to_string(),
        journal: Arc::clone(journal),
        refuse: true,
    })
}

fn node(coordinator: &MemoryCoordinator, label: &str) -> (Arc<GlobalServiceCoordinator>, u64) {
    let session = coordinator.connect();
    let id = session.session_id();
    let node = GlobalServiceCoordinator::new(
        Arc::new(session),
        ElectionConfig::with_label(label),
        Arc::new(MetricsRegistry::new()),
    );
    (node, id)
}

async fn eventually(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for: {}", what);
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

// =============================================================================
// Promotion
// =============================================================================

/// The sole participant leads and promotes in registration order.
#[tokio::test]
async fn test_single_node_promotes_in_order() {
    let zk = MemoryCoordinator::new();
    let (node, _) = node(&zk, "host-1");
    let journal = journal();

    for name in ["A", "B", "C"] {
        node.register_service(service(name, &journal)).unwrap();
    }
    node.start().unwrap();

    eventually("leadership", || node.is_leader()).await;
    eventually("promotion", || {
        node.promotion_status() == PromotionStatus::Promoted { services: 3 }
    })
    .await;
    assert_eq!(*journal.lock().unwrap(), vec!["A", "B", "C"]);

    node.shutdown().unwrap();
}

/// A refusing service stops the pass; later services are not promoted.
#[tokio::test]
async fn test_promotion_is_fail_fast() {
    let zk = MemoryCoordinator::new();
    let (node, _) = node(&zk, "host-1");
    let journal = journal();

    node.register_service(service("A", &journal)).unwrap();
    node.register_service(refusing("B", &journal)).unwrap();
    node.register_service(service("C", &journal)).unwrap();
    node.start().unwrap();

    eventually("failed pass", || {
        matches!(node.promotion_status(), PromotionStatus::Failed { .. })
    })
    .await;

    assert_eq!(*journal.lock().unwrap(), vec!["A", "B"]);
    match node.promotion_status() {
        PromotionStatus::Failed { service, message } => {
            assert_eq!(service, "B");
            assert!(message.contains("cannot take over"));
        }
        other => panic!("unexpected status: {:?}", other),
    }
}

// =============================================================================
// Failover
// =============================================================================

/// Only the first participant promotes while both are live.
#[tokio::test]
async fn test_only_one_leader() {
    let zk = MemoryCoordinator::new();
    let (first, _) = node(&zk, "host-1");
    let (second, _) = node(&zk, "host-2");
    let first_journal = journal();
    let second_journal = journal();

    first.register_service(service("A", &first_journal)).unwrap();
    second.register_service(service("A", &second_journal)).unwrap();

    first.start().unwrap();
    eventually("first leads", || first.is_leader()).await;
    second.start().unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(first.is_leader());
    assert!(!second.is_leader());
    assert!(second_journal.lock().unwrap().is_empty());
    assert_eq!(zk.children_of(first.election_path()).len(), 2);
}

/// When the leader's session expires the next participant takes over.
#[tokio::test]
async fn test_failover_on_session_expiry() {
    let zk = MemoryCoordinator::new();
    let (first, first_session) = node(&zk, "host-1");
    let (second, _) = node(&zk, "host-2");
    let second_journal = journal();
    second.register_service(service("A", &second_journal)).unwrap();

    first.start().unwrap();
    eventually("first leads", || first.is_leader()).await;
    second.start().unwrap();

    zk.expire_session(first_session);

    eventually("second leads", || second.is_leader()).await;
    eventually("first steps down", || !first.is_leader()).await;
    eventually("second promoted", || second_journal.lock().unwrap().len() == 1).await;
}

/// A leader that leaves hands leadership to the next participant.
#[tokio::test]
async fn test_failover_on_shutdown() {
    let zk = MemoryCoordinator::new();
    let (first, _) = node(&zk, "host-1");
    let (second, _) = node(&zk, "host-2");
    let (third, _) = node(&zk, "host-3");

    first.start().unwrap();
    eventually("first leads", || first.is_leader()).await;
    second.start().unwrap();
    third.start().unwrap();

    first.shutdown().unwrap();

    eventually("second leads", || second.is_leader()).await;
    assert!(!third.is_leader());
    assert_eq!(zk.children_of(second.election_path()).len(), 2);

    // Leaving twice is harmless
    first.shutdown().unwrap();
}

/// A participant that rejoins after leaving queues behind the others.
#[tokio::test]
async fn test_rejoin_goes_to_the_back() {
    let zk = MemoryCoordinator::new();
    let (first, _) = node(&zk, "host-1");
    let (second, _) = node(&zk, "host-2");

    first.start().unwrap();
    eventually("first leads", || first.is_leader()).await;
    second.start().unwrap();

    first.shutdown().unwrap();
    eventually("second leads", || second.is_leader()).await;

    first.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!first.is_leader());
    assert!(second.is_leader());
}
