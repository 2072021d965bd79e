//! Leader elector
//!
//! Each participant creates one ephemeral-sequential node under the election
//! path. The participant owning the lowest-sequenced live node is the
//! leader. Every change to the path's children triggers a re-evaluation, and
//! only transitions are reported, as [`LeadershipEvent`] messages on the
//! channel handed to [`LeaderElector::new`].
//!
//! The elector never reports leadership unless its own node is present and
//! first in sequence order at the time of evaluation.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use super::client::{
    sequence_of, split_node_path, validate_node_prefix, validate_path, CoordinationClient, WatchEvent,
};
use super::errors::{ElectionError, ElectionResult};
use crate::observability::{log_event_with_fields, Event};

/// Transition notification raised by the elector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadershipEvent {
    /// This participant now holds the lowest live node
    BecameLeader,
    /// This participant no longer holds leadership
    LostLeadership,
}

/// Elector state; a participant is in exactly one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElectorState {
    NotLeader,
    Leader,
}

#[derive(Debug)]
struct Membership {
    node: Option<String>,
    state: ElectorState,
}

/// Everything the watch task needs to re-evaluate leadership.
struct Election {
    client: Arc<dyn CoordinationClient>,
    path: String,
    label: String,
    events: UnboundedSender<LeadershipEvent>,
    membership: Mutex<Membership>,
}

impl Election {
    /// Re-read the children and report a transition if one happened.
    ///
    /// Returns `false` once the participant node is gone and watching should
    /// stop.
    fn evaluate(&self) -> bool {
        let Ok(mut membership) = self.membership.lock() else {
            return false;
        };
        let Some(node_path) = membership.node.clone() else {
            return false;
        };

        let mut children = match self.client.children(&self.path) {
            Ok(children) => children,
            Err(ElectionError::SessionExpired(_)) => {
                drop(membership);
                self.session_lost();
                return false;
            }
            Err(err) => {
                log_event_with_fields(
                    Event::ElectionEvaluationFailed,
                    &[
                        ("path", &self.path),
                        ("participant", &self.label),
                        ("node", &node_path),
                        ("code", err.code()),
                        ("error", &err.to_string()),
                    ],
                );
                return true;
            }
        };
        children.sort_by_key(|child| sequence_of(child));

        let own_name = split_node_path(&node_path).map(|(_, name)| name).unwrap_or("");
        if !children.iter().any(|child| child == own_name) {
            drop(membership);
            self.session_lost();
            return false;
        }

        let next = if children.first().map(String::as_str) == Some(own_name) {
            ElectorState::Leader
        } else {
            ElectorState::NotLeader
        };

        if next != membership.state {
            membership.state = next;
            let (event, notice) = match next {
                ElectorState::Leader => (Event::LeadershipAcquired, LeadershipEvent::BecameLeader),
                ElectorState::NotLeader => (Event::LeadershipLost, LeadershipEvent::LostLeadership),
            };
            log_event_with_fields(
                event,
                &[
                    ("path", &self.path),
                    ("participant", &self.label),
                    ("node", &node_path),
                ],
            );
            // The receiver only goes away when its owner is shutting down.
            let _ = self.events.send(notice);
        }
        true
    }

    /// Our node vanished: the session that owned it is gone.
    fn session_lost(&self) {
        let Ok(mut membership) = self.membership.lock() else {
            return;
        };
        let node = membership.node.take().unwrap_or_default();
        log_event_with_fields(
            Event::SessionExpired,
            &[
                ("path", &self.path),
                ("participant", &self.label),
                ("node", &node),
            ],
        );
        if membership.state == ElectorState::Leader {
            membership.state = ElectorState::NotLeader;
            log_event_with_fields(
                Event::LeadershipLost,
                &[("path", &self.path), ("participant", &self.label)],
            );
            let _ = self.events.send(LeadershipEvent::LostLeadership);
        }
    }
}

/// Participant in one named election
pub struct LeaderElector {
    election: Arc<Election>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl LeaderElector {
    /// Create an elector for `path`. Transitions are delivered on `events`.
    pub fn new(
        client: Arc<dyn CoordinationClient>,
        path: impl Into<String>,
        label: impl Into<String>,
        events: UnboundedSender<LeadershipEvent>,
    ) -> Self {
        Self {
            election: Arc::new(Election {
                client,
                path: path.into(),
                label: label.into(),
                events,
                membership: Mutex::new(Membership {
                    node: None,
                    state: ElectorState::NotLeader,
                }),
            }),
            watcher: Mutex::new(None),
        }
    }

    /// Join the election.
    ///
    /// Creates the participant node, evaluates leadership once before
    /// returning, then keeps watching the path on a background task. Must be
    /// called from within a tokio runtime.
    pub fn start(&self) -> ElectionResult<()> {
        let election = &self.election;
        validate_path(&election.path)?;
        validate_node_prefix(&election.label)?;

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ElectionError::NoRuntime(election.path.clone()))?;

        {
            let mut membership = election
                .membership
                .lock()
                .map_err(|_| ElectionError::Interrupted(election.path.clone()))?;
            if membership.node.is_some() {
                return Err(ElectionError::AlreadyStarted(election.path.clone()));
            }

            // Watch before creating so no change between the two is missed.
            let events = election.client.watch_children(&election.path)?;
            let node = election
                .client
                .create_ephemeral_sequential(&election.path, &election.label)?;

            log_event_with_fields(
                Event::ElectionJoined,
                &[
                    ("path", &election.path),
                    ("participant", &election.label),
                    ("node", &node),
                ],
            );
            membership.node = Some(node);
            membership.state = ElectorState::NotLeader;

            let watched = Arc::clone(election);
            let handle = runtime.spawn(watch_loop(watched, events));
            if let Ok(mut watcher) = self.watcher.lock() {
                if let Some(previous) = watcher.replace(handle) {
                    previous.abort();
                }
            }
        }

        election.evaluate();
        Ok(())
    }

    /// Leave the election: stop watching and delete the participant node.
    ///
    /// Idempotent; a node that is already gone is not an error.
    pub fn shutdown(&self) -> ElectionResult<()> {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }

        let node = {
            let mut membership = self
                .election
                .membership
                .lock()
                .map_err(|_| ElectionError::Interrupted(self.election.path.clone()))?;
            membership.state = ElectorState::NotLeader;
            membership.node.take()
        };

        let Some(node) = node else {
            return Ok(());
        };
        match self.election.client.delete(&node) {
            Ok(()) | Err(ElectionError::NoNode(_)) | Err(ElectionError::SessionExpired(_)) => {
                log_event_with_fields(
                    Event::ElectionLeft,
                    &[
                        ("path", &self.election.path),
                        ("participant", &self.election.label),
                        ("node", &node),
                    ],
                );
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Current state
    pub fn state(&self) -> ElectorState {
        self.election
            .membership
            .lock()
            .map(|m| m.state)
            .unwrap_or(ElectorState::NotLeader)
    }

    pub fn is_leader(&self) -> bool {
        self.state() == ElectorState::Leader
    }

    /// Full path of the participant node, while joined
    pub fn node_path(&self) -> Option<String> {
        self.election
            .membership
            .lock()
            .ok()
            .and_then(|m| m.node.clone())
    }

    pub fn path(&self) -> &str {
        &self.election.path
    }

    pub fn label(&self) -> &str {
        &self.election.label
    }
}

impl Drop for LeaderElector {
    fn drop(&mut self) {
        if let Ok(mut watcher) = self.watcher.lock() {
            if let Some(handle) = watcher.take() {
                handle.abort();
            }
        }
    }
}

async fn watch_loop(election: Arc<Election>, mut events: UnboundedReceiver<WatchEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WatchEvent::ChildrenChanged { .. } => {
                if !election.evaluate() {
                    break;
                }
            }
            WatchEvent::SessionExpired => {
                election.session_lost();
                break;
            }
        }
    }
}
