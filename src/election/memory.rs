//! In-process coordination service
//!
//! Implements the [`CoordinationClient`] contract over a shared tree held in
//! memory. Every [`MemoryCoordinator::connect`] call opens a new session;
//! expiring a session removes its ephemeral nodes and notifies watchers the
//! way a real coordination service does after a session timeout.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use super::client::{
    sequence_of, sequential_name, split_node_path, validate_node_prefix, validate_path,
    CoordinationClient, SessionId, WatchEvent,
};
use super::errors::{ElectionError, ElectionResult};

#[derive(Debug)]
struct Node {
    name: String,
    owner: SessionId,
}

#[derive(Debug, Default)]
struct Directory {
    next_sequence: u64,
    nodes: BTreeMap<u64, Node>,
    watchers: Vec<(SessionId, UnboundedSender<WatchEvent>)>,
}

impl Directory {
    fn notify(&mut self, path: &str) {
        self.watchers.retain(|(_, tx)| {
            tx.send(WatchEvent::ChildrenChanged {
                path: path.to_string(),
            })
            .is_ok()
        });
    }
}

#[derive(Debug, Default)]
struct Tree {
    directories: HashMap<String, Directory>,
    next_session: SessionId,
    expired: HashSet<SessionId>,
    unreachable: bool,
}

impl Tree {
    fn check_session(&self, session: SessionId) -> ElectionResult<()> {
        if self.unreachable {
            return Err(ElectionError::Unreachable(
                "in-memory coordinator marked unreachable".to_string(),
            ));
        }
        if self.expired.contains(&session) {
            return Err(ElectionError::SessionExpired(session));
        }
        Ok(())
    }
}

/// Shared in-memory coordination service
#[derive(Debug, Clone, Default)]
pub struct MemoryCoordinator {
    tree: Arc<Mutex<Tree>>,
}

impl MemoryCoordinator {
    /// Create an empty coordination service
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new session
    pub fn connect(&self) -> MemorySession {
        let id = match self.tree.lock() {
            Ok(mut tree) => {
                tree.next_session += 1;
                tree.next_session
            }
            Err(poisoned) => {
                let mut tree = poisoned.into_inner();
                tree.next_session += 1;
                tree.next_session
            }
        };
        MemorySession {
            tree: Arc::clone(&self.tree),
            id,
        }
    }

    /// Expire a session: its ephemeral nodes are removed, its own watchers
    /// receive [`WatchEvent::SessionExpired`] and everyone else watching an
    /// affected directory receives a children-changed notification.
    pub fn expire_session(&self, session: SessionId) {
        let Ok(mut tree) = self.tree.lock() else {
            return;
        };
        tree.expired.insert(session);

        for (path, dir) in tree.directories.iter_mut() {
            let before = dir.nodes.len();
            dir.nodes.retain(|_, node| node.owner != session);

            dir.watchers.retain(|(owner, tx)| {
                if *owner == session {
                    let _ = tx.send(WatchEvent::SessionExpired);
                    false
                } else {
                    true
                }
            });

            if dir.nodes.len() != before {
                dir.notify(path);
            }
        }
    }

    /// Simulate losing (or regaining) connectivity to the service.
    pub fn set_unreachable(&self, unreachable: bool) {
        if let Ok(mut tree) = self.tree.lock() {
            tree.unreachable = unreachable;
        }
    }

    /// Live child names of `dir`, ordered by sequence.
    pub fn children_of(&self, dir: &str) -> Vec<String> {
        self.tree
            .lock()
            .map(|tree| {
                tree.directories
                    .get(dir)
                    .map(|d| d.nodes.values().map(|n| n.name.clone()).collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

/// One session against a [`MemoryCoordinator`]
#[derive(Debug, Clone)]
pub struct MemorySession {
    tree: Arc<Mutex<Tree>>,
    id: SessionId,
}

impl MemorySession {
    fn lock(&self) -> ElectionResult<MutexGuard<'_, Tree>> {
        self.tree
            .lock()
            .map_err(|_| ElectionError::Unreachable("coordination state poisoned".to_string()))
    }
}

impl CoordinationClient for MemorySession {
    fn session_id(&self) -> SessionId {
        self.id
    }

    fn create_ephemeral_sequential(&self, dir: &str, prefix: &str) -> ElectionResult<String> {
        validate_path(dir)?;
        validate_node_prefix(prefix)?;
        let mut tree = self.lock()?;
        tree.check_session(self.id)?;

        let directory = tree.directories.entry(dir.to_string()).or_default();
        let sequence = directory.next_sequence;
        directory.next_sequence += 1;

        let name = sequential_name(prefix, sequence);
        directory.nodes.insert(
            sequence,
            Node {
                name: name.clone(),
                owner: self.id,
            },
        );
        directory.notify(dir);

        Ok(format!("{}/{}", dir, name))
    }

    fn children(&self, dir: &str) -> ElectionResult<Vec<String>> {
        validate_path(dir)?;
        let tree = self.lock()?;
        tree.check_session(self.id)?;

        Ok(tree
            .directories
            .get(dir)
            .map(|d| d.nodes.values().map(|n| n.name.clone()).collect())
            .unwrap_or_default())
    }

    fn watch_children(&self, dir: &str) -> ElectionResult<UnboundedReceiver<WatchEvent>> {
        validate_path(dir)?;
        let mut tree = self.lock()?;
        tree.check_session(self.id)?;

        let (tx, rx) = mpsc::unbounded_channel();
        tree.directories
            .entry(dir.to_string())
            .or_default()
            .watchers
            .push((self.id, tx));
        Ok(rx)
    }

    fn delete(&self, path: &str) -> ElectionResult<()> {
        let (dir, name) = split_node_path(path)?;
        let sequence = sequence_of(name).ok_or_else(|| ElectionError::NoNode(path.to_string()))?;

        let mut tree = self.lock()?;
        tree.check_session(self.id)?;

        let directory = tree
            .directories
            .get_mut(dir)
            .ok_or_else(|| ElectionError::NoNode(path.to_string()))?;
        match directory.nodes.get(&sequence) {
            Some(node) if node.name == name => {
                directory.nodes.remove(&sequence);
                directory.notify(dir);
                Ok(())
            }
            _ => Err(ElectionError::NoNode(path.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIR: &str = "/db/leaders/globalservice";

    #[test]
    fn test_sequential_nodes_are_ordered() {
        let coordinator = MemoryCoordinator::new();
        let a = coordinator.connect();
        let b = coordinator.connect();

        let first = a.create_ephemeral_sequential(DIR, "host-a").unwrap();
        let second = b.create_ephemeral_sequential(DIR, "host-b").unwrap();

        assert!(first.ends_with("host-a_0000000000"));
        assert!(second.ends_with("host-b_0000000001"));
        assert_eq!(
            a.children(DIR).unwrap(),
            vec!["host-a_0000000000", "host-b_0000000001"]
        );
    }

    #[test]
    fn test_delete_missing_node() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();

        let err = session.delete(&format!("{}/x_0000000009", DIR)).unwrap_err();
        assert!(matches!(err, ElectionError::NoNode(_)));
    }

    #[test]
    fn test_expire_session_removes_ephemeral_nodes() {
        let coordinator = MemoryCoordinator::new();
        let a = coordinator.connect();
        let b = coordinator.connect();
        a.create_ephemeral_sequential(DIR, "a").unwrap();
        b.create_ephemeral_sequential(DIR, "b").unwrap();

        coordinator.expire_session(a.session_id());

        assert_eq!(coordinator.children_of(DIR), vec!["b_0000000001"]);
        assert_eq!(
            a.children(DIR).unwrap_err(),
            ElectionError::SessionExpired(a.session_id())
        );
    }

    #[test]
    fn test_watchers_see_changes_and_expiry() {
        let coordinator = MemoryCoordinator::new();
        let a = coordinator.connect();
        let b = coordinator.connect();

        let mut a_events = a.watch_children(DIR).unwrap();
        let mut b_events = b.watch_children(DIR).unwrap();

        a.create_ephemeral_sequential(DIR, "a").unwrap();
        assert!(matches!(
            b_events.try_recv().unwrap(),
            WatchEvent::ChildrenChanged { .. }
        ));
        assert!(matches!(
            a_events.try_recv().unwrap(),
            WatchEvent::ChildrenChanged { .. }
        ));

        coordinator.expire_session(a.session_id());
        assert_eq!(a_events.try_recv().unwrap(), WatchEvent::SessionExpired);
        assert!(matches!(
            b_events.try_recv().unwrap(),
            WatchEvent::ChildrenChanged { .. }
        ));
    }

    #[test]
    fn test_unreachable() {
        let coordinator = MemoryCoordinator::new();
        let session = coordinator.connect();
        coordinator.set_unreachable(true);

        assert!(matches!(
            session.create_ephemeral_sequential(DIR, "a"),
            Err(ElectionError::Unreachable(_))
        ));

        coordinator.set_unreachable(false);
        assert!(session.create_ephemeral_sequential(DIR, "a").is_ok());
    }
}
