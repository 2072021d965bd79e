//! Coordination client contract
//!
//! The election only needs four primitives from the coordination service:
//! ephemeral-sequential node creation, ordered child listing, child watches
//! and node deletion. Wire format and session management belong to the
//! implementation.

use tokio::sync::mpsc::UnboundedReceiver;

use super::errors::{ElectionError, ElectionResult};

/// Identity of one client session with the coordination service
pub type SessionId = u64;

/// Width of the sequence suffix appended to sequential nodes
pub const SEQUENCE_WIDTH: usize = 10;

/// Notification delivered to a child watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A child of the watched path was created or removed
    ChildrenChanged { path: String },
    /// The watching session expired; its ephemeral nodes are gone
    SessionExpired,
}

/// Operations the election requires from the coordination service.
///
/// Calls may block; implementations own their own timeouts.
pub trait CoordinationClient: Send + Sync {
    /// Session this client operates under
    fn session_id(&self) -> SessionId;

    /// Create an ephemeral node named `{prefix}_{sequence}` under `dir`.
    ///
    /// Returns the full path of the created node. The node is removed when
    /// the session ends.
    fn create_ephemeral_sequential(&self, dir: &str, prefix: &str) -> ElectionResult<String>;

    /// Child node names of `dir`, ordered by sequence.
    fn children(&self, dir: &str) -> ElectionResult<Vec<String>>;

    /// Subscribe to child changes of `dir`.
    fn watch_children(&self, dir: &str) -> ElectionResult<UnboundedReceiver<WatchEvent>>;

    /// Remove the node at `path`.
    fn delete(&self, path: &str) -> ElectionResult<()>;
}

/// Sequence number of a sequential node name, if it carries one.
pub fn sequence_of(node: &str) -> Option<u64> {
    let (_, suffix) = node.rsplit_once('_')?;
    if suffix.len() != SEQUENCE_WIDTH {
        return None;
    }
    suffix.parse().ok()
}

/// Format a sequential node name.
pub fn sequential_name(prefix: &str, sequence: u64) -> String {
    format!("{}_{:0width$}", prefix, sequence, width = SEQUENCE_WIDTH)
}

/// Check that `path` is absolute with no empty segments.
pub fn validate_path(path: &str) -> ElectionResult<()> {
    if !path.starts_with('/') {
        return Err(ElectionError::InvalidPath(format!("{} is not absolute", path)));
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err(ElectionError::InvalidPath(format!("{} has a trailing slash", path)));
    }
    if path.len() > 1 && path[1..].split('/').any(str::is_empty) {
        return Err(ElectionError::InvalidPath(format!("{} has an empty segment", path)));
    }
    Ok(())
}

/// Check that `prefix` can name a single node: non-empty, no `/`.
pub fn validate_node_prefix(prefix: &str) -> ElectionResult<()> {
    if prefix.is_empty() {
        return Err(ElectionError::InvalidPath("empty node prefix".to_string()));
    }
    if prefix.contains('/') {
        return Err(ElectionError::InvalidPath(format!("{} contains '/'", prefix)));
    }
    Ok(())
}

/// Split a node path into its parent directory and node name.
pub fn split_node_path(path: &str) -> ElectionResult<(&str, &str)> {
    match path.rsplit_once('/') {
        Some((dir, name)) if !dir.is_empty() && !name.is_empty() => Ok((dir, name)),
        _ => Err(ElectionError::InvalidPath(path.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_round_trip() {
        let name = sequential_name("globalservice", 42);
        assert_eq!(name, "globalservice_0000000042");
        assert_eq!(sequence_of(&name), Some(42));
    }

    #[test]
    fn test_sequence_rejects_unsuffixed() {
        assert_eq!(sequence_of("globalservice"), None);
        assert_eq!(sequence_of("host_12"), None);
    }

    #[test]
    fn test_label_with_underscores() {
        let name = sequential_name("host_a_1", 7);
        assert_eq!(sequence_of(&name), Some(7));
    }

    #[test]
    fn test_validate_path() {
        assert!(validate_path("/db/leaders/globalservice").is_ok());
        assert!(validate_path("db/leaders").is_err());
        assert!(validate_path("/db//leaders").is_err());
        assert!(validate_path("/db/leaders/").is_err());
    }

    #[test]
    fn test_validate_node_prefix() {
        assert!(validate_node_prefix("host_a").is_ok());
        assert!(validate_node_prefix("").is_err());
        assert!(validate_node_prefix("rack1/host-a").is_err());
    }

    #[test]
    fn test_split_node_path() {
        let (dir, name) = split_node_path("/db/leaders/gs_0000000001").unwrap();
        assert_eq!(dir, "/db/leaders");
        assert_eq!(name, "gs_0000000001");
        assert!(split_node_path("noslash").is_err());
    }
}
