//! Node, session and event types shared by clients and backends.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Identifier of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

/// How a node is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// Survives the creating session.
    Persistent,
    /// Survives the creating session; name gets a sequence suffix.
    PersistentSequential,
    /// Deleted when the creating session ends.
    Ephemeral,
    /// Deleted when the creating session ends; name gets a sequence suffix.
    EphemeralSequential,
}

impl CreateMode {
    /// Returns true if the node is owned by its session.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, CreateMode::Ephemeral | CreateMode::EphemeralSequential)
    }

    /// Returns true if the service appends a sequence suffix.
    pub fn is_sequential(self) -> bool {
        matches!(self, CreateMode::PersistentSequential | CreateMode::EphemeralSequential)
    }
}

/// Metadata returned alongside node reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStat {
    /// Data version, incremented on every `set_data`.
    pub version: u32,
    /// Service-wide creation order of the node.
    pub created_revision: u64,
    /// Number of live children.
    pub num_children: u32,
    /// Owning session for ephemeral nodes.
    pub ephemeral_owner: Option<SessionId>,
}

/// Session state transitions reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The session is (re)connected and may issue requests.
    Connected,
    /// The session lost its connection; it may still reconnect.
    Disconnected,
    /// The session is gone for good; its ephemeral nodes were deleted.
    Expired,
}

/// Mutation that fired a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A watched (via `exists`) path was created.
    NodeCreated,
    /// A watched node was deleted.
    NodeDeleted,
    /// A watched node's data changed.
    NodeDataChanged,
    /// The child list of a watched node changed.
    NodeChildrenChanged,
}

/// A fired one-shot watch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WatchedEvent {
    /// What happened.
    pub kind: EventKind,
    /// The watched path.
    pub path: String,
}

impl WatchedEvent {
    /// Create a new watched event.
    pub fn new(kind: EventKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }
}

/// Notification delivered on a session's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    /// Session state changed.
    Session(SessionEvent),
    /// A watch armed by this session fired.
    Watch(WatchedEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_mode_flags() {
        assert!(CreateMode::EphemeralSequential.is_ephemeral());
        assert!(CreateMode::EphemeralSequential.is_sequential());
        assert!(!CreateMode::Persistent.is_ephemeral());
        assert!(!CreateMode::Persistent.is_sequential());
        assert!(CreateMode::PersistentSequential.is_sequential());
        assert!(CreateMode::Ephemeral.is_ephemeral());
    }

    #[test]
    fn session_id_display_is_hex() {
        assert_eq!(SessionId(255).to_string(), "0x00000000000000ff");
    }
}
