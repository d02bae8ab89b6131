//! Errors returned by the coordination service boundary.

use thiserror::Error;

/// Errors returned by a [`CoordinationClient`](crate::CoordinationClient).
///
/// `NodeExists` and `NoNode` are ordinary outcomes of racing clients; callers
/// decide per call site whether they are benign.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// A non-sequential create targeted a path that already exists.
    #[error("node '{path}' already exists")]
    NodeExists { path: String },
    /// The node (or the parent of a node being created) does not exist.
    #[error("node '{path}' does not exist")]
    NoNode { path: String },
    /// A delete targeted a node that still has children.
    #[error("node '{path}' has children")]
    NotEmpty { path: String },
    /// The expected version did not match the node's version.
    #[error("version mismatch on '{path}': expected {expected}, actual {actual}")]
    BadVersion { path: String, expected: u32, actual: u32 },
    /// Ephemeral nodes cannot have children.
    #[error("ephemeral node '{path}' cannot have children")]
    NoChildrenForEphemerals { path: String },
    /// The path is syntactically invalid.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
    /// The session is temporarily disconnected from the service.
    #[error("connection to coordination service lost")]
    ConnectionLoss,
    /// The session expired; its ephemeral nodes are gone.
    #[error("session expired")]
    SessionExpired,
    /// The session was closed by its owner.
    #[error("session closed")]
    SessionClosed,
    /// Any other backend failure.
    #[error("operation failed: {reason}")]
    Failed { reason: String },
}

impl ServiceError {
    /// Returns true for `NodeExists`.
    pub fn is_node_exists(&self) -> bool {
        matches!(self, ServiceError::NodeExists { .. })
    }

    /// Returns true for `NoNode`.
    pub fn is_no_node(&self) -> bool {
        matches!(self, ServiceError::NoNode { .. })
    }
}
