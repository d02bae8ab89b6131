//! Client and service traits.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::CreateMode;
use crate::NodeStat;
use crate::ServiceError;
use crate::ServiceEvent;
use crate::SessionId;

/// One session's handle to the hierarchical coordination namespace.
///
/// Reads taking a `watch` flag arm a one-shot watch atomically with the read:
/// any qualifying mutation applied after the read is reported on the
/// session's event stream exactly once. Watches are per session and
/// deduplicated by (path, kind).
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Session this client belongs to.
    fn session_id(&self) -> SessionId;

    /// Create a node and return its actual path (with the sequence suffix for
    /// sequential modes).
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, ServiceError>;

    /// Delete a node. `None` matches any version.
    async fn delete(&self, path: &str, expected_version: Option<u32>) -> Result<(), ServiceError>;

    /// Stat a node, optionally arming a node watch (fires on create, delete
    /// or data change).
    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>, ServiceError>;

    /// List child names sorted by name, optionally arming a children watch.
    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, ServiceError>;

    /// Read a node's payload, optionally arming a node watch.
    async fn get_data(&self, path: &str, watch: bool) -> Result<(Vec<u8>, NodeStat), ServiceError>;

    /// Replace a node's payload. `None` matches any version.
    async fn set_data(&self, path: &str, data: Vec<u8>, expected_version: Option<u32>)
    -> Result<NodeStat, ServiceError>;

    /// Close the session. The service deletes its ephemeral nodes.
    async fn close(&self) -> Result<(), ServiceError>;
}

/// An open session: the client handle plus its asynchronous event stream.
pub struct Connection {
    /// Request handle for the session.
    pub client: Arc<dyn CoordinationClient>,
    /// Session state changes and fired watches, in service order.
    pub events: mpsc::UnboundedReceiver<ServiceEvent>,
}

/// Entry point to a coordination service.
#[async_trait]
pub trait CoordinationService: Send + Sync {
    /// Open a new session.
    async fn connect(&self) -> Result<Connection, ServiceError>;
}

// Blanket implementation for Arc<T>
#[async_trait]
impl<T: CoordinationService + ?Sized> CoordinationService for Arc<T> {
    async fn connect(&self) -> Result<Connection, ServiceError> {
        (**self).connect().await
    }
}
