//! In-memory coordination service and its session clients.

use std::sync::Arc;

use async_trait::async_trait;
use coordkit_service::Connection;
use coordkit_service::CoordinationClient;
use coordkit_service::CoordinationService;
use coordkit_service::CreateMode;
use coordkit_service::NodeStat;
use coordkit_service::ServiceError;
use coordkit_service::SessionId;
use parking_lot::Mutex;

use crate::namespace::Namespace;

/// Deterministic in-memory coordination service for tests.
///
/// Cheap to share: every session opened through [`CoordinationService::connect`]
/// talks to the same namespace.
pub struct InMemoryCoordinationService {
    inner: Arc<Mutex<Namespace>>,
}

impl InMemoryCoordinationService {
    /// Create an empty service containing only the root node.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Arc::new(Mutex::new(Namespace::new())),
        })
    }

    /// Expire a session: its ephemeral nodes are deleted and it receives an
    /// `Expired` event. Returns false if the session was not live.
    pub fn expire_session(&self, session: SessionId) -> bool {
        self.inner.lock().end_session(session, ServiceError::SessionExpired)
    }

    /// Drop a session's connection. Requests fail with `ConnectionLoss` until
    /// [`reconnect_session`](Self::reconnect_session).
    pub fn disconnect_session(&self, session: SessionId) -> bool {
        self.inner.lock().set_connected(session, false)
    }

    /// Restore a disconnected session.
    pub fn reconnect_session(&self, session: SessionId) -> bool {
        self.inner.lock().set_connected(session, true)
    }

    /// Delete a node as if another party did it.
    pub fn force_delete(&self, path: &str) -> Result<(), ServiceError> {
        self.inner.lock().delete_checked(path, None)
    }

    /// Sorted child names of a node (empty if it does not exist).
    pub fn children(&self, path: &str) -> Vec<String> {
        self.inner.lock().children(path)
    }

    /// Raw payload of a node.
    pub fn data(&self, path: &str) -> Option<Vec<u8>> {
        self.inner.lock().data(path)
    }

    /// Returns true if the node exists.
    pub fn node_exists(&self, path: &str) -> bool {
        self.inner.lock().contains(path)
    }

    /// Number of sessions with a watch armed on `path`.
    pub fn watch_count(&self, path: &str) -> usize {
        self.inner.lock().watcher_count(path)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.inner.lock().session_count()
    }
}

#[async_trait]
impl CoordinationService for InMemoryCoordinationService {
    async fn connect(&self) -> Result<Connection, ServiceError> {
        let (session, events) = self.inner.lock().open_session();
        let client = InMemoryClient {
            session,
            inner: Arc::clone(&self.inner),
        };
        Ok(Connection {
            client: Arc::new(client),
            events,
        })
    }
}

/// A session handle on an [`InMemoryCoordinationService`].
pub struct InMemoryClient {
    session: SessionId,
    inner: Arc<Mutex<Namespace>>,
}

#[async_trait]
impl CoordinationClient for InMemoryClient {
    fn session_id(&self) -> SessionId {
        self.session
    }

    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<String, ServiceError> {
        self.inner.lock().create(self.session, path, data, mode)
    }

    async fn delete(&self, path: &str, expected_version: Option<u32>) -> Result<(), ServiceError> {
        self.inner.lock().delete(self.session, path, expected_version)
    }

    async fn exists(&self, path: &str, watch: bool) -> Result<Option<NodeStat>, ServiceError> {
        self.inner.lock().exists(self.session, path, watch)
    }

    async fn get_children(&self, path: &str, watch: bool) -> Result<Vec<String>, ServiceError> {
        self.inner.lock().get_children(self.session, path, watch)
    }

    async fn get_data(&self, path: &str, watch: bool) -> Result<(Vec<u8>, NodeStat), ServiceError> {
        self.inner.lock().get_data(self.session, path, watch)
    }

    async fn set_data(
        &self,
        path: &str,
        data: Vec<u8>,
        expected_version: Option<u32>,
    ) -> Result<NodeStat, ServiceError> {
        self.inner.lock().set_data(self.session, path, data, expected_version)
    }

    async fn close(&self) -> Result<(), ServiceError> {
        let mut ns = self.inner.lock();
        // Closing twice is not an error.
        ns.end_session(self.session, ServiceError::SessionClosed);
        Ok(())
    }
}
