//! Session context: client handle, session state and watch dispatch.
//!
//! A [`SessionContext`] owns one service session. A background task reads the
//! session's event stream and
//!
//! - tracks [`SessionState`] (published on a tokio `watch` channel),
//! - resolves pending watch waiters through the dispatch table, keyed by
//!   `(path, WatchKind)` and mapping to single-fire `oneshot` completions.
//!
//! Expiry fails every pending waiter and makes the context permanently
//! unusable. There is no reconnection after expiry.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use coordkit_service::Connection;
use coordkit_service::CoordinationClient;
use coordkit_service::CoordinationService;
use coordkit_service::CreateMode;
use coordkit_service::EventKind;
use coordkit_service::ServiceEvent;
use coordkit_service::SessionEvent;
use coordkit_service::SessionId;
use coordkit_service::WatchedEvent;
use coordkit_service::path;
use parking_lot::Mutex;
use snafu::ResultExt;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::CoordinationConfig;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::error::ServiceResultExt;
use crate::error::UnavailableSnafu;

/// Lifecycle of a session as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Waiting for the first `Connected` event.
    Connecting,
    /// Requests may be issued.
    Connected,
    /// Connection lost; the service may still reconnect the session.
    Disconnected,
    /// The service expired the session (terminal).
    Expired,
    /// Closed locally (terminal).
    Closed,
}

impl SessionState {
    /// Convert the state to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Disconnected => "disconnected",
            SessionState::Expired => "expired",
            SessionState::Closed => "closed",
        }
    }

    /// Returns true for `Expired` and `Closed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Expired | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a watch observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Creation, deletion or data change of the node itself.
    Node,
    /// Changes to the node's child list (and deletion of the node).
    Children,
}

/// Dispatch table key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    /// Watched path.
    pub path: String,
    /// Watched aspect.
    pub kind: WatchKind,
}

impl WatchKey {
    /// Key for a node watch on `path`.
    pub fn node(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: WatchKind::Node,
        }
    }

    /// Key for a children watch on `path`.
    pub fn children(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind: WatchKind::Children,
        }
    }

    /// Keys woken by a fired service watch.
    pub fn woken_by(event: &WatchedEvent) -> Vec<WatchKey> {
        match event.kind {
            EventKind::NodeDeleted => vec![WatchKey::node(&event.path), WatchKey::children(&event.path)],
            EventKind::NodeCreated | EventKind::NodeDataChanged => vec![WatchKey::node(&event.path)],
            EventKind::NodeChildrenChanged => vec![WatchKey::children(&event.path)],
        }
    }
}

type Waiters = Vec<(u64, oneshot::Sender<WatchedEvent>)>;

/// Pending watch waiters of one session.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    next_id: AtomicU64,
    closed: AtomicBool,
    table: Mutex<HashMap<WatchKey, Waiters>>,
}

impl WatchRegistry {
    fn register(self: &Arc<Self>, key: WatchKey) -> WatchRegistration {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut table = self.table.lock();
            // A closed registry drops the sender, so the waiter sees termination.
            if !self.closed.load(Ordering::Acquire) {
                table.entry(key.clone()).or_default().push((id, tx));
            }
        }
        WatchRegistration {
            registry: Arc::clone(self),
            key,
            id,
            rx,
        }
    }

    fn remove(&self, key: &WatchKey, id: u64) {
        let mut table = self.table.lock();
        if let Some(waiters) = table.get_mut(key) {
            waiters.retain(|(waiter, _)| *waiter != id);
            if waiters.is_empty() {
                table.remove(key);
            }
        }
    }

    /// Resolve every waiter woken by `event`. Returns the number woken.
    fn dispatch(&self, event: &WatchedEvent) -> usize {
        let mut woken = 0;
        let mut table = self.table.lock();
        for key in WatchKey::woken_by(event) {
            for (_, tx) in table.remove(&key).unwrap_or_default() {
                if tx.send(event.clone()).is_ok() {
                    woken += 1;
                }
            }
        }
        woken
    }

    /// Drop every pending waiter and refuse new ones.
    fn fail_all(&self) {
        let mut table = self.table.lock();
        self.closed.store(true, Ordering::Release);
        table.clear();
    }

    pub(crate) fn pending(&self) -> usize {
        self.table.lock().values().map(Vec::len).sum()
    }
}

/// A single-fire wait on the dispatch table.
///
/// Dropping the registration removes it from the table.
pub struct WatchRegistration {
    registry: Arc<WatchRegistry>,
    key: WatchKey,
    id: u64,
    rx: oneshot::Receiver<WatchedEvent>,
}

impl WatchRegistration {
    /// The key this registration waits on.
    pub fn key(&self) -> &WatchKey {
        &self.key
    }

    /// Wait until the watch fires. Returns `None` if the session terminated
    /// first.
    pub async fn fired(&mut self) -> Option<WatchedEvent> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for WatchRegistration {
    fn drop(&mut self) {
        self.registry.remove(&self.key, self.id);
    }
}

impl fmt::Debug for WatchRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchRegistration").field("key", &self.key).field("id", &self.id).finish()
    }
}

/// One service session shared by any number of primitives.
pub struct SessionContext {
    client: Arc<dyn CoordinationClient>,
    config: CoordinationConfig,
    watches: Arc<WatchRegistry>,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl SessionContext {
    /// Open a session and wait for it to connect.
    ///
    /// Fails with `ConnectTimeout` if no `Connected` event arrives within
    /// `config.connect_timeout_ms`.
    pub async fn connect<S>(service: &S, config: CoordinationConfig) -> CoordinationResult<Arc<Self>>
    where S: CoordinationService + ?Sized {
        let connection = service.connect().await.context(UnavailableSnafu { operation: "connect" })?;
        let timeout = config.connect_timeout();
        let timeout_ms = config.connect_timeout_ms;
        let session = Self::from_connection(connection, config);

        let mut state_rx = session.state.subscribe();
        let waited = tokio::time::timeout(timeout, state_rx.wait_for(|state| *state != SessionState::Connecting))
            .await
            .map(|changed| changed.is_ok());
        if waited.is_err() {
            let _ = session.close().await;
            return Err(CoordinationError::ConnectTimeout { timeout_ms });
        }

        session.check_connected()?;
        info!(session = %session.session_id(), "session connected");
        Ok(session)
    }

    /// Wrap an already open connection.
    ///
    /// Spawns the event-loop task, so this must be called within a tokio
    /// runtime.
    pub fn from_connection(connection: Connection, config: CoordinationConfig) -> Arc<Self> {
        let Connection { client, events } = connection;
        let watches = Arc::new(WatchRegistry::default());
        let (state, _) = watch::channel(SessionState::Connecting);
        let state = Arc::new(state);
        let shutdown = CancellationToken::new();

        let dispatcher = tokio::spawn(run_event_loop(
            client.session_id(),
            events,
            Arc::clone(&state),
            Arc::clone(&watches),
            shutdown.clone(),
        ));

        Arc::new(Self {
            client,
            config,
            watches,
            state,
            shutdown,
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    /// The session's client handle.
    pub fn client(&self) -> &Arc<dyn CoordinationClient> {
        &self.client
    }

    /// The service-assigned session id.
    pub fn session_id(&self) -> SessionId {
        self.client.session_id()
    }

    /// Configuration this session was opened with.
    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Fail fast unless the session is connected.
    pub fn check_connected(&self) -> CoordinationResult<()> {
        match self.state() {
            SessionState::Connected => Ok(()),
            SessionState::Expired => Err(CoordinationError::SessionExpired {
                session_id: self.session_id(),
            }),
            SessionState::Closed => Err(CoordinationError::Destroyed {
                primitive: "session",
                name: self.session_id().to_string(),
            }),
            state => Err(CoordinationError::NotConnected { state }),
        }
    }

    /// Close the session. The service deletes its ephemeral nodes.
    ///
    /// Idempotent; closing an expired session only stops the event loop.
    pub async fn close(&self) -> CoordinationResult<()> {
        let mut closed_now = false;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = SessionState::Closed;
            closed_now = true;
            true
        });
        self.watches.fail_all();
        self.shutdown.cancel();
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }

        if closed_now {
            info!(session = %self.session_id(), "closing session");
            self.client.close().await.or_unavailable(self.session_id(), "close session")?;
        }
        Ok(())
    }

    /// Resolves once the session expired or was closed.
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await
    }

    /// The error reported to a waiter interrupted by session termination.
    pub(crate) fn termination_error(&self, operation: &str) -> CoordinationError {
        match self.state() {
            SessionState::Expired => CoordinationError::SessionExpired {
                session_id: self.session_id(),
            },
            SessionState::Closed => CoordinationError::Cancelled {
                operation: operation.to_string(),
            },
            state => CoordinationError::NotConnected { state },
        }
    }

    /// Add a waiter to the dispatch table.
    pub fn register(&self, key: WatchKey) -> WatchRegistration {
        self.watches.register(key)
    }

    /// Number of waiters currently in the dispatch table.
    pub fn pending_watches(&self) -> usize {
        self.watches.pending()
    }

    /// Create `node_path` and any missing ancestors as persistent nodes,
    /// tolerating concurrent creation.
    pub async fn ensure_path(&self, node_path: &str) -> CoordinationResult<()> {
        path::validate(node_path).or_unavailable(self.session_id(), "ensure path")?;
        let mut current = String::new();
        for component in node_path.split('/').skip(1) {
            current.push('/');
            current.push_str(component);
            if self.client.exists(&current, false).await.or_unavailable(self.session_id(), "ensure path")?.is_some() {
                continue;
            }
            match self.client.create(&current, Vec::new(), CreateMode::Persistent).await {
                Ok(_) => debug!(path = %current, "created namespace node"),
                Err(err) if err.is_node_exists() => {}
                Err(err) => return Err(CoordinationError::from_service(err, self.session_id(), "ensure path")),
            }
        }
        Ok(())
    }
}

impl Drop for SessionContext {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.state().is_terminal() {
            return;
        }
        // Best effort: release ephemerals if a runtime is still around.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let client = Arc::clone(&self.client);
            handle.spawn(async move {
                if let Err(err) = client.close().await {
                    warn!(error = %err, "failed to close dropped session");
                }
            });
        }
    }
}

impl fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionContext")
            .field("session_id", &self.session_id())
            .field("state", &self.state())
            .finish()
    }
}

async fn run_event_loop(
    session_id: SessionId,
    mut events: mpsc::UnboundedReceiver<ServiceEvent>,
    state: Arc<watch::Sender<SessionState>>,
    watches: Arc<WatchRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };

        match event {
            Some(ServiceEvent::Watch(event)) => {
                let woken = watches.dispatch(&event);
                debug!(session = %session_id, path = %event.path, kind = ?event.kind, woken, "watch fired");
            }
            Some(ServiceEvent::Session(SessionEvent::Connected)) => {
                set_live_state(&state, SessionState::Connected);
            }
            Some(ServiceEvent::Session(SessionEvent::Disconnected)) => {
                set_live_state(&state, SessionState::Disconnected);
                warn!(session = %session_id, "session disconnected");
            }
            Some(ServiceEvent::Session(SessionEvent::Expired)) => {
                state.send_if_modified(|current| {
                    if current.is_terminal() {
                        return false;
                    }
                    *current = SessionState::Expired;
                    true
                });
                warn!(session = %session_id, "session expired");
                break;
            }
            None => {
                // Event stream ended without an expiry: treat as closed.
                state.send_if_modified(|current| {
                    if current.is_terminal() {
                        return false;
                    }
                    *current = SessionState::Closed;
                    true
                });
                debug!(session = %session_id, "session event stream ended");
                break;
            }
        }
    }

    watches.fail_all();
    shutdown.cancel();
}

fn set_live_state(state: &watch::Sender<SessionState>, next: SessionState) {
    state.send_if_modified(|current| {
        if current.is_terminal() || *current == next {
            return false;
        }
        *current = next;
        true
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coordkit_testing::InMemoryCoordinationService;

    use super::*;

    async fn connect(service: &Arc<InMemoryCoordinationService>) -> Arc<SessionContext> {
        SessionContext::connect(service, CoordinationConfig::default()).await.unwrap()
    }

    #[test]
    fn deletion_wakes_node_and_children_waiters() {
        let keys = WatchKey::woken_by(&WatchedEvent::new(EventKind::NodeDeleted, "/a"));
        assert_eq!(keys, vec![WatchKey::node("/a"), WatchKey::children("/a")]);
        let keys = WatchKey::woken_by(&WatchedEvent::new(EventKind::NodeChildrenChanged, "/a"));
        assert_eq!(keys, vec![WatchKey::children("/a")]);
    }

    #[tokio::test]
    async fn connect_reaches_connected() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;
        assert_eq!(session.state(), SessionState::Connected);
        assert!(session.check_connected().is_ok());
    }

    #[tokio::test]
    async fn dropped_registration_leaves_table() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let registration = session.register(WatchKey::children("/"));
        assert_eq!(session.pending_watches(), 1);
        drop(registration);
        assert_eq!(session.pending_watches(), 0);
    }

    #[tokio::test]
    async fn watch_event_resolves_registration() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let mut registration = session.register(WatchKey::children("/"));
        session.client().get_children("/", true).await.unwrap();
        session.client().create("/x", Vec::new(), CreateMode::Persistent).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), registration.fired()).await.unwrap();
        assert_eq!(event, Some(WatchedEvent::new(EventKind::NodeChildrenChanged, "/")));
        assert_eq!(session.pending_watches(), 0);
    }

    #[tokio::test]
    async fn expiry_fails_waiters_and_is_terminal() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let mut registration = session.register(WatchKey::node("/nothing"));
        service.expire_session(session.session_id());

        let fired = tokio::time::timeout(Duration::from_secs(5), registration.fired()).await.unwrap();
        assert_eq!(fired, None);
        tokio::time::timeout(Duration::from_secs(5), session.terminated()).await.unwrap();
        assert_eq!(session.state(), SessionState::Expired);
        assert!(session.check_connected().unwrap_err().is_session_expired());

        let mut late = session.register(WatchKey::node("/nothing"));
        assert_eq!(late.fired().await, None);
    }

    #[tokio::test]
    async fn disconnect_fails_fast_then_recovers() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;
        let mut states = session.subscribe();

        service.disconnect_session(session.session_id());
        states.wait_for(|s| *s == SessionState::Disconnected).await.unwrap();
        assert!(matches!(session.check_connected(), Err(CoordinationError::NotConnected { .. })));

        service.reconnect_session(session.session_id());
        states.wait_for(|s| *s == SessionState::Connected).await.unwrap();
        assert!(session.check_connected().is_ok());
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reaps_ephemerals() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        session.client().create("/e", Vec::new(), CreateMode::Ephemeral).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert!(!service.node_exists("/e"));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.check_connected(), Err(CoordinationError::Destroyed { .. })));
    }

    #[tokio::test]
    async fn ensure_path_creates_ancestors() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        session.ensure_path("/a/b/c").await.unwrap();
        session.ensure_path("/a/b/c").await.unwrap();
        assert!(service.node_exists("/a"));
        assert!(service.node_exists("/a/b/c"));
    }
}
