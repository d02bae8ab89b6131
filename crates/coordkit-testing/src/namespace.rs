//! Synchronous namespace state behind the in-memory service lock.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;

use coordkit_service::CreateMode;
use coordkit_service::EventKind;
use coordkit_service::NodeStat;
use coordkit_service::ServiceError;
use coordkit_service::ServiceEvent;
use coordkit_service::SessionEvent;
use coordkit_service::SessionId;
use coordkit_service::WatchedEvent;
use coordkit_service::path;
use tokio::sync::mpsc;
use tracing::debug;

struct Node {
    data: Vec<u8>,
    version: u32,
    created_revision: u64,
    ephemeral_owner: Option<SessionId>,
    children: BTreeSet<String>,
    next_sequence: u64,
}

impl Node {
    fn new(data: Vec<u8>, created_revision: u64, ephemeral_owner: Option<SessionId>) -> Self {
        Self {
            data,
            version: 0,
            created_revision,
            ephemeral_owner,
            children: BTreeSet::new(),
            next_sequence: 0,
        }
    }

    fn stat(&self) -> NodeStat {
        NodeStat {
            version: self.version,
            created_revision: self.created_revision,
            num_children: self.children.len() as u32,
            ephemeral_owner: self.ephemeral_owner,
        }
    }
}

struct SessionEntry {
    events: mpsc::UnboundedSender<ServiceEvent>,
    connected: bool,
    ephemerals: BTreeSet<String>,
}

/// Namespace, sessions and armed watches.
pub(crate) struct Namespace {
    nodes: BTreeMap<String, Node>,
    sessions: HashMap<SessionId, SessionEntry>,
    ended: HashMap<SessionId, ServiceError>,
    node_watches: HashMap<String, HashSet<SessionId>>,
    child_watches: HashMap<String, HashSet<SessionId>>,
    next_session: u64,
    revision: u64,
}

impl Namespace {
    pub(crate) fn new() -> Self {
        let mut nodes = BTreeMap::new();
        nodes.insert(path::ROOT.to_string(), Node::new(Vec::new(), 0, None));
        Self {
            nodes,
            sessions: HashMap::new(),
            ended: HashMap::new(),
            node_watches: HashMap::new(),
            child_watches: HashMap::new(),
            next_session: 1,
            revision: 0,
        }
    }

    // ------------------------------------------------------------------
    // Sessions
    // ------------------------------------------------------------------

    pub(crate) fn open_session(&mut self) -> (SessionId, mpsc::UnboundedReceiver<ServiceEvent>) {
        let id = SessionId(self.next_session);
        self.next_session += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServiceEvent::Session(SessionEvent::Connected));
        self.sessions.insert(id, SessionEntry {
            events: tx,
            connected: true,
            ephemerals: BTreeSet::new(),
        });
        debug!(session = %id, "session opened");
        (id, rx)
    }

    /// End a session, deleting its ephemeral nodes. `reason` is what later
    /// requests on the session fail with.
    pub(crate) fn end_session(&mut self, id: SessionId, reason: ServiceError) -> bool {
        let Some(entry) = self.sessions.remove(&id) else {
            return false;
        };
        for watchers in self.node_watches.values_mut().chain(self.child_watches.values_mut()) {
            watchers.remove(&id);
        }
        // Children sort after their parents, so delete deepest paths first.
        for node_path in entry.ephemerals.iter().rev() {
            self.remove_node(node_path);
        }
        if matches!(reason, ServiceError::SessionExpired) {
            let _ = entry.events.send(ServiceEvent::Session(SessionEvent::Expired));
        }
        debug!(session = %id, reason = %reason, "session ended");
        self.ended.insert(id, reason);
        true
    }

    pub(crate) fn set_connected(&mut self, id: SessionId, connected: bool) -> bool {
        let Some(entry) = self.sessions.get_mut(&id) else {
            return false;
        };
        if entry.connected != connected {
            entry.connected = connected;
            let event = if connected {
                SessionEvent::Connected
            } else {
                SessionEvent::Disconnected
            };
            let _ = entry.events.send(ServiceEvent::Session(event));
        }
        true
    }

    pub(crate) fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn check_session(&self, id: SessionId) -> Result<(), ServiceError> {
        match self.sessions.get(&id) {
            Some(entry) if entry.connected => Ok(()),
            Some(_) => Err(ServiceError::ConnectionLoss),
            None => Err(self.ended.get(&id).cloned().unwrap_or(ServiceError::SessionClosed)),
        }
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    pub(crate) fn create(
        &mut self,
        session: SessionId,
        requested: &str,
        data: Vec<u8>,
        mode: CreateMode,
    ) -> Result<String, ServiceError> {
        self.check_session(session)?;
        path::validate(requested)?;

        let parent_path = path::parent(requested)
            .ok_or_else(|| ServiceError::NodeExists {
                path: requested.to_string(),
            })?
            .to_string();
        let parent = self.nodes.get_mut(&parent_path).ok_or_else(|| ServiceError::NoNode {
            path: parent_path.clone(),
        })?;
        if parent.ephemeral_owner.is_some() {
            return Err(ServiceError::NoChildrenForEphemerals { path: parent_path });
        }

        let actual = if mode.is_sequential() {
            path::with_sequence(requested, parent.next_sequence)
        } else {
            requested.to_string()
        };
        path::validate(&actual)?;
        if parent.children.contains(path::name(&actual)) {
            return Err(ServiceError::NodeExists { path: actual });
        }

        if mode.is_sequential() {
            parent.next_sequence += 1;
        }
        parent.children.insert(path::name(&actual).to_string());

        self.revision += 1;
        let owner = mode.is_ephemeral().then_some(session);
        self.nodes.insert(actual.clone(), Node::new(data, self.revision, owner));
        if let Some(owner) = owner
            && let Some(entry) = self.sessions.get_mut(&owner)
        {
            entry.ephemerals.insert(actual.clone());
        }

        self.fire_node(&actual, EventKind::NodeCreated);
        self.fire_children(&parent_path);
        Ok(actual)
    }

    pub(crate) fn delete(
        &mut self,
        session: SessionId,
        node_path: &str,
        expected_version: Option<u32>,
    ) -> Result<(), ServiceError> {
        self.check_session(session)?;
        self.delete_checked(node_path, expected_version)
    }

    /// Delete on behalf of no session (fault injection).
    pub(crate) fn delete_checked(&mut self, node_path: &str, expected_version: Option<u32>) -> Result<(), ServiceError> {
        let node = self.nodes.get(node_path).ok_or_else(|| ServiceError::NoNode {
            path: node_path.to_string(),
        })?;
        if node_path == path::ROOT || !node.children.is_empty() {
            return Err(ServiceError::NotEmpty {
                path: node_path.to_string(),
            });
        }
        if let Some(expected) = expected_version
            && expected != node.version
        {
            return Err(ServiceError::BadVersion {
                path: node_path.to_string(),
                expected,
                actual: node.version,
            });
        }
        self.remove_node(node_path);
        Ok(())
    }

    pub(crate) fn exists(
        &mut self,
        session: SessionId,
        node_path: &str,
        watch: bool,
    ) -> Result<Option<NodeStat>, ServiceError> {
        self.check_session(session)?;
        path::validate(node_path)?;
        if watch {
            self.node_watches.entry(node_path.to_string()).or_default().insert(session);
        }
        Ok(self.nodes.get(node_path).map(Node::stat))
    }

    pub(crate) fn get_children(
        &mut self,
        session: SessionId,
        node_path: &str,
        watch: bool,
    ) -> Result<Vec<String>, ServiceError> {
        self.check_session(session)?;
        let node = self.nodes.get(node_path).ok_or_else(|| ServiceError::NoNode {
            path: node_path.to_string(),
        })?;
        let children = node.children.iter().cloned().collect();
        if watch {
            self.child_watches.entry(node_path.to_string()).or_default().insert(session);
        }
        Ok(children)
    }

    pub(crate) fn get_data(
        &mut self,
        session: SessionId,
        node_path: &str,
        watch: bool,
    ) -> Result<(Vec<u8>, NodeStat), ServiceError> {
        self.check_session(session)?;
        let node = self.nodes.get(node_path).ok_or_else(|| ServiceError::NoNode {
            path: node_path.to_string(),
        })?;
        let result = (node.data.clone(), node.stat());
        if watch {
            self.node_watches.entry(node_path.to_string()).or_default().insert(session);
        }
        Ok(result)
    }

    pub(crate) fn set_data(
        &mut self,
        session: SessionId,
        node_path: &str,
        data: Vec<u8>,
        expected_version: Option<u32>,
    ) -> Result<NodeStat, ServiceError> {
        self.check_session(session)?;
        let node = self.nodes.get_mut(node_path).ok_or_else(|| ServiceError::NoNode {
            path: node_path.to_string(),
        })?;
        if let Some(expected) = expected_version
            && expected != node.version
        {
            return Err(ServiceError::BadVersion {
                path: node_path.to_string(),
                expected,
                actual: node.version,
            });
        }
        node.data = data;
        node.version = node.version.wrapping_add(1);
        let stat = node.stat();
        self.fire_node(node_path, EventKind::NodeDataChanged);
        Ok(stat)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub(crate) fn children(&self, node_path: &str) -> Vec<String> {
        self.nodes
            .get(node_path)
            .map(|node| node.children.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn data(&self, node_path: &str) -> Option<Vec<u8>> {
        self.nodes.get(node_path).map(|node| node.data.clone())
    }

    pub(crate) fn contains(&self, node_path: &str) -> bool {
        self.nodes.contains_key(node_path)
    }

    pub(crate) fn watcher_count(&self, node_path: &str) -> usize {
        let node = self.node_watches.get(node_path).map_or(0, HashSet::len);
        let children = self.child_watches.get(node_path).map_or(0, HashSet::len);
        node + children
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn remove_node(&mut self, node_path: &str) {
        let Some(node) = self.nodes.remove(node_path) else {
            return;
        };
        if let Some(owner) = node.ephemeral_owner
            && let Some(entry) = self.sessions.get_mut(&owner)
        {
            entry.ephemerals.remove(node_path);
        }
        let parent_path = path::parent(node_path).map(str::to_string);
        if let Some(parent_path) = &parent_path
            && let Some(parent) = self.nodes.get_mut(parent_path)
        {
            parent.children.remove(path::name(node_path));
        }

        self.fire_node(node_path, EventKind::NodeDeleted);
        if let Some(watchers) = self.child_watches.remove(node_path) {
            self.notify(watchers, EventKind::NodeDeleted, node_path);
        }
        if let Some(parent_path) = parent_path {
            self.fire_children(&parent_path);
        }
    }

    fn fire_node(&mut self, node_path: &str, kind: EventKind) {
        if let Some(watchers) = self.node_watches.remove(node_path) {
            self.notify(watchers, kind, node_path);
        }
    }

    fn fire_children(&mut self, node_path: &str) {
        if let Some(watchers) = self.child_watches.remove(node_path) {
            self.notify(watchers, EventKind::NodeChildrenChanged, node_path);
        }
    }

    fn notify(&self, watchers: HashSet<SessionId>, kind: EventKind, node_path: &str) {
        for session in watchers {
            if let Some(entry) = self.sessions.get(&session) {
                let _ = entry.events.send(ServiceEvent::Watch(WatchedEvent::new(kind, node_path)));
            }
        }
    }
}
