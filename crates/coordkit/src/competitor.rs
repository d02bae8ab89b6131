//! Ordered competition over sequential nodes.
//!
//! The shared algorithm behind every lock variant:
//!
//! 1. Register an ephemeral sequential node of the competitor's kind.
//! 2. Read the siblings and sort them by sequence.
//! 3. Find the nearest preceding sibling whose kind blocks ours. If there is
//!    none, the resource is held.
//! 4. Otherwise wait for that one sibling to disappear and go back to 2.
//!
//! Lock variants differ only in their [`CompetitorKind`].

use std::fmt;
use std::sync::Arc;

use coordkit_service::CreateMode;
use coordkit_service::path;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::await_condition::Awaited;
use crate::await_condition::ExistsProbe;
use crate::await_condition::await_until;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::error::ServiceResultExt;
use crate::pure::find_blocking_predecessor;
use crate::pure::is_registered;
use crate::pure::sort_siblings;
use crate::session::SessionContext;

/// Kinds of competitors sharing one namespace.
pub trait CompetitorKind: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Node name prefix for this kind.
    fn prefix(self) -> &'static str;

    /// Parse a sibling name into its kind and sequence.
    fn parse(name: &str) -> Option<(Self, u64)>;

    /// Returns true if a competitor of kind `self` must wait for an earlier
    /// competitor of kind `other`.
    fn blocks(self, other: Self) -> bool;
}

#[derive(Debug, Clone)]
struct Registration {
    path: String,
    name: String,
    sequence: u64,
}

/// One competitor's registration in a namespace.
///
/// Not internally synchronized: owners wrap it in a `tokio::sync::Mutex`.
pub struct OrderedCompetitor<K: CompetitorKind> {
    session: Arc<SessionContext>,
    namespace: String,
    kind: K,
    /// Set iff the resource is held.
    held: Option<Registration>,
}

impl<K: CompetitorKind> OrderedCompetitor<K> {
    /// Create a competitor in `namespace`, creating the namespace if needed.
    pub async fn new(session: Arc<SessionContext>, namespace: impl Into<String>, kind: K) -> CoordinationResult<Self> {
        let namespace = namespace.into();
        session.check_connected()?;
        session.ensure_path(&namespace).await?;
        Ok(Self {
            session,
            namespace,
            kind,
            held: None,
        })
    }

    /// Namespace path the competitor registers in.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The competitor's kind.
    pub fn kind(&self) -> K {
        self.kind
    }

    /// Returns true if the resource is held.
    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// Path of the node backing the held resource.
    pub fn node_path(&self) -> Option<&str> {
        self.held.as_ref().map(|r| r.path.as_str())
    }

    /// Compete until the resource is held or `deadline` passes.
    ///
    /// Returns `false` on timeout, after removing the registration. Acquiring
    /// while already holding returns `true` immediately.
    pub async fn acquire(&mut self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        self.session.check_connected()?;
        if self.held.is_some() {
            debug!(namespace = %self.namespace, kind = ?self.kind, "already held");
            return Ok(true);
        }

        let mut pending = PendingRegistration {
            session: Arc::clone(&self.session),
            registration: None,
        };
        let outcome = self.compete(&mut pending, deadline).await;
        let registration = pending.registration.take();

        match outcome {
            Ok(true) => {
                if let Some(registration) = registration {
                    info!(namespace = %self.namespace, node = %registration.name, "acquired");
                    self.held = Some(registration);
                }
                Ok(self.held.is_some())
            }
            Ok(false) => {
                debug!(namespace = %self.namespace, kind = ?self.kind, "acquire timed out");
                if let Some(registration) = registration {
                    self.delete_node(&registration.path).await?;
                }
                Ok(false)
            }
            Err(err) => {
                if let Some(registration) = registration
                    && let Err(cleanup) = self.delete_node(&registration.path).await
                {
                    warn!(node = %registration.path, error = %cleanup, "failed to remove registration");
                }
                Err(err)
            }
        }
    }

    /// Single attempt: `true` if the resource is free right now. Never arms a
    /// watch.
    pub async fn try_acquire(&mut self) -> CoordinationResult<bool> {
        self.acquire(Some(Instant::now())).await
    }

    /// Release the resource. Releasing when not held is a no-op.
    pub async fn release(&mut self) -> CoordinationResult<()> {
        if let Some(registration) = self.held.take() {
            self.delete_node(&registration.path).await?;
            info!(namespace = %self.namespace, node = %registration.name, "released");
        }
        Ok(())
    }

    async fn compete(&self, pending: &mut PendingRegistration, deadline: Option<Instant>) -> CoordinationResult<bool> {
        loop {
            let own = match &pending.registration {
                Some(registration) => registration.clone(),
                None => {
                    let registration = self.register().await?;
                    pending.registration = Some(registration.clone());
                    registration
                }
            };

            let children = self
                .session
                .client()
                .get_children(&self.namespace, false)
                .await
                .or_unavailable(self.session.session_id(), "list competitors")?;
            let siblings = sort_siblings::<K>(&children);

            if !is_registered(&siblings, &own.name) {
                debug!(namespace = %self.namespace, node = %own.name, "own node missing, registering again");
                pending.registration = None;
                continue;
            }

            let Some(predecessor) = find_blocking_predecessor(&siblings, own.sequence, self.kind) else {
                return Ok(true);
            };

            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                debug!(node = %own.name, predecessor = %predecessor.name, "blocked, not waiting");
                return Ok(false);
            }

            let predecessor_path = path::join(&self.namespace, &predecessor.name);
            debug!(node = %own.name, predecessor = %predecessor.name, "waiting for predecessor");
            let probe = ExistsProbe::new(predecessor_path);
            match await_until(&self.session, &probe, |stat| stat.is_none(), deadline).await? {
                Awaited::Satisfied(_) => continue,
                Awaited::TimedOut => return Ok(false),
            }
        }
    }

    async fn register(&self) -> CoordinationResult<Registration> {
        let requested = path::join(&self.namespace, self.kind.prefix());
        let actual = self
            .session
            .client()
            .create(&requested, Vec::new(), CreateMode::EphemeralSequential)
            .await
            .or_unavailable(self.session.session_id(), "register competitor")?;
        let name = path::name(&actual).to_string();
        let (_, sequence) = K::parse(&name).ok_or_else(|| CoordinationError::ProtocolViolation {
            reason: format!("service returned unparseable sequential node '{actual}'"),
        })?;
        debug!(node = %name, sequence, "registered competitor");
        Ok(Registration {
            path: actual,
            name,
            sequence,
        })
    }

    async fn delete_node(&self, node_path: &str) -> CoordinationResult<()> {
        match self.session.client().delete(node_path, None).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_no_node() => Ok(()),
            Err(err) => Err(CoordinationError::from_service(err, self.session.session_id(), "remove competitor")),
        }
    }
}

impl<K: CompetitorKind> fmt::Debug for OrderedCompetitor<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OrderedCompetitor")
            .field("namespace", &self.namespace)
            .field("kind", &self.kind)
            .field("held", &self.node_path())
            .finish()
    }
}

/// Registration created by an in-flight acquire.
///
/// If the acquire future is dropped, the node is removed in the background.
struct PendingRegistration {
    session: Arc<SessionContext>,
    registration: Option<Registration>,
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let session = Arc::clone(&self.session);
        handle.spawn(async move {
            match session.client().delete(&registration.path, None).await {
                Ok(()) => debug!(node = %registration.path, "removed abandoned registration"),
                Err(err) if err.is_no_node() => {}
                Err(err) => warn!(node = %registration.path, error = %err, "failed to remove abandoned registration"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coordkit_testing::InMemoryCoordinationService;

    use super::*;
    use crate::CoordinationConfig;
    use crate::lock::ExclusiveKind;

    async fn competitor(service: &Arc<InMemoryCoordinationService>) -> OrderedCompetitor<ExclusiveKind> {
        let session = SessionContext::connect(service, CoordinationConfig::default()).await.unwrap();
        OrderedCompetitor::new(session, "/c", ExclusiveKind).await.unwrap()
    }

    #[tokio::test]
    async fn first_competitor_holds() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;

        assert!(a.acquire(None).await.unwrap());
        assert!(a.is_held());
        assert_eq!(a.node_path(), Some("/c/lock-0000000000"));
        // Reentrant acquire reuses the node.
        assert!(a.acquire(None).await.unwrap());
        assert_eq!(service.children("/c").len(), 1);

        a.release().await.unwrap();
        assert!(!a.is_held());
        assert!(service.children("/c").is_empty());
    }

    #[tokio::test]
    async fn try_acquire_failure_removes_node() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.try_acquire().await.unwrap());
        assert!(!b.try_acquire().await.unwrap());
        assert_eq!(service.children("/c"), vec!["lock-0000000000".to_string()]);
    }

    #[tokio::test]
    async fn failed_try_acquire_arms_no_watch() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.try_acquire().await.unwrap());
        for _ in 0..3 {
            assert!(!b.try_acquire().await.unwrap());
        }
        assert_eq!(service.watch_count("/c/lock-0000000000"), 0);
        assert_eq!(b.session.pending_watches(), 0);
    }

    #[tokio::test]
    async fn timed_acquire_releases_on_timeout() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.acquire(None).await.unwrap());
        let deadline = Instant::now() + Duration::from_millis(50);
        assert!(!b.acquire(Some(deadline)).await.unwrap());
        assert_eq!(service.children("/c").len(), 1);
    }

    #[tokio::test]
    async fn waiter_acquires_after_release() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.acquire(None).await.unwrap());
        let waiter = tokio::spawn(async move {
            let acquired = b.acquire(None).await.unwrap();
            (acquired, b)
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        a.release().await.unwrap();
        let (acquired, b) = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap();
        assert!(acquired);
        assert!(b.is_held());
    }

    #[tokio::test]
    async fn externally_deleted_node_is_replaced() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.acquire(None).await.unwrap());
        let waiter = tokio::spawn(async move { b.acquire(None).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Deleting the holder's node hands the resource to the waiter.
        service.force_delete("/c/lock-0000000000").unwrap();
        assert!(tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn dropped_acquire_reaps_node() {
        let service = InMemoryCoordinationService::new();
        let mut a = competitor(&service).await;
        let mut b = competitor(&service).await;

        assert!(a.acquire(None).await.unwrap());
        assert!(tokio::time::timeout(Duration::from_millis(30), b.acquire(None)).await.is_err());

        for _ in 0..50 {
            if service.children("/c").len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.children("/c"), vec!["lock-0000000000".to_string()]);
        assert!(!b.is_held());
    }
}
