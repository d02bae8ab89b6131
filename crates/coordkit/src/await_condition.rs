//! Blocking on a condition over service state.
//!
//! Every wait in the crate goes through [`await_until`]: register a waiter in
//! the session's dispatch table, read the current state while arming a
//! one-shot service watch, and block until the watch fires, the deadline
//! passes or the session terminates. A fired watch only means "something
//! changed"; the state is always re-read and re-tested.

use async_trait::async_trait;
use coordkit_service::NodeStat;
use tokio::time::Instant;
use tracing::trace;

use crate::error::CoordinationResult;
use crate::error::ServiceResultExt;
use crate::session::SessionContext;
use crate::session::WatchKey;

/// Outcome of [`await_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited<S> {
    /// The condition held for this state.
    Satisfied(S),
    /// The deadline passed first.
    TimedOut,
}

impl<S> Awaited<S> {
    /// Returns true if the condition held.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, Awaited::Satisfied(_))
    }

    /// The satisfying state, if any.
    pub fn into_state(self) -> Option<S> {
        match self {
            Awaited::Satisfied(state) => Some(state),
            Awaited::TimedOut => None,
        }
    }
}

/// One atomic read that also arms a one-shot watch.
#[async_trait]
pub trait Probe: Send + Sync {
    /// State returned by the read.
    type State: Send;

    /// Dispatch table key the armed watch resolves.
    fn watch_key(&self) -> WatchKey;

    /// Read the current state and arm the watch.
    async fn read_and_watch(&self, session: &SessionContext) -> CoordinationResult<Self::State>;
}

/// Child names of a node, waking on child-list changes.
#[derive(Debug, Clone)]
pub struct ChildrenProbe {
    path: String,
}

impl ChildrenProbe {
    /// Probe the children of `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Probe for ChildrenProbe {
    type State = Vec<String>;

    fn watch_key(&self) -> WatchKey {
        WatchKey::children(&self.path)
    }

    async fn read_and_watch(&self, session: &SessionContext) -> CoordinationResult<Vec<String>> {
        session.client().get_children(&self.path, true).await.or_unavailable(session.session_id(), "read children")
    }
}

/// Existence of a node, waking on its creation, deletion or data change.
#[derive(Debug, Clone)]
pub struct ExistsProbe {
    path: String,
}

impl ExistsProbe {
    /// Probe the existence of `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Probe for ExistsProbe {
    type State = Option<NodeStat>;

    fn watch_key(&self) -> WatchKey {
        WatchKey::node(&self.path)
    }

    async fn read_and_watch(&self, session: &SessionContext) -> CoordinationResult<Option<NodeStat>> {
        session.client().exists(&self.path, true).await.or_unavailable(session.session_id(), "check node")
    }
}

/// Block until `is_satisfied` holds for the probed state.
///
/// Returns `Awaited::TimedOut` once `deadline` passes (never for `None`), and
/// an error if the session expires (`SessionExpired`) or is closed
/// (`Cancelled`) while waiting. Dropping the future removes its waiter from
/// the dispatch table.
pub async fn await_until<P, F>(
    session: &SessionContext,
    probe: &P,
    mut is_satisfied: F,
    deadline: Option<Instant>,
) -> CoordinationResult<Awaited<P::State>>
where
    P: Probe + ?Sized,
    F: FnMut(&P::State) -> bool + Send,
{
    loop {
        session.check_connected()?;

        // Register before reading so an event fired after the read cannot be
        // dispatched ahead of the waiter.
        let mut registration = session.register(probe.watch_key());
        let state = probe.read_and_watch(session).await?;
        if is_satisfied(&state) {
            return Ok(Awaited::Satisfied(state));
        }
        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Ok(Awaited::TimedOut);
        }

        tokio::select! {
            fired = registration.fired() => match fired {
                Some(event) => trace!(path = %event.path, kind = ?event.kind, "condition watch fired"),
                None => return Err(session.termination_error("await condition")),
            },
            _ = sleep_until(deadline) => return Ok(Awaited::TimedOut),
            _ = session.terminated() => return Err(session.termination_error("await condition")),
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Deadline `timeout` from now.
pub(crate) fn deadline_after(timeout: std::time::Duration) -> Instant {
    Instant::now() + timeout
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use coordkit_service::CreateMode;
    use coordkit_testing::InMemoryCoordinationService;

    use super::*;
    use crate::CoordinationConfig;
    use crate::CoordinationError;

    async fn connect(service: &Arc<InMemoryCoordinationService>) -> Arc<SessionContext> {
        SessionContext::connect(service, CoordinationConfig::default()).await.unwrap()
    }

    /// Mutates the watched node right after the first read, before the
    /// waiter blocks.
    struct MutateAfterRead {
        inner: ChildrenProbe,
        writer: Arc<SessionContext>,
        reads: AtomicU32,
    }

    #[async_trait]
    impl Probe for MutateAfterRead {
        type State = Vec<String>;

        fn watch_key(&self) -> WatchKey {
            self.inner.watch_key()
        }

        async fn read_and_watch(&self, session: &SessionContext) -> CoordinationResult<Vec<String>> {
            let state = self.inner.read_and_watch(session).await?;
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                self.writer.client().create("/w/child", Vec::new(), CreateMode::Persistent).await.unwrap();
            }
            Ok(state)
        }
    }

    #[tokio::test]
    async fn already_satisfied_returns_immediately() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let result = await_until(&session, &ExistsProbe::new("/"), |stat| stat.is_some(), None).await.unwrap();
        assert!(result.is_satisfied());
        assert_eq!(session.pending_watches(), 0);
    }

    #[tokio::test]
    async fn mutation_between_read_and_wait_is_not_lost() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;
        let writer = connect(&service).await;
        session.ensure_path("/w").await.unwrap();

        let probe = MutateAfterRead {
            inner: ChildrenProbe::new("/w"),
            writer,
            reads: AtomicU32::new(0),
        };
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            await_until(&session, &probe, |children| !children.is_empty(), None),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(result, Awaited::Satisfied(vec!["child".to_string()]));
        assert_eq!(probe.reads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn times_out_without_change() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let deadline = deadline_after(Duration::from_millis(50));
        let result = await_until(&session, &ExistsProbe::new("/never"), |stat| stat.is_some(), Some(deadline))
            .await
            .unwrap();
        assert_eq!(result, Awaited::TimedOut);
        assert_eq!(session.pending_watches(), 0);
    }

    #[tokio::test]
    async fn wakes_on_creation_by_other_session() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;
        let other = connect(&service).await;

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                await_until(&session, &ExistsProbe::new("/flag"), |stat| stat.is_some(), None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        other.client().create("/flag", Vec::new(), CreateMode::Persistent).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap().unwrap();
        assert!(result.is_satisfied());
    }

    #[tokio::test]
    async fn expiry_interrupts_waiter() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                await_until(&session, &ExistsProbe::new("/flag"), |stat| stat.is_some(), None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        service.expire_session(session.session_id());

        let err = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap().unwrap_err();
        assert!(err.is_session_expired());
    }

    #[tokio::test]
    async fn local_close_cancels_waiter() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let waiter = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                await_until(&session, &ExistsProbe::new("/flag"), |stat| stat.is_some(), None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.close().await.unwrap();

        let err = tokio::time::timeout(Duration::from_secs(5), waiter).await.unwrap().unwrap().unwrap_err();
        assert!(matches!(err, CoordinationError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn dropped_future_leaves_no_waiter() {
        let service = InMemoryCoordinationService::new();
        let session = connect(&service).await;

        let probe = ExistsProbe::new("/flag");
        let wait = await_until(&session, &probe, |stat| stat.is_some(), None);
        assert!(tokio::time::timeout(Duration::from_millis(20), wait).await.is_err());
        assert_eq!(session.pending_watches(), 0);
    }
}
