//! Fair distributed read/write lock.
//!
//! Readers (`read-NNNNNNNNNN`) and writers (`write-NNNNNNNNNN`) register in
//! one namespace under `{rwlock_root}/{name}` and share its sequence order:
//!
//! - a reader waits only for the nearest earlier writer,
//! - a writer waits for the nearest earlier node of either kind.
//!
//! A reader arriving after a waiting writer queues behind it, so writers are
//! never starved by a stream of readers.
//!
//! One `ReadWriteLock` instance holds at most one mode at a time: acquiring
//! write while holding read (or the reverse) fails with `ProtocolViolation`
//! before anything is registered.

mod guard;
mod types;

use std::sync::Arc;
use std::time::Duration;

use coordkit_service::path;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use self::guard::LockModeGuard;
pub use self::types::LockMode;
pub use self::types::RwKind;
use crate::await_condition::deadline_after;
use crate::competitor::OrderedCompetitor;
use crate::error::CoordinationResult;
use crate::error::validate_name;
use crate::session::SessionContext;

/// A distributed read/write lock.
pub struct ReadWriteLock {
    name: String,
    guard: Arc<LockModeGuard>,
    read: ReadLock,
    write: WriteLock,
}

impl ReadWriteLock {
    /// Bind a lock named `name` under the session's `rwlock_root`.
    pub async fn new(session: Arc<SessionContext>, name: &str) -> CoordinationResult<Self> {
        validate_name(name)?;
        let namespace = path::join(&session.config().rwlock_root, name);
        let guard = Arc::new(LockModeGuard::default());

        let read = OrderedCompetitor::new(Arc::clone(&session), namespace.clone(), RwKind::Read).await?;
        let write = OrderedCompetitor::new(session, namespace, RwKind::Write).await?;

        Ok(Self {
            name: name.to_string(),
            read: ReadLock(Side::new(name, read, Arc::clone(&guard))),
            write: WriteLock(Side::new(name, write, Arc::clone(&guard))),
            guard,
        })
    }

    /// Lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The shared side.
    pub fn read_lock(&self) -> &ReadLock {
        &self.read
    }

    /// The exclusive side.
    pub fn write_lock(&self) -> &WriteLock {
        &self.write
    }

    /// Mode currently held (or being acquired) by this instance.
    pub fn mode(&self) -> LockMode {
        self.guard.mode()
    }
}

/// One side (read or write) of a `ReadWriteLock`.
struct Side {
    name: String,
    guard: Arc<LockModeGuard>,
    competitor: Mutex<OrderedCompetitor<RwKind>>,
}

impl Side {
    fn new(name: &str, competitor: OrderedCompetitor<RwKind>, guard: Arc<LockModeGuard>) -> Self {
        Self {
            name: name.to_string(),
            guard,
            competitor: Mutex::new(competitor),
        }
    }

    async fn acquire(&self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        let mut competitor = self.competitor.lock().await;
        let mode = competitor.kind().mode();
        let previous = self.guard.claim(&self.name, mode)?;

        match competitor.acquire(deadline).await {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.guard.restore(previous);
                Ok(false)
            }
            Err(err) => {
                self.guard.restore(previous);
                Err(err)
            }
        }
    }

    async fn release(&self) -> CoordinationResult<()> {
        let mut competitor = self.competitor.lock().await;
        let mode = competitor.kind().mode();
        let result = competitor.release().await;
        self.guard.reset(mode);
        debug!(name = %self.name, mode = mode.as_str(), "unlocked");
        result
    }

    async fn is_held(&self) -> bool {
        self.competitor.lock().await.is_held()
    }
}

macro_rules! lock_side {
    ($(#[$meta:meta])* $handle:ident) => {
        $(#[$meta])*
        pub struct $handle(Side);

        impl $handle {
            /// Block until held. Returns immediately if this side is already held.
            pub async fn lock(&self) -> CoordinationResult<()> {
                self.0.acquire(None).await?;
                Ok(())
            }

            /// Acquire only if nothing blocking is registered before us.
            pub async fn try_lock(&self) -> CoordinationResult<bool> {
                self.0.acquire(Some(Instant::now())).await
            }

            /// Acquire within `timeout`. Returns `false` on timeout.
            pub async fn try_lock_for(&self, timeout: Duration) -> CoordinationResult<bool> {
                self.0.acquire(Some(deadline_after(timeout))).await
            }

            /// Release this side and reset the mode guard. A no-op if not held.
            pub async fn unlock(&self) -> CoordinationResult<()> {
                self.0.release().await
            }

            /// Returns true if this side is held.
            pub async fn is_held(&self) -> bool {
                self.0.is_held().await
            }
        }
    };
}

lock_side!(
    /// Shared side of a [`ReadWriteLock`].
    ReadLock
);
lock_side!(
    /// Exclusive side of a [`ReadWriteLock`].
    WriteLock
);

#[cfg(test)]
mod tests {
    use coordkit_testing::InMemoryCoordinationService;

    use super::*;
    use crate::CoordinationConfig;
    use crate::CoordinationError;

    async fn rwlock(service: &Arc<InMemoryCoordinationService>) -> ReadWriteLock {
        let session = SessionContext::connect(service, CoordinationConfig::default()).await.unwrap();
        ReadWriteLock::new(session, "table").await.unwrap()
    }

    #[tokio::test]
    async fn readers_share() {
        let service = InMemoryCoordinationService::new();
        let a = rwlock(&service).await;
        let b = rwlock(&service).await;

        a.read_lock().lock().await.unwrap();
        assert!(b.read_lock().try_lock().await.unwrap());
        assert_eq!(a.mode(), LockMode::Read);
        assert_eq!(b.mode(), LockMode::Read);
    }

    #[tokio::test]
    async fn writer_excludes_readers_and_writers() {
        let service = InMemoryCoordinationService::new();
        let a = rwlock(&service).await;
        let b = rwlock(&service).await;

        a.write_lock().lock().await.unwrap();
        assert!(!b.read_lock().try_lock().await.unwrap());
        assert!(!b.write_lock().try_lock().await.unwrap());
        assert_eq!(b.mode(), LockMode::None);

        a.write_lock().unlock().await.unwrap();
        assert!(b.read_lock().try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn upgrade_is_a_protocol_violation() {
        let service = InMemoryCoordinationService::new();
        let a = rwlock(&service).await;

        a.read_lock().lock().await.unwrap();
        let err = a.write_lock().lock().await.unwrap_err();
        assert!(matches!(err, CoordinationError::ProtocolViolation { .. }));
        // Nothing was registered for the rejected write.
        assert_eq!(service.children("/coordkit/rwlocks/table"), vec!["read-0000000000".to_string()]);

        a.read_lock().unlock().await.unwrap();
        assert_eq!(a.mode(), LockMode::None);
        a.write_lock().lock().await.unwrap();
        let err = a.read_lock().try_lock().await.unwrap_err();
        assert!(matches!(err, CoordinationError::ProtocolViolation { .. }));
    }

    #[tokio::test]
    async fn waiting_writer_blocks_later_readers() {
        let service = InMemoryCoordinationService::new();
        let reader = rwlock(&service).await;
        let writer = Arc::new(rwlock(&service).await);
        let late = rwlock(&service).await;

        reader.read_lock().lock().await.unwrap();
        let pending = {
            let writer = Arc::clone(&writer);
            tokio::spawn(async move { writer.write_lock().lock().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The late reader queues behind the waiting writer.
        assert!(!late.read_lock().try_lock().await.unwrap());

        reader.read_lock().unlock().await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), pending).await.unwrap().unwrap().unwrap();
        assert!(writer.write_lock().is_held().await);
    }
}
