//! Fair distributed mutual exclusion.
//!
//! Competitors register `lock-NNNNNNNNNN` nodes under `{lock_root}/{name}`
//! and are served strictly in registration order. A holder that crashes (or
//! whose session expires) loses its ephemeral node, which hands the lock to
//! the next competitor.
//!
//! ```ignore
//! let lock = ExclusiveLock::new(session, "deploy").await?;
//! lock.lock().await?;
//! // critical section
//! lock.unlock().await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use coordkit_service::path;
use tokio::sync::Mutex;

use crate::await_condition::deadline_after;
use crate::competitor::CompetitorKind;
use crate::competitor::OrderedCompetitor;
use crate::constants::LOCK_PREFIX;
use crate::error::CoordinationResult;
use crate::error::validate_name;
use crate::session::SessionContext;

/// The single competitor kind of an exclusive lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExclusiveKind;

impl CompetitorKind for ExclusiveKind {
    fn prefix(self) -> &'static str {
        LOCK_PREFIX
    }

    fn parse(name: &str) -> Option<(Self, u64)> {
        match path::split_sequence(name)? {
            (LOCK_PREFIX, sequence) => Some((ExclusiveKind, sequence)),
            _ => None,
        }
    }

    fn blocks(self, _other: Self) -> bool {
        true
    }
}

/// Fair, reentrant-per-instance distributed mutex.
pub struct ExclusiveLock {
    name: String,
    competitor: Mutex<OrderedCompetitor<ExclusiveKind>>,
}

impl ExclusiveLock {
    /// Bind a lock named `name` under the session's `lock_root`.
    pub async fn new(session: Arc<SessionContext>, name: &str) -> CoordinationResult<Self> {
        validate_name(name)?;
        let namespace = path::join(&session.config().lock_root, name);
        let competitor = OrderedCompetitor::new(session, namespace, ExclusiveKind).await?;
        Ok(Self {
            name: name.to_string(),
            competitor: Mutex::new(competitor),
        })
    }

    /// Lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is held.
    ///
    /// Returns immediately if this instance already holds it; one
    /// [`unlock`](Self::unlock) releases it either way.
    pub async fn lock(&self) -> CoordinationResult<()> {
        self.competitor.lock().await.acquire(None).await?;
        Ok(())
    }

    /// Acquire only if no one else holds or waits for the lock.
    pub async fn try_lock(&self) -> CoordinationResult<bool> {
        self.competitor.lock().await.try_acquire().await
    }

    /// Acquire within `timeout`. Returns `false` on timeout.
    pub async fn try_lock_for(&self, timeout: Duration) -> CoordinationResult<bool> {
        let deadline = deadline_after(timeout);
        self.competitor.lock().await.acquire(Some(deadline)).await
    }

    /// Release the lock. A no-op if not held.
    pub async fn unlock(&self) -> CoordinationResult<()> {
        self.competitor.lock().await.release().await
    }

    /// Returns true if this instance holds the lock.
    pub async fn is_held(&self) -> bool {
        self.competitor.lock().await.is_held()
    }
}
