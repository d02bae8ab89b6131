//! Blocking consumers.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::DistributedQueue;
use crate::await_condition::Awaited;
use crate::await_condition::ChildrenProbe;
use crate::await_condition::await_until;
use crate::await_condition::deadline_after;
use crate::codec::Codec;
use crate::error::CoordinationResult;
use crate::pure::sorted_entries;

impl<T, C> DistributedQueue<T, C>
where
    T: Send + Sync,
    C: Codec<T>,
{
    /// Dequeue the head, waiting until an entry is available.
    pub async fn take(&self) -> CoordinationResult<T> {
        loop {
            if let Some(item) = self.poll().await? {
                return Ok(item);
            }
            self.wait_for_entry(None).await?;
        }
    }

    /// Dequeue the head, waiting at most `timeout`. `None` on timeout.
    pub async fn poll_timeout(&self, timeout: Duration) -> CoordinationResult<Option<T>> {
        let deadline = deadline_after(timeout);
        loop {
            if let Some(item) = self.poll().await? {
                return Ok(Some(item));
            }
            if !self.wait_for_entry(Some(deadline)).await? {
                debug!(queue = %self.name, "poll timed out");
                return Ok(None);
            }
        }
    }

    /// Wait until the queue has at least one entry. `false` on timeout.
    async fn wait_for_entry(&self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        let probe = ChildrenProbe::new(self.path.clone());
        let outcome = await_until(&self.session, &probe, |children| !sorted_entries(children).is_empty(), deadline).await?;
        Ok(matches!(outcome, Awaited::Satisfied(_)))
    }
}
