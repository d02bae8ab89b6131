//! Capacity-checked queue.
//!
//! The capacity check reads the entry count and then creates an entry; the
//! two steps are not atomic, so concurrent producers on different sessions
//! may briefly overshoot the capacity. Consumers are unaffected.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::debug;

use super::CoordinationQueue;
use super::DistributedQueue;
use crate::await_condition::Awaited;
use crate::await_condition::ChildrenProbe;
use crate::await_condition::await_until;
use crate::await_condition::deadline_after;
use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::pure::has_capacity;
use crate::pure::remaining_capacity;
use crate::pure::sorted_entries;
use crate::session::SessionContext;

/// Distributed FIFO queue holding at most `capacity` entries.
pub struct BoundedQueue<T, C = JsonCodec<T>> {
    queue: DistributedQueue<T, C>,
    capacity: u32,
}

impl<T> BoundedQueue<T, JsonCodec<T>>
where T: Serialize + DeserializeOwned + Send + Sync
{
    /// Bind a JSON-encoded queue named `name` with room for `capacity`
    /// entries.
    pub async fn new(session: Arc<SessionContext>, name: &str, capacity: u32) -> CoordinationResult<Self> {
        Self::with_codec(session, name, capacity, JsonCodec::new()).await
    }
}

impl<T, C> BoundedQueue<T, C>
where
    T: Send + Sync,
    C: Codec<T>,
{
    /// Bind a bounded queue using `codec` for payloads.
    pub async fn with_codec(
        session: Arc<SessionContext>,
        name: &str,
        capacity: u32,
        codec: C,
    ) -> CoordinationResult<Self> {
        if capacity == 0 {
            return Err(CoordinationError::InvalidName {
                name: name.to_string(),
                reason: "capacity must be at least 1".to_string(),
            });
        }
        let queue = DistributedQueue::with_codec(session, name, codec).await?;
        Ok(Self { queue, capacity })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// The underlying unbounded queue, for consumer operations not on
    /// [`CoordinationQueue`].
    pub fn inner(&self) -> &DistributedQueue<T, C> {
        &self.queue
    }

    /// Enqueue if there is room. Returns `false` if full.
    pub async fn offer(&self, item: &T) -> CoordinationResult<bool> {
        if !has_capacity(self.queue.size().await?, self.capacity) {
            debug!(queue = %self.queue.name(), capacity = self.capacity, "queue full");
            return Ok(false);
        }
        self.queue.enqueue(item).await?;
        Ok(true)
    }

    /// Enqueue, failing with `CapacityExceeded` if full.
    pub async fn add(&self, item: &T) -> CoordinationResult<()> {
        if self.offer(item).await? {
            Ok(())
        } else {
            Err(CoordinationError::CapacityExceeded {
                name: self.queue.name().to_string(),
                capacity: self.capacity,
            })
        }
    }

    /// Enqueue, waiting until there is room.
    pub async fn put(&self, item: &T) -> CoordinationResult<()> {
        loop {
            if self.offer(item).await? {
                return Ok(());
            }
            self.wait_for_room(None).await?;
        }
    }

    /// Enqueue, waiting at most `timeout` for room. Returns `false` on
    /// timeout.
    pub async fn offer_timeout(&self, item: &T, timeout: Duration) -> CoordinationResult<bool> {
        let deadline = deadline_after(timeout);
        loop {
            if self.offer(item).await? {
                return Ok(true);
            }
            if !self.wait_for_room(Some(deadline)).await? {
                return Ok(false);
            }
        }
    }

    /// Free slots left.
    pub async fn remaining_capacity(&self) -> CoordinationResult<u32> {
        Ok(remaining_capacity(self.queue.size().await?, self.capacity))
    }

    /// Dequeue the head, or `None` if the queue is empty.
    pub async fn poll(&self) -> CoordinationResult<Option<T>> {
        self.queue.poll().await
    }

    /// Dequeue the head, failing with `NoSuchElement` if empty.
    pub async fn remove(&self) -> CoordinationResult<T> {
        self.queue.remove().await
    }

    /// Dequeue the head, waiting until an entry is available.
    pub async fn take(&self) -> CoordinationResult<T> {
        self.queue.take().await
    }

    /// Dequeue the head, waiting at most `timeout`. `None` on timeout.
    pub async fn poll_timeout(&self, timeout: Duration) -> CoordinationResult<Option<T>> {
        self.queue.poll_timeout(timeout).await
    }

    /// Read the head without removing it.
    pub async fn peek(&self) -> CoordinationResult<Option<T>> {
        self.queue.peek().await
    }

    /// Number of entries.
    pub async fn size(&self) -> CoordinationResult<u32> {
        self.queue.size().await
    }

    /// Returns true if the queue has no entries.
    pub async fn is_empty(&self) -> CoordinationResult<bool> {
        self.queue.is_empty().await
    }

    /// Dequeue up to `max` entries without blocking; see [`DistributedQueue::drain_to`].
    pub async fn drain_to(&self, max: u32) -> CoordinationResult<Vec<T>> {
        self.queue.drain_to(max).await
    }

    async fn wait_for_room(&self, deadline: Option<Instant>) -> CoordinationResult<bool> {
        let probe = ChildrenProbe::new(self.queue.path().to_string());
        let capacity = self.capacity;
        let outcome = await_until(
            &self.queue.session,
            &probe,
            |children| has_capacity(sorted_entries(children).len() as u32, capacity),
            deadline,
        )
        .await?;
        Ok(matches!(outcome, Awaited::Satisfied(_)))
    }
}

#[async_trait]
impl<T, C> CoordinationQueue<T> for BoundedQueue<T, C>
where
    T: Send + Sync,
    C: Codec<T>,
{
    async fn offer(&self, item: &T) -> CoordinationResult<bool> {
        BoundedQueue::offer(self, item).await
    }

    async fn add(&self, item: &T) -> CoordinationResult<()> {
        BoundedQueue::add(self, item).await
    }

    async fn put(&self, item: &T) -> CoordinationResult<()> {
        BoundedQueue::put(self, item).await
    }

    async fn poll(&self) -> CoordinationResult<Option<T>> {
        self.queue.poll().await
    }

    async fn remove(&self) -> CoordinationResult<T> {
        self.queue.remove().await
    }

    async fn take(&self) -> CoordinationResult<T> {
        self.queue.take().await
    }

    async fn poll_timeout(&self, timeout: Duration) -> CoordinationResult<Option<T>> {
        self.queue.poll_timeout(timeout).await
    }

    async fn peek(&self) -> CoordinationResult<Option<T>> {
        self.queue.peek().await
    }

    async fn size(&self) -> CoordinationResult<u32> {
        self.queue.size().await
    }

    async fn drain_to(&self, max: u32) -> CoordinationResult<Vec<T>> {
        self.queue.drain_to(max).await
    }

    async fn remaining_capacity(&self) -> CoordinationResult<Option<u32>> {
        BoundedQueue::remaining_capacity(self).await.map(Some)
    }
}
