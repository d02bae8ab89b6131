//! Distributed FIFO queue over persistent sequential nodes.
//!
//! Each entry is an `entry-NNNNNNNNNN` node under `{queue_root}/{name}`
//! holding a codec-encoded payload. Producers create entries; consumers take
//! the smallest live sequence with read-then-delete. Whoever deletes an entry
//! owns it, so racing consumers receive each entry exactly once; a consumer
//! that loses the race moves on to the next entry.
//!
//! - [`DistributedQueue`]: unbounded, non-blocking and blocking operations
//! - [`BoundedQueue`]: capacity-checked producers on top of it

mod blocking;
mod bounded;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
pub use bounded::BoundedQueue;
use coordkit_service::CreateMode;
use coordkit_service::path;
use serde::Serialize;
use serde::de::DeserializeOwned;
use snafu::ResultExt;
use tracing::debug;
use tracing::warn;

use crate::codec::Codec;
use crate::codec::JsonCodec;
use crate::constants::ENTRY_PREFIX;
use crate::constants::MAX_DRAIN_BATCH;
use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::error::DecodeSnafu;
use crate::error::EncodeSnafu;
use crate::error::ServiceResultExt;
use crate::error::validate_name;
use crate::pure::sorted_entries;
use crate::session::SessionContext;

/// Operations shared by unbounded and bounded queues.
#[async_trait]
pub trait CoordinationQueue<T: Send + Sync>: Send + Sync {
    /// Enqueue if there is room. Returns `false` if full.
    async fn offer(&self, item: &T) -> CoordinationResult<bool>;

    /// Enqueue, failing with `CapacityExceeded` if full.
    async fn add(&self, item: &T) -> CoordinationResult<()>;

    /// Enqueue, waiting for room if full.
    async fn put(&self, item: &T) -> CoordinationResult<()>;

    /// Dequeue the head, or `None` if empty.
    async fn poll(&self) -> CoordinationResult<Option<T>>;

    /// Dequeue the head, failing with `NoSuchElement` if empty.
    async fn remove(&self) -> CoordinationResult<T>;

    /// Dequeue the head, waiting for an entry.
    async fn take(&self) -> CoordinationResult<T>;

    /// Dequeue the head, waiting at most `timeout`.
    async fn poll_timeout(&self, timeout: Duration) -> CoordinationResult<Option<T>>;

    /// Read the head without removing it.
    async fn peek(&self) -> CoordinationResult<Option<T>>;

    /// Number of entries.
    async fn size(&self) -> CoordinationResult<u32>;

    /// Dequeue up to `max` entries without blocking, capped at
    /// `MAX_DRAIN_BATCH`.
    async fn drain_to(&self, max: u32) -> CoordinationResult<Vec<T>>;

    /// Free slots, or `None` for an unbounded queue.
    async fn remaining_capacity(&self) -> CoordinationResult<Option<u32>>;
}

/// Unbounded distributed FIFO queue.
pub struct DistributedQueue<T, C = JsonCodec<T>> {
    session: Arc<SessionContext>,
    name: String,
    path: String,
    codec: C,
    _item: PhantomData<fn() -> T>,
}

impl<T> DistributedQueue<T, JsonCodec<T>>
where T: Serialize + DeserializeOwned + Send + Sync
{
    /// Bind a JSON-encoded queue named `name` under the session's
    /// `queue_root`.
    pub async fn new(session: Arc<SessionContext>, name: &str) -> CoordinationResult<Self> {
        Self::with_codec(session, name, JsonCodec::new()).await
    }
}

impl<T, C> DistributedQueue<T, C>
where
    T: Send + Sync,
    C: Codec<T>,
{
    /// Bind a queue using `codec` for payloads.
    pub async fn with_codec(session: Arc<SessionContext>, name: &str, codec: C) -> CoordinationResult<Self> {
        validate_name(name)?;
        session.check_connected()?;
        let queue_path = path::join(&session.config().queue_root, name);
        session.ensure_path(&queue_path).await?;
        Ok(Self {
            session,
            name: name.to_string(),
            path: queue_path,
            codec,
            _item: PhantomData,
        })
    }

    /// Queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the queue node.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append an item. Returns the entry's path.
    pub async fn enqueue(&self, item: &T) -> CoordinationResult<String> {
        self.session.check_connected()?;
        let requested = path::join(&self.path, ENTRY_PREFIX);
        let data = self.codec.encode(item).context(EncodeSnafu { path: requested.clone() })?;
        let entry = self
            .session
            .client()
            .create(&requested, data, CreateMode::PersistentSequential)
            .await
            .or_unavailable(self.session.session_id(), "enqueue")?;
        debug!(queue = %self.name, entry = %entry, "enqueued");
        Ok(entry)
    }

    /// Append every item in order.
    pub async fn add_all(&self, items: &[T]) -> CoordinationResult<()> {
        for item in items {
            self.enqueue(item).await?;
        }
        Ok(())
    }

    /// Dequeue the head, or `None` if the queue is empty.
    pub async fn poll(&self) -> CoordinationResult<Option<T>> {
        self.session.check_connected()?;
        loop {
            let entries = self.entries().await?;
            if entries.is_empty() {
                return Ok(None);
            }
            for entry in &entries {
                if let Some(item) = self.consume(entry).await? {
                    return Ok(Some(item));
                }
            }
            // Every entry in the snapshot was taken by someone else.
            debug!(queue = %self.name, "snapshot exhausted, listing again");
        }
    }

    /// Dequeue the head, failing with `NoSuchElement` if empty.
    pub async fn remove(&self) -> CoordinationResult<T> {
        self.poll().await?.ok_or_else(|| self.no_such_element())
    }

    /// Read the head without removing it.
    pub async fn peek(&self) -> CoordinationResult<Option<T>> {
        self.session.check_connected()?;
        loop {
            let entries = self.entries().await?;
            if entries.is_empty() {
                return Ok(None);
            }
            for entry in &entries {
                if let Some(item) = self.read(entry).await? {
                    return Ok(Some(item));
                }
            }
        }
    }

    /// Read the head, failing with `NoSuchElement` if empty.
    pub async fn element(&self) -> CoordinationResult<T> {
        self.peek().await?.ok_or_else(|| self.no_such_element())
    }

    /// Number of entries.
    pub async fn size(&self) -> CoordinationResult<u32> {
        self.session.check_connected()?;
        Ok(self.entries().await?.len() as u32)
    }

    /// Returns true if the queue has no entries.
    pub async fn is_empty(&self) -> CoordinationResult<bool> {
        Ok(self.size().await? == 0)
    }

    /// All items in FIFO order, without removing them. Entries removed while
    /// reading are skipped.
    pub async fn snapshot(&self) -> CoordinationResult<Vec<T>> {
        self.session.check_connected()?;
        let mut items = Vec::new();
        for entry in self.entries().await? {
            if let Some(item) = self.read(&entry).await? {
                items.push(item);
            }
        }
        Ok(items)
    }

    /// Dequeue up to `max` entries from one snapshot, in FIFO order. Never
    /// blocks; entries taken by others are skipped.
    ///
    /// `max` is capped at `MAX_DRAIN_BATCH`; call again to drain more. An
    /// entry that fails to decode is removed and skipped.
    pub async fn drain_to(&self, max: u32) -> CoordinationResult<Vec<T>> {
        self.session.check_connected()?;
        let max = max.min(MAX_DRAIN_BATCH) as usize;
        let mut items = Vec::new();
        if max == 0 {
            return Ok(items);
        }
        for entry in self.entries().await? {
            match self.consume(&entry).await {
                Ok(Some(item)) => items.push(item),
                Ok(None) => {}
                Err(err @ CoordinationError::Decode { .. }) => {
                    warn!(queue = %self.name, entry = %entry, error = %err, "dropping undecodable entry");
                }
                Err(err) => return Err(err),
            }
            if items.len() >= max {
                break;
            }
        }
        debug!(queue = %self.name, drained = items.len(), "drained");
        Ok(items)
    }

    /// Dequeue everything present now, at most `MAX_DRAIN_BATCH` entries per
    /// call. Loop until it returns an empty batch to empty a larger queue.
    pub async fn drain_all(&self) -> CoordinationResult<Vec<T>> {
        self.drain_to(MAX_DRAIN_BATCH).await
    }

    /// Remove every entry present now. Returns the number removed.
    pub async fn clear(&self) -> CoordinationResult<u32> {
        self.session.check_connected()?;
        let mut removed = 0u32;
        for entry in self.entries().await? {
            let entry_path = path::join(&self.path, &entry);
            match self.session.client().delete(&entry_path, None).await {
                Ok(()) => removed = removed.saturating_add(1),
                Err(err) if err.is_no_node() => {}
                Err(err) => return Err(CoordinationError::from_service(err, self.session.session_id(), "clear queue")),
            }
        }
        debug!(queue = %self.name, removed, "cleared");
        Ok(removed)
    }

    /// Sorted entry names.
    async fn entries(&self) -> CoordinationResult<Vec<String>> {
        let children = self
            .session
            .client()
            .get_children(&self.path, false)
            .await
            .or_unavailable(self.session.session_id(), "list queue")?;
        Ok(sorted_entries(&children))
    }

    /// Read an entry's payload. `None` if it is gone.
    async fn read(&self, entry: &str) -> CoordinationResult<Option<T>> {
        let entry_path = path::join(&self.path, entry);
        let data = match self.session.client().get_data(&entry_path, false).await {
            Ok((data, _)) => data,
            Err(err) if err.is_no_node() => return Ok(None),
            Err(err) => return Err(CoordinationError::from_service(err, self.session.session_id(), "read entry")),
        };
        self.codec.decode(&data).map(Some).context(DecodeSnafu { path: entry_path })
    }

    /// Read then delete an entry. `None` if another consumer got it first.
    async fn consume(&self, entry: &str) -> CoordinationResult<Option<T>> {
        let entry_path = path::join(&self.path, entry);
        let data = match self.session.client().get_data(&entry_path, false).await {
            Ok((data, _)) => data,
            Err(err) if err.is_no_node() => return Ok(None),
            Err(err) => return Err(CoordinationError::from_service(err, self.session.session_id(), "read entry")),
        };
        match self.session.client().delete(&entry_path, None).await {
            Ok(()) => {}
            Err(err) if err.is_no_node() => return Ok(None),
            Err(err) => return Err(CoordinationError::from_service(err, self.session.session_id(), "remove entry")),
        }
        debug!(queue = %self.name, entry, "dequeued");
        self.codec.decode(&data).map(Some).context(DecodeSnafu { path: entry_path })
    }

    fn no_such_element(&self) -> CoordinationError {
        CoordinationError::NoSuchElement {
            name: self.name.clone(),
        }
    }
}

#[async_trait]
impl<T, C> CoordinationQueue<T> for DistributedQueue<T, C>
where
    T: Send + Sync,
    C: Codec<T>,
{
    async fn offer(&self, item: &T) -> CoordinationResult<bool> {
        self.enqueue(item).await?;
        Ok(true)
    }

    async fn add(&self, item: &T) -> CoordinationResult<()> {
        self.enqueue(item).await?;
        Ok(())
    }

    async fn put(&self, item: &T) -> CoordinationResult<()> {
        self.enqueue(item).await?;
        Ok(())
    }

    async fn poll(&self) -> CoordinationResult<Option<T>> {
        DistributedQueue::poll(self).await
    }

    async fn remove(&self) -> CoordinationResult<T> {
        DistributedQueue::remove(self).await
    }

    async fn take(&self) -> CoordinationResult<T> {
        DistributedQueue::take(self).await
    }

    async fn poll_timeout(&self, timeout: Duration) -> CoordinationResult<Option<T>> {
        DistributedQueue::poll_timeout(self, timeout).await
    }

    async fn peek(&self) -> CoordinationResult<Option<T>> {
        DistributedQueue::peek(self).await
    }

    async fn size(&self) -> CoordinationResult<u32> {
        DistributedQueue::size(self).await
    }

    async fn drain_to(&self, max: u32) -> CoordinationResult<Vec<T>> {
        DistributedQueue::drain_to(self, max).await
    }

    async fn remaining_capacity(&self) -> CoordinationResult<Option<u32>> {
        Ok(None)
    }
}
