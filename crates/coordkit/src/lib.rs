//! Distributed coordination recipes over a hierarchical coordination service.
//!
//! Every primitive here is built from the same small set of service
//! operations: ephemeral and sequential nodes, child listings, and one-shot
//! watches. A single [`SessionContext`] owns the service session and routes
//! watch notifications to waiters; primitives share it through an `Arc`.
//!
//! - [`ExclusiveLock`] - fair, reentrant-per-instance mutual exclusion
//! - [`ReadWriteLock`] - shared readers, exclusive writers, arrival order
//! - [`Barrier`] - double barrier: enter together, leave together
//! - [`LeaderElector`] - leader election with a listener for role changes
//! - [`DistributedQueue`] / [`BoundedQueue`] - FIFO queues with exactly-once
//!   delivery to racing consumers
//!
//! All state lives in the service. Ephemeral nodes vanish with their session,
//! so a crashed participant never blocks the others for longer than its
//! session timeout.
//!
//! ## Lock Example
//!
//! ```ignore
//! use coordkit::{CoordinationConfig, ExclusiveLock, SessionContext};
//!
//! let session = SessionContext::connect(&service, CoordinationConfig::default()).await?;
//! let lock = ExclusiveLock::new(session, "deploy").await?;
//!
//! if lock.try_lock_for(Duration::from_secs(5)).await? {
//!     // critical section
//!     lock.unlock().await?;
//! }
//! ```
//!
//! ## Queue Example
//!
//! ```ignore
//! use coordkit::{DistributedQueue, SessionContext};
//!
//! let queue: DistributedQueue<Job> = DistributedQueue::new(session, "jobs").await?;
//! queue.enqueue(&job).await?;
//! let next = queue.take().await?;
//! ```

mod await_condition;
mod barrier;
mod codec;
mod competitor;
mod config;
pub mod constants;
mod election;
mod error;
mod lock;
pub mod pure;
mod queue;
mod rwlock;
mod session;

pub use await_condition::Awaited;
pub use await_condition::ChildrenProbe;
pub use await_condition::ExistsProbe;
pub use await_condition::Probe;
pub use await_condition::await_until;
pub use barrier::Barrier;
pub use barrier::BarrierPhase;
pub use barrier::BarrierStatus;
pub use codec::BytesCodec;
pub use codec::Codec;
pub use codec::CodecError;
pub use codec::JsonCodec;
pub use competitor::CompetitorKind;
pub use competitor::OrderedCompetitor;
pub use config::CoordinationConfig;
pub use coordkit_service::CoordinationService;
pub use election::CandidateKind;
pub use election::ElectionListener;
pub use election::ElectionRole;
pub use election::LeaderElector;
pub use error::CoordinationError;
pub use error::CoordinationResult;
pub use lock::ExclusiveKind;
pub use lock::ExclusiveLock;
pub use queue::BoundedQueue;
pub use queue::CoordinationQueue;
pub use queue::DistributedQueue;
pub use rwlock::LockMode;
pub use rwlock::ReadLock;
pub use rwlock::ReadWriteLock;
pub use rwlock::RwKind;
pub use rwlock::WriteLock;
pub use session::SessionContext;
pub use session::SessionState;
pub use session::WatchKey;
pub use session::WatchKind;
pub use session::WatchRegistration;
