//! Pure functions extracted from the coordination primitives.
//!
//! "Functional Core, Imperative Shell": every decision a primitive makes from
//! a snapshot of sibling names lives here, deterministic and side-effect
//! free, so it can be unit and property tested without a service.
//!
//! # Module Organization
//!
//! - [`ordering`]: sibling parsing/sorting, blocking predecessor lookup
//! - [`rwlock`]: read/write mode transitions
//! - [`barrier`]: membership counting, readiness checks
//! - [`election`]: leader/follower standing
//! - [`queue`]: entry ordering, capacity arithmetic
//!
//! # Tiger Style
//!
//! - Saturating arithmetic, explicit u32/u64 counts
//! - No panics: all functions are total

pub mod barrier;
pub mod election;
pub mod ordering;
pub mod queue;
pub mod rwlock;

pub use barrier::BarrierView;
pub use barrier::barrier_view;
pub use barrier::is_enter_complete;
pub use barrier::is_leave_complete;
pub use barrier::should_create_marker;
pub use election::Standing;
pub use election::election_standing;
pub use ordering::Sibling;
pub use ordering::find_blocking_predecessor;
pub use ordering::is_registered;
pub use ordering::sort_siblings;
pub use queue::has_capacity;
pub use queue::remaining_capacity;
pub use queue::sorted_entries;
pub use rwlock::allowed_transition;
