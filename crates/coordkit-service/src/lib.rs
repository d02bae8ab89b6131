//! Service boundary for coordkit.
//!
//! The coordination primitives in `coordkit` never talk to a concrete
//! coordination service. They talk to the traits defined here:
//!
//! - [`CoordinationService`] - opens sessions (`connect`)
//! - [`CoordinationClient`] - one session's view of the hierarchical namespace
//!
//! A session's asynchronous notifications (session state changes and fired
//! one-shot watches) arrive on the [`Connection::events`] stream.
//!
//! Backends implement these traits; `coordkit-testing` ships a deterministic
//! in-memory implementation.

mod error;
pub mod path;
mod traits;
mod types;

pub use error::ServiceError;
pub use traits::Connection;
pub use traits::CoordinationClient;
pub use traits::CoordinationService;
pub use types::CreateMode;
pub use types::EventKind;
pub use types::NodeStat;
pub use types::ServiceEvent;
pub use types::SessionEvent;
pub use types::SessionId;
pub use types::WatchedEvent;
