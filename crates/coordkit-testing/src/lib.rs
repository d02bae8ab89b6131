//! Test support for coordkit.
//!
//! Provides [`InMemoryCoordinationService`], a deterministic in-memory
//! implementation of the `coordkit-service` traits:
//!
//! - hierarchical namespace with persistent/ephemeral and sequential nodes
//! - per-session one-shot node and children watches, armed atomically with
//!   the read that requested them
//! - session lifecycle events (`Connected`, `Disconnected`, `Expired`)
//! - fault injection: session expiry, disconnect/reconnect, forced deletes
//!
//! Every request is applied under a single lock, so reads, watch arming and
//! the events produced by later mutations are totally ordered.

mod namespace;
mod service;

pub use service::InMemoryClient;
pub use service::InMemoryCoordinationService;
