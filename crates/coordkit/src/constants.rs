//! Node naming and size limits for coordination primitives.
//!
//! Tiger Style: every collection a primitive reads or builds is bounded by a
//! constant here.

// ============================================================================
// Node Name Prefixes
// ============================================================================

/// Prefix of exclusive-lock competitor nodes (`lock-NNNNNNNNNN`).
pub const LOCK_PREFIX: &str = "lock-";

/// Prefix of shared (read) competitor nodes.
pub const READ_PREFIX: &str = "read-";

/// Prefix of exclusive (write) competitor nodes.
pub const WRITE_PREFIX: &str = "write-";

/// Prefix of election candidate nodes.
pub const CANDIDATE_PREFIX: &str = "candidate-";

/// Prefix of queue entry nodes.
pub const ENTRY_PREFIX: &str = "entry-";

/// Prefix of barrier member nodes (`member-<uuid>`).
pub const MEMBER_PREFIX: &str = "member-";

/// Name of the persistent marker created once a barrier is full.
pub const READY_MARKER: &str = "ready";

// ============================================================================
// Bounds
// ============================================================================

/// Maximum number of entries removed by a single `drain_all`.
pub const MAX_DRAIN_BATCH: u32 = 10_000;

/// Maximum number of parties a barrier may require.
pub const MAX_BARRIER_SIZE: u32 = 1_024;

/// Maximum length of a primitive name.
pub const MAX_NAME_LEN: usize = 255;

const _: () = assert!(MAX_BARRIER_SIZE > 0);
const _: () = assert!(MAX_DRAIN_BATCH >= MAX_BARRIER_SIZE);
