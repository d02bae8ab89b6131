//! Read/write lock modes and competitor kinds.

use coordkit_service::path;

use crate::competitor::CompetitorKind;
use crate::constants::READ_PREFIX;
use crate::constants::WRITE_PREFIX;

/// Mode held by one `ReadWriteLock` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LockMode {
    /// Nothing held.
    #[default]
    None,
    /// Shared (read) access.
    Read,
    /// Exclusive (write) access.
    Write,
}

impl LockMode {
    /// Convert the mode to a string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            LockMode::None => "none",
            LockMode::Read => "read",
            LockMode::Write => "write",
        }
    }
}

/// Competitor kinds sharing a read/write lock namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RwKind {
    /// `read-NNNNNNNNNN`
    Read,
    /// `write-NNNNNNNNNN`
    Write,
}

impl RwKind {
    /// Lock mode held once a competitor of this kind acquires.
    pub fn mode(self) -> LockMode {
        match self {
            RwKind::Read => LockMode::Read,
            RwKind::Write => LockMode::Write,
        }
    }
}

impl CompetitorKind for RwKind {
    fn prefix(self) -> &'static str {
        match self {
            RwKind::Read => READ_PREFIX,
            RwKind::Write => WRITE_PREFIX,
        }
    }

    fn parse(name: &str) -> Option<(Self, u64)> {
        match path::split_sequence(name)? {
            (READ_PREFIX, sequence) => Some((RwKind::Read, sequence)),
            (WRITE_PREFIX, sequence) => Some((RwKind::Write, sequence)),
            _ => None,
        }
    }

    fn blocks(self, other: Self) -> bool {
        // Readers only wait for writers; writers wait for everyone.
        !matches!((self, other), (RwKind::Read, RwKind::Read))
    }
}
