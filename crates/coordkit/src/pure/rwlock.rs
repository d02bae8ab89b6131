//! Read/write mode transitions.

use crate::rwlock::LockMode;

/// Returns true if an instance whose guard is in `current` may acquire
/// `requested`.
///
/// Acquiring the mode already held is allowed (reentrant). Upgrading
/// (Read to Write) and downgrading (Write to Read) are not.
#[inline]
pub fn allowed_transition(current: LockMode, requested: LockMode) -> bool {
    match (current, requested) {
        (LockMode::None, _) | (_, LockMode::None) => true,
        (LockMode::Read, LockMode::Read) | (LockMode::Write, LockMode::Write) => true,
        (LockMode::Read, LockMode::Write) | (LockMode::Write, LockMode::Read) => false,
    }
}
