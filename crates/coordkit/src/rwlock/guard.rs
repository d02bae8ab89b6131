//! Mode guard shared by the read and write sides of one lock instance.

use parking_lot::Mutex;

use crate::error::CoordinationError;
use crate::error::CoordinationResult;
use crate::pure::allowed_transition;
use crate::rwlock::LockMode;

/// Tracks the mode held (or being acquired) by one `ReadWriteLock`.
#[derive(Debug, Default)]
pub(crate) struct LockModeGuard {
    mode: Mutex<LockMode>,
}

impl LockModeGuard {
    pub(crate) fn mode(&self) -> LockMode {
        *self.mode.lock()
    }

    /// Claim `requested` before any node is registered. Returns the previous
    /// mode for [`restore`](Self::restore).
    pub(crate) fn claim(&self, name: &str, requested: LockMode) -> CoordinationResult<LockMode> {
        let mut mode = self.mode.lock();
        let current = *mode;
        if !allowed_transition(current, requested) {
            return Err(CoordinationError::ProtocolViolation {
                reason: format!(
                    "cannot acquire {} lock on '{name}' while holding {} lock",
                    requested.as_str(),
                    current.as_str()
                ),
            });
        }
        *mode = requested;
        Ok(current)
    }

    /// Undo a claim whose acquire failed or timed out.
    pub(crate) fn restore(&self, previous: LockMode) {
        *self.mode.lock() = previous;
    }

    /// Reset to `None` if `released` is the mode held.
    pub(crate) fn reset(&self, released: LockMode) {
        let mut mode = self.mode.lock();
        if *mode == released {
            *mode = LockMode::None;
        }
    }
}
