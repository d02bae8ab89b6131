//! Configuration carried by a [`SessionContext`](crate::SessionContext).

use std::time::Duration;

use coordkit_service::path;
use serde::Deserialize;
use serde::Serialize;

/// Namespace roots and session timeouts.
///
/// Every primitive lives under `{root}/{name}` where `root` is the field for
/// its kind. Missing fields deserialize to their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Root of exclusive locks.
    pub lock_root: String,
    /// Root of read/write locks.
    pub rwlock_root: String,
    /// Root of barriers.
    pub barrier_root: String,
    /// Root of leader elections.
    pub election_root: String,
    /// Root of queues.
    pub queue_root: String,
    /// How long `SessionContext::connect` waits for the first `Connected`
    /// event.
    pub connect_timeout_ms: u64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self::under("/coordkit")
    }
}

impl CoordinationConfig {
    /// Place every root under `base` (e.g. `/app` gives `/app/locks`, ...).
    pub fn under(base: &str) -> Self {
        Self {
            lock_root: path::join(base, "locks"),
            rwlock_root: path::join(base, "rwlocks"),
            barrier_root: path::join(base, "barriers"),
            election_root: path::join(base, "elections"),
            queue_root: path::join(base, "queues"),
            connect_timeout_ms: 10_000, // 10 seconds
        }
    }

    /// Connect timeout as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoordinationConfig::default();
        assert_eq!(config.lock_root, "/coordkit/locks");
        assert_eq!(config.rwlock_root, "/coordkit/rwlocks");
        assert_eq!(config.barrier_root, "/coordkit/barriers");
        assert_eq!(config.election_root, "/coordkit/elections");
        assert_eq!(config.queue_root, "/coordkit/queues");
        assert_eq!(config.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: CoordinationConfig =
            serde_json::from_str(r#"{"queue_root": "/jobs", "connect_timeout_ms": 500}"#).unwrap();
        assert_eq!(config.queue_root, "/jobs");
        assert_eq!(config.connect_timeout_ms, 500);
        assert_eq!(config.lock_root, "/coordkit/locks");
    }
}
