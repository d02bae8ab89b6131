//! Shared helpers for coordination integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use coordkit::CoordinationConfig;
use coordkit::SessionContext;
use coordkit_testing::InMemoryCoordinationService;
use rand::Rng;

/// Upper bound for any single wait in these tests.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("coordkit=debug").with_test_writer().try_init();
}

pub async fn connect(service: &Arc<InMemoryCoordinationService>) -> Arc<SessionContext> {
    SessionContext::connect(service, CoordinationConfig::default()).await.expect("connect")
}

/// Sleep for a random 0..`max_ms` milliseconds.
pub async fn jitter(max_ms: u64) {
    let ms = rand::rng().random_range(0..max_ms.max(1));
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
