//! Integration tests for exclusive and read-write locks across sessions.

mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::TEST_TIMEOUT;
use common::connect;
use common::init_tracing;
use common::jitter;
use coordkit::CoordinationError;
use coordkit::ExclusiveLock;
use coordkit::LockMode;
use coordkit::ReadWriteLock;
use coordkit_testing::InMemoryCoordinationService;
use tokio::task::JoinSet;

// ============================================================================
// Exclusive lock
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_mutual_exclusion() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let in_critical = Arc::new(AtomicBool::new(false));
    let entries = Arc::new(AtomicU32::new(0));

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        let in_critical = Arc::clone(&in_critical);
        let entries = Arc::clone(&entries);
        tasks.spawn(async move {
            let lock = ExclusiveLock::new(connect(&service).await, "counter").await.unwrap();
            for _ in 0..3 {
                lock.lock().await.unwrap();
                assert!(!in_critical.swap(true, Ordering::SeqCst), "two holders at once");
                jitter(3).await;
                entries.fetch_add(1, Ordering::SeqCst);
                in_critical.store(false, Ordering::SeqCst);
                lock.unlock().await.unwrap();
            }
        });
    }

    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(entries.load(Ordering::SeqCst), 24);
    assert!(service.children("/coordkit/locks/counter").is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_waiters_served_in_order() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let holder = ExclusiveLock::new(connect(&service).await, "fifo").await.unwrap();
    holder.lock().await.unwrap();

    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();
    for id in 0..3u32 {
        let lock = ExclusiveLock::new(connect(&service).await, "fifo").await.unwrap();
        let order = Arc::clone(&order);
        tasks.spawn(async move {
            lock.lock().await.unwrap();
            order.lock().push(id);
            lock.unlock().await.unwrap();
        });
        // Let each waiter register before the next one starts.
        while service.children("/coordkit/locks/fifo").len() < id as usize + 2 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    }

    holder.unlock().await.unwrap();
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(result) = tasks.join_next().await {
            result.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_lock_released_when_holder_session_closes() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let holder_session = connect(&service).await;
    let holder = ExclusiveLock::new(Arc::clone(&holder_session), "crash").await.unwrap();
    let waiter = ExclusiveLock::new(connect(&service).await, "crash").await.unwrap();

    holder.lock().await.unwrap();
    assert!(!waiter.try_lock().await.unwrap());

    holder_session.close().await.unwrap();
    assert!(waiter.try_lock_for(TEST_TIMEOUT).await.unwrap());
}

// ============================================================================
// Read-write lock
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rwlock_readers_share() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let a = ReadWriteLock::new(connect(&service).await, "table").await.unwrap();
    let b = ReadWriteLock::new(connect(&service).await, "table").await.unwrap();
    let c = ReadWriteLock::new(connect(&service).await, "table").await.unwrap();

    a.read_lock().lock().await.unwrap();
    assert!(b.read_lock().try_lock().await.unwrap());
    assert_eq!(a.mode(), LockMode::Read);
    assert!(!c.write_lock().try_lock().await.unwrap());
    // Upgrading in place is refused.
    assert!(matches!(
        b.write_lock().try_lock().await,
        Err(CoordinationError::ProtocolViolation { .. })
    ));

    a.read_lock().unlock().await.unwrap();
    b.read_lock().unlock().await.unwrap();
    assert!(c.write_lock().try_lock().await.unwrap());
    assert_eq!(c.mode(), LockMode::Write);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_rwlock_queued_writer_blocks_later_readers() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let reader = ReadWriteLock::new(connect(&service).await, "fair").await.unwrap();
    let writer = Arc::new(ReadWriteLock::new(connect(&service).await, "fair").await.unwrap());
    let late_reader = ReadWriteLock::new(connect(&service).await, "fair").await.unwrap();

    reader.read_lock().lock().await.unwrap();

    let queued = Arc::clone(&writer);
    let writer_task = tokio::spawn(async move {
        queued.write_lock().lock().await.unwrap();
    });
    while service.children("/coordkit/rwlocks/fair").len() < 2 {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }

    // The writer arrived first, so a new reader must wait behind it.
    assert!(!late_reader.read_lock().try_lock().await.unwrap());

    reader.read_lock().unlock().await.unwrap();
    tokio::time::timeout(TEST_TIMEOUT, writer_task).await.unwrap().unwrap();
    assert!(writer.write_lock().is_held().await);

    writer.write_lock().unlock().await.unwrap();
    assert!(late_reader.read_lock().try_lock().await.unwrap());
}
