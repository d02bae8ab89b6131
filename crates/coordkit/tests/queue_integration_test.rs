//! Integration tests for distributed queues with competing consumers.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::TEST_TIMEOUT;
use common::connect;
use common::init_tracing;
use common::jitter;
use coordkit::BoundedQueue;
use coordkit::CoordinationError;
use coordkit::CoordinationQueue;
use coordkit::DistributedQueue;
use coordkit_testing::InMemoryCoordinationService;
use tokio::task::JoinSet;

const ITEMS: u32 = 60;
const CONSUMERS: usize = 4;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_queue_delivers_each_item_once() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let producer: DistributedQueue<u32> = DistributedQueue::new(connect(&service).await, "work").await.unwrap();

    let mut consumers = JoinSet::new();
    for _ in 0..CONSUMERS {
        let queue: DistributedQueue<u32> = DistributedQueue::new(connect(&service).await, "work").await.unwrap();
        consumers.spawn(async move {
            let mut received = Vec::new();
            while let Some(item) = queue.poll_timeout(Duration::from_millis(300)).await.unwrap() {
                received.push(item);
                jitter(2).await;
            }
            received
        });
    }

    for item in 0..ITEMS {
        producer.enqueue(&item).await.unwrap();
    }

    let mut all = Vec::new();
    tokio::time::timeout(TEST_TIMEOUT, async {
        while let Some(result) = consumers.join_next().await {
            let received = result.unwrap();
            // Each consumer sees items in production order.
            assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
            all.extend(received);
        }
    })
    .await
    .unwrap();

    assert_eq!(all.len(), ITEMS as usize);
    let distinct: BTreeSet<u32> = all.into_iter().collect();
    assert_eq!(distinct, (0..ITEMS).collect());
    assert!(producer.is_empty().await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_queue_drain_leaves_tail() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let queue: DistributedQueue<String> = DistributedQueue::new(connect(&service).await, "letters").await.unwrap();

    for letter in ["A", "B", "C"] {
        queue.enqueue(&letter.to_string()).await.unwrap();
    }
    assert_eq!(queue.drain_to(2).await.unwrap(), vec!["A".to_string(), "B".to_string()]);
    assert_eq!(queue.snapshot().await.unwrap(), vec!["C".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_bounded_queue_through_trait() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let bounded: BoundedQueue<u32> = BoundedQueue::new(connect(&service).await, "slots", 2).await.unwrap();
    let unbounded: DistributedQueue<u32> = DistributedQueue::new(connect(&service).await, "open").await.unwrap();

    let queues: [&dyn CoordinationQueue<u32>; 2] = [&bounded, &unbounded];
    for queue in queues {
        queue.add(&1).await.unwrap();
        queue.add(&2).await.unwrap();
    }

    assert!(matches!(bounded.add(&3).await, Err(CoordinationError::CapacityExceeded { .. })));
    assert!(!bounded.offer(&3).await.unwrap());
    assert!(unbounded.offer(&3).await.unwrap());
    assert_eq!(CoordinationQueue::remaining_capacity(&bounded).await.unwrap(), Some(0));
    assert_eq!(CoordinationQueue::remaining_capacity(&unbounded).await.unwrap(), None);

    assert_eq!(bounded.take().await.unwrap(), 1);
    assert!(bounded.offer_timeout(&3, TEST_TIMEOUT).await.unwrap());
    assert_eq!(bounded.drain_to(10).await.unwrap(), vec![2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_session_loss_keeps_entries() {
    init_tracing();
    let service = InMemoryCoordinationService::new();
    let consumer_session = connect(&service).await;
    let consumer: DistributedQueue<u32> = DistributedQueue::new(Arc::clone(&consumer_session), "durable").await.unwrap();
    let producer: DistributedQueue<u32> = DistributedQueue::new(connect(&service).await, "durable").await.unwrap();

    producer.enqueue(&7).await.unwrap();
    consumer_session.close().await.unwrap();

    assert!(consumer.poll().await.is_err());
    // Entries are persistent and outlive the session that produced or
    // watched them.
    assert_eq!(producer.poll().await.unwrap(), Some(7));
}
