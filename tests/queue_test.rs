//! Integration tests for the queue facade and consumer loop.
//!
//! Runs against the in-memory cache with tokio's paused clock, so the poll
//! delays below cost no wall time.

use async_trait::async_trait;
use sentinelq::cache::{CacheExecutor, Command, MemoryCache};
use sentinelq::engine::{CancelToken, Handler, Queue, QueueConfig};
use sentinelq::error::{Error, HandlerError, Result};
use sentinelq::model::{QueuePayload, QueueState, Slot};
use sentinelq::store::payload::slot_key;
use sentinelq::store::{DEFAULT_OP_TIMEOUT, Sentinel, Store};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

type Seen = Arc<Mutex<Vec<QueuePayload>>>;

fn payload(n: usize) -> QueuePayload {
    QueuePayload::new(format!("https://example.com/{n}"), "GET").timestep(n as i64)
}

fn recorder(seen: Seen) -> impl Handler + 'static {
    move |payload: QueuePayload, _cancel: CancelToken| {
        let seen = Arc::clone(&seen);
        async move {
            seen.lock().unwrap().push(payload);
            Ok::<(), HandlerError>(())
        }
    }
}

fn config(poll_delay: Duration) -> QueueConfig {
    QueueConfig {
        poll_delay,
        ..QueueConfig::default()
    }
}

fn recording_queue(identifier: &str, poll_delay: Duration) -> (Arc<Queue>, Seen) {
    let seen: Seen = Arc::default();
    let queue = Queue::new(
        Store::in_memory(),
        identifier,
        config(poll_delay),
        recorder(seen.clone()),
    );
    (Arc::new(queue), seen)
}

fn spawn_run(queue: &Arc<Queue>) -> JoinHandle<Error> {
    let q = Arc::clone(queue);
    tokio::spawn(async move { q.run().await })
}

fn seen_addresses(seen: &Seen) -> Vec<String> {
    seen.lock().unwrap().iter().map(|p| p.address.clone()).collect()
}

// ---------------------------------------------------------------------------
// Delivery and ordering
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn single_enqueue_is_dispatched_field_for_field() {
    let (queue, seen) = recording_queue("single_q", Duration::from_secs(1));
    let sent = QueuePayload::new("https://example.com/hook", "POST")
        .authorization("Bearer t")
        .cookie("a", "1")
        .request_body("{}");

    assert_eq!(queue.enqueue(&sent).await.unwrap(), Slot(1));

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();

    assert!(matches!(handle.await.unwrap(), Error::Canceled));
    assert_eq!(*seen.lock().unwrap(), vec![sent]);
}

#[tokio::test(start_paused = true)]
async fn dispatches_in_enqueue_order() {
    let (queue, seen) = recording_queue("fifo_q", Duration::from_secs(1));
    for n in 1..=20 {
        queue.enqueue(&payload(n)).await.unwrap();
    }

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();
    handle.await.unwrap();

    let expected: Vec<String> = (1..=20).map(|n| payload(n).address).collect();
    assert_eq!(seen_addresses(&seen), expected);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_producers_get_distinct_slots() {
    let (queue, seen) = recording_queue("producers_q", Duration::from_secs(1));

    let mut producers = Vec::new();
    for n in 1..=10 {
        let q = Arc::clone(&queue);
        producers.push(tokio::spawn(async move { q.enqueue(&payload(n)).await }));
    }
    let mut slots = Vec::new();
    for producer in producers {
        slots.push(producer.await.unwrap().unwrap());
    }
    slots.sort();
    assert_eq!(slots, (1..=10).map(Slot).collect::<Vec<_>>());

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();
    handle.await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 10);
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn backlog_drains_within_one_delay() {
    let (queue, seen) = recording_queue("q1", Duration::from_secs(2));
    for n in 1..=5 {
        queue.enqueue(&payload(n)).await.unwrap();
    }

    let handle = spawn_run(&queue);
    sleep(Duration::from_secs(2)).await;
    queue.cancel();
    handle.await.unwrap();

    let expected: Vec<String> = (1..=5).map(|n| payload(n).address).collect();
    assert_eq!(seen_addresses(&seen), expected);
}

#[tokio::test(start_paused = true)]
async fn cooldown_gates_later_enqueues() {
    let (queue, seen) = recording_queue("q2", Duration::from_secs(5));
    for n in 1..=5 {
        queue.enqueue(&payload(n)).await.unwrap();
    }

    let handle = spawn_run(&queue);
    sleep(Duration::from_secs(2)).await;
    for n in 6..=10 {
        queue.enqueue(&payload(n)).await.unwrap();
    }
    sleep(Duration::from_secs(2)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 5);
    assert_eq!(queue.depth().await.unwrap(), 5);
}

#[tokio::test(start_paused = true)]
async fn later_enqueues_drain_after_cooldown() {
    let (queue, seen) = recording_queue("late_q", Duration::from_secs(5));
    let handle = spawn_run(&queue);

    sleep(Duration::from_secs(1)).await;
    queue.enqueue(&payload(1)).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());

    sleep(Duration::from_secs(5)).await;
    queue.cancel();
    handle.await.unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Lifecycle and cancellation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn empty_queue_dispatches_nothing_and_cancels_promptly() {
    let (queue, seen) = recording_queue("idle_q", Duration::from_secs(60));
    let handle = spawn_run(&queue);

    sleep(Duration::from_secs(1)).await;
    assert_eq!(queue.state(), QueueState::Running);
    queue.cancel();

    let stopped = tokio::time::timeout(Duration::from_millis(50), handle)
        .await
        .expect("loop must stop well inside the cooldown")
        .unwrap();
    assert!(matches!(stopped, Error::Canceled));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(queue.state(), QueueState::Canceled);
}

#[tokio::test]
async fn cancel_is_idempotent_before_and_after_run() {
    let (queue, _) = recording_queue("cancel_q", Duration::from_millis(20));
    queue.cancel();
    queue.cancel();
    assert_eq!(queue.state(), QueueState::Idle);

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(30)).await;
    queue.cancel();
    handle.await.unwrap();

    queue.cancel();
    queue.cancel();
    assert_eq!(queue.state(), QueueState::Canceled);
}

#[tokio::test]
async fn zero_delay_is_rejected_without_dispatching() {
    let (queue, seen) = recording_queue("delay_q", Duration::ZERO);
    queue.enqueue(&payload(1)).await.unwrap();

    let stopped = queue.run().await;
    assert!(matches!(stopped, Error::InvalidDelay));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(queue.state(), QueueState::Idle);
    assert_eq!(queue.depth().await.unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn handler_error_stops_loop_permanently() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let handler = move |_payload: QueuePayload, _cancel: CancelToken| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Err::<(), HandlerError>("downstream rejected".into()) }
    };
    let queue = Queue::new(
        Store::in_memory(),
        "fatal_q",
        config(Duration::from_secs(1)),
        handler,
    );
    queue.enqueue(&payload(1)).await.unwrap();
    queue.enqueue(&payload(2)).await.unwrap();

    let stopped = queue.run().await;
    assert!(matches!(stopped, Error::Handler(ref e) if e.to_string() == "downstream rejected"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(queue.state(), QueueState::FatallyStopped);
    assert_eq!(queue.depth().await.unwrap(), 1);
}

struct CancelAfterFirst {
    calls: AtomicUsize,
}

#[async_trait]
impl Handler for CancelAfterFirst {
    async fn handle(
        &self,
        _payload: QueuePayload,
        cancel: &CancelToken,
    ) -> std::result::Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        cancel.cancel();
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn handler_can_cancel_its_own_loop() {
    let queue = Arc::new(Queue::new(
        Store::in_memory(),
        "self_cancel_q",
        config(Duration::from_secs(1)),
        CancelAfterFirst {
            calls: AtomicUsize::new(0),
        },
    ));
    for n in 1..=3 {
        queue.enqueue(&payload(n)).await.unwrap();
    }

    let stopped = queue.run().await;
    assert!(matches!(stopped, Error::Canceled));
    assert_eq!(queue.depth().await.unwrap(), 2);
    assert_eq!(queue.state(), QueueState::Canceled);
}

#[tokio::test(start_paused = true)]
async fn new_run_supersedes_previous_loop() {
    let (queue, seen) = recording_queue("supersede_q", Duration::from_secs(10));
    let first = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;

    let second = spawn_run(&queue);
    let stopped = tokio::time::timeout(Duration::from_millis(50), first)
        .await
        .expect("first loop must stop")
        .unwrap();
    assert!(matches!(stopped, Error::Canceled));

    sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.state(), QueueState::Running);

    queue.enqueue(&payload(1)).await.unwrap();
    sleep(Duration::from_secs(11)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    queue.cancel();
    assert!(matches!(second.await.unwrap(), Error::Canceled));
    assert_eq!(queue.state(), QueueState::Canceled);
}

#[tokio::test(start_paused = true)]
async fn queue_can_run_again_after_cancel() {
    let (queue, seen) = recording_queue("rerun_q", Duration::from_secs(1));
    queue.enqueue(&payload(1)).await.unwrap();

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();
    handle.await.unwrap();

    queue.enqueue(&payload(2)).await.unwrap();
    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(
        seen_addresses(&seen),
        vec![payload(1).address, payload(2).address]
    );
}

// ---------------------------------------------------------------------------
// Soft failures
// ---------------------------------------------------------------------------

/// Fails the first `failures` MGET commands, then defers to a memory cache.
struct FlakySentinels {
    inner: MemoryCache,
    failures: AtomicUsize,
}

#[async_trait]
impl CacheExecutor for FlakySentinels {
    async fn execute(&self, command: &Command) -> Result<Value> {
        if matches!(command, Command::MGet { .. })
            && self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::Other("connection reset".to_string()));
        }
        self.inner.execute(command).await
    }
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried_after_cooldown() {
    let cache = Arc::new(FlakySentinels {
        inner: MemoryCache::new(),
        failures: AtomicUsize::new(2),
    });
    let seen: Seen = Arc::default();
    let queue = Arc::new(Queue::new(
        Store::new(cache, DEFAULT_OP_TIMEOUT),
        "flaky_q",
        config(Duration::from_secs(1)),
        recorder(seen.clone()),
    ));
    queue.enqueue(&payload(1)).await.unwrap();

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(500)).await;
    assert!(seen.lock().unwrap().is_empty(), "first poll fails");

    sleep(Duration::from_secs(2)).await;
    queue.cancel();
    assert!(matches!(handle.await.unwrap(), Error::Canceled));
    assert_eq!(seen.lock().unwrap().len(), 1);
}

fn shared_memory_queue(
    identifier: &str,
    max_slot_attempts: u32,
) -> (Arc<MemoryCache>, Store, Arc<Queue>, Seen) {
    let cache = Arc::new(MemoryCache::new());
    let store = Store::new(cache.clone(), DEFAULT_OP_TIMEOUT);
    let seen: Seen = Arc::default();
    let queue = Queue::new(
        store.clone(),
        identifier,
        QueueConfig {
            poll_delay: Duration::from_secs(1),
            max_slot_attempts,
        },
        recorder(seen.clone()),
    );
    (cache, store, Arc::new(queue), seen)
}

#[tokio::test(start_paused = true)]
async fn phantom_slot_is_delivered_once_written() {
    let (_, store, queue, seen) = shared_memory_queue("phantom_q", 3);

    // Producer allocated slot 1 but has not written it yet.
    let slot = store.advance("phantom_q", Sentinel::Head).await.unwrap();
    let handle = spawn_run(&queue);

    sleep(Duration::from_millis(500)).await;
    assert!(seen.lock().unwrap().is_empty());
    store
        .set_queue_payload("phantom_q", slot, &payload(1))
        .await
        .unwrap();
    queue.enqueue(&payload(2)).await.unwrap();

    sleep(Duration::from_secs(1)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(
        seen_addresses(&seen),
        vec![payload(1).address, payload(2).address]
    );
}

#[tokio::test(start_paused = true)]
async fn unreadable_slot_is_skipped_after_attempts() {
    let (_, store, queue, seen) = shared_memory_queue("gap_q", 2);

    store.advance("gap_q", Sentinel::Head).await.unwrap();
    queue.enqueue(&payload(2)).await.unwrap();

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(1500)).await;
    assert!(seen.lock().unwrap().is_empty(), "slot 1 still retried");

    sleep(Duration::from_secs(2)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(seen_addresses(&seen), vec![payload(2).address]);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn corrupt_slot_is_skipped_immediately() {
    let (cache, store, queue, seen) = shared_memory_queue("poison_q", 5);

    let slot = store.advance("poison_q", Sentinel::Head).await.unwrap();
    cache
        .execute(&Command::Set {
            key: slot_key("poison_q", slot),
            value: "{\"address\":".to_string(),
            expire_seconds: 60,
        })
        .await
        .unwrap();
    queue.enqueue(&payload(2)).await.unwrap();

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(1500)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(seen_addresses(&seen), vec![payload(2).address]);
}

/// Applies the first `lost` INCRs of `key` but reports them as timed out.
struct LostIncrReply {
    inner: MemoryCache,
    key: String,
    lost: AtomicUsize,
}

#[async_trait]
impl CacheExecutor for LostIncrReply {
    async fn execute(&self, command: &Command) -> Result<Value> {
        let reply = self.inner.execute(command).await?;
        if matches!(command, Command::Incr { key } if *key == self.key)
            && self
                .lost
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(Error::Timeout(DEFAULT_OP_TIMEOUT));
        }
        Ok(reply)
    }
}

#[tokio::test(start_paused = true)]
async fn applied_tail_advance_with_lost_reply_still_delivers_slot() {
    let cache = Arc::new(LostIncrReply {
        inner: MemoryCache::new(),
        key: Sentinel::Tail.key("lost_q"),
        lost: AtomicUsize::new(1),
    });
    let seen: Seen = Arc::default();
    let queue = Arc::new(Queue::new(
        Store::new(cache, DEFAULT_OP_TIMEOUT),
        "lost_q",
        config(Duration::from_secs(1)),
        recorder(seen.clone()),
    ));
    for n in 1..=3 {
        queue.enqueue(&payload(n)).await.unwrap();
    }

    let handle = spawn_run(&queue);
    sleep(Duration::from_secs(10)).await;
    queue.cancel();
    assert!(matches!(handle.await.unwrap(), Error::Canceled));

    let expected: Vec<String> = (1..=3).map(|n| payload(n).address).collect();
    assert_eq!(seen_addresses(&seen), expected);
    assert_eq!(queue.depth().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn consuming_refreshes_sentinel_retention() {
    let (cache, _, queue, _) = shared_memory_queue("retention_q", 3);
    queue.enqueue(&payload(1)).await.unwrap();
    assert!(cache.ttl(&Sentinel::Tail.key("retention_q")).is_none());

    let handle = spawn_run(&queue);
    sleep(Duration::from_millis(10)).await;
    queue.cancel();
    handle.await.unwrap();

    assert!(cache.ttl(&Sentinel::Head.key("retention_q")).is_some());
    assert!(cache.ttl(&Sentinel::Tail.key("retention_q")).is_some());
}

#[tokio::test]
#[ignore] // Requires a running cache service at CACHE_ADDRESS
async fn live_cache_round_trip() {
    let address = std::env::var("CACHE_ADDRESS")
        .unwrap_or_else(|_| "http://localhost:6050".to_string());
    let identifier = format!("sentinelq_test_{}", uuid::Uuid::new_v4());
    let seen: Seen = Arc::default();
    let queue = Arc::new(
        Queue::connect(
            address.into(),
            identifier,
            Duration::from_millis(200),
            recorder(seen.clone()),
        )
        .unwrap(),
    );

    for n in 1..=3 {
        queue.enqueue(&payload(n)).await.unwrap();
    }
    let handle = spawn_run(&queue);
    sleep(Duration::from_secs(1)).await;
    queue.cancel();
    handle.await.unwrap();

    assert_eq!(seen.lock().unwrap().len(), 3);
}
