mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use hitqueue::{new_hit, HitQueue, HitSender, MemoryStore, SendOutcome, TracingObserver};

use common::{fast_policy, init_logging, wait_until, ScriptedSender};

fn memory_queue(sender: Arc<dyn HitSender>) -> HitQueue {
    HitQueue::new(
        Arc::new(MemoryStore::new()),
        sender,
        fast_policy(),
        Arc::new(TracingObserver),
    )
}

#[tokio::test]
async fn drains_in_fifo_order() {
    init_logging();
    let sender = Arc::new(ScriptedSender::new());
    let queue = memory_queue(sender.clone());

    for i in 0..5u32 {
        queue
            .queue(new_hit(format!("hit-{i}").into_bytes()))
            .unwrap();
    }
    queue.begin_processing().unwrap();

    assert!(wait_until(Duration::from_secs(2), || queue.count() == 0).await);

    let expected: Vec<Vec<u8>> = (0..5u32).map(|i| format!("hit-{i}").into_bytes()).collect();
    assert_eq!(sender.calls(), expected);
    queue.close().await;
}

#[tokio::test]
async fn retrying_hit_blocks_newer_hits() {
    init_logging();
    let sender = Arc::new(ScriptedSender::new());
    sender.script(b"B", [SendOutcome::Retryable, SendOutcome::Retryable]);

    let queue = memory_queue(sender.clone());
    queue.queue(new_hit(Bytes::from_static(b"A"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"B"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"C"))).unwrap();
    queue.begin_processing().unwrap();

    assert!(wait_until(Duration::from_secs(3), || queue.count() == 0).await);

    // C must never overtake B: two failed B attempts, then B, then C.
    let expected: Vec<Vec<u8>> = vec![
        b"A".to_vec(),
        b"B".to_vec(),
        b"B".to_vec(),
        b"B".to_vec(),
        b"C".to_vec(),
    ];
    assert_eq!(sender.calls(), expected);
    queue.close().await;
}

#[tokio::test]
async fn rejected_hit_is_dropped_and_reported() {
    init_logging();
    let sender = Arc::new(ScriptedSender::new());
    sender.script(b"bad", [SendOutcome::Rejected]);

    let observer = Arc::new(common::CountingObserver::default());
    let queue = HitQueue::new(
        Arc::new(MemoryStore::new()),
        sender.clone(),
        fast_policy(),
        observer.clone(),
    );

    queue.queue(new_hit(Bytes::from_static(b"first"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"bad"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"last"))).unwrap();
    queue.begin_processing().unwrap();

    assert!(wait_until(Duration::from_secs(2), || queue.count() == 0).await);

    let expected: Vec<Vec<u8>> = vec![b"first".to_vec(), b"bad".to_vec(), b"last".to_vec()];
    assert_eq!(sender.calls(), expected);
    assert_eq!(observer.dropped.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(observer.sent.load(std::sync::atomic::Ordering::SeqCst), 2);
    assert_eq!(queue.hits_sent_total(), 2);
    assert_eq!(queue.hits_dropped_total(), 1);
    queue.close().await;
}

#[tokio::test]
async fn backoff_resets_after_success() {
    init_logging();
    let sender = Arc::new(ScriptedSender::new());
    // Three failures escalate the delay to 50 -> 100 -> 200 ms; the next
    // failing hit must start back at 50 ms, not at the escalated value.
    sender.script(
        b"stuck",
        [
            SendOutcome::Retryable,
            SendOutcome::Retryable,
            SendOutcome::Retryable,
        ],
    );
    sender.script(b"later", [SendOutcome::Retryable]);

    let policy = hitqueue::RetryPolicy {
        initial: Duration::from_millis(50),
        max: Duration::from_millis(400),
        multiplier: 2,
    };
    let queue = HitQueue::new(
        Arc::new(MemoryStore::new()),
        sender.clone(),
        policy,
        Arc::new(TracingObserver),
    );

    queue.queue(new_hit(Bytes::from_static(b"stuck"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"later"))).unwrap();
    queue.begin_processing().unwrap();

    assert!(wait_until(Duration::from_secs(5), || queue.count() == 0).await);

    let stuck = sender.attempt_times(b"stuck");
    let later = sender.attempt_times(b"later");
    assert_eq!(stuck.len(), 4);
    assert_eq!(later.len(), 2);

    // Last escalation for the stuck hit was 200 ms.
    let escalated = stuck[3].duration_since(stuck[2]);
    assert!(escalated >= Duration::from_millis(180), "got {escalated:?}");

    // The retry of the next hit uses the initial interval again.
    let reset = later[1].duration_since(later[0]);
    assert!(reset < Duration::from_millis(180), "got {reset:?}");
    queue.close().await;
}

#[tokio::test]
async fn backoff_resets_after_drop() {
    init_logging();
    let sender = Arc::new(ScriptedSender::new());
    // The doomed hit escalates the delay to 50 -> 100 -> 200 ms before it is
    // rejected; the next failing hit must start back at 50 ms.
    sender.script(
        b"doomed",
        [
            SendOutcome::Retryable,
            SendOutcome::Retryable,
            SendOutcome::Retryable,
            SendOutcome::Rejected,
        ],
    );
    sender.script(b"next", [SendOutcome::Retryable]);

    let policy = hitqueue::RetryPolicy {
        initial: Duration::from_millis(50),
        max: Duration::from_millis(400),
        multiplier: 2,
    };
    let queue = HitQueue::new(
        Arc::new(MemoryStore::new()),
        sender.clone(),
        policy,
        Arc::new(TracingObserver),
    );

    queue.queue(new_hit(Bytes::from_static(b"doomed"))).unwrap();
    queue.queue(new_hit(Bytes::from_static(b"next"))).unwrap();
    queue.begin_processing().unwrap();

    assert!(wait_until(Duration::from_secs(5), || queue.count() == 0).await);

    let doomed = sender.attempt_times(b"doomed");
    let next = sender.attempt_times(b"next");
    assert_eq!(doomed.len(), 4);
    assert_eq!(next.len(), 2);
    assert_eq!(queue.hits_dropped_total(), 1);

    // Last escalation for the doomed hit was 200 ms.
    let escalated = doomed[3].duration_since(doomed[2]);
    assert!(escalated >= Duration::from_millis(180), "got {escalated:?}");

    // Dropping it clears the escalation for whatever fails next.
    let reset = next[1].duration_since(next[0]);
    assert!(reset < Duration::from_millis(180), "got {reset:?}");
    queue.close().await;
}
