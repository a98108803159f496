//! Queue store behavior against the public API.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tempfile::tempdir;

use tablequeue::models::{MessageStatus, QueuePayload};
use tablequeue::queue::{Clock, QueueStore, REQUESTS_QUEUE, RESULTS_QUEUE};

struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn new() -> Arc<Self> {
        let start = DateTime::parse_from_rfc3339("2024-06-01T08:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Arc::new(Self(Mutex::new(start)))
    }

    fn advance(&self, by: Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

fn request(doc: &str) -> QueuePayload {
    QueuePayload::request(Some("job-1".to_string()), doc, &format!("/pdf/{}.pdf", doc))
}

fn requests(count: usize) -> Vec<QueuePayload> {
    (0..count).map(|i| request(&format!("doc-{}", i))).collect()
}

#[tokio::test]
async fn publish_then_lease_preserves_content() {
    let store = QueueStore::open_in_memory().unwrap();
    let payloads = vec![
        request("a").with_extra("pages", json!([1, 2, 3])),
        request("b").with_extra("meta", json!({"source": "upload", "retry": false})),
        QueuePayload::default().with_extra("free", json!("form")),
    ];

    assert_eq!(
        store.publish(REQUESTS_QUEUE, payloads.clone()).await.unwrap(),
        3
    );

    let leased = store.lease(REQUESTS_QUEUE, 10, 60).await.unwrap();
    let leased_payloads: Vec<QueuePayload> = leased.into_iter().map(|e| e.payload).collect();
    assert_eq!(leased_payloads, payloads);
}

#[tokio::test]
async fn typed_key_passed_as_extension_keeps_queue_readable() {
    let store = QueueStore::open_in_memory().unwrap();
    let payloads = vec![
        request("a").with_extra("jobId", json!("other")),
        request("b"),
    ];
    assert_eq!(store.publish(REQUESTS_QUEUE, payloads).await.unwrap(), 2);

    let leased = store.lease(REQUESTS_QUEUE, 10, 60).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert_eq!(leased[0].payload.job_id.as_deref(), Some("other"));
    assert!(leased[0].payload.extra.is_empty());
    assert_eq!(leased[1].payload.doc_id.as_deref(), Some("b"));

    let bad = vec![request("c").with_extra("docId", json!(42)), request("d")];
    assert!(store.publish(REQUESTS_QUEUE, bad).await.is_err());
    let depth = store.depth(REQUESTS_QUEUE).await.unwrap();
    assert_eq!((depth.pending, depth.leased), (0, 2));
}

#[tokio::test]
async fn identical_payloads_get_distinct_ids() {
    let store = QueueStore::open_in_memory().unwrap();
    store
        .publish(REQUESTS_QUEUE, vec![request("same"), request("same")])
        .await
        .unwrap();

    let leased = store.lease(REQUESTS_QUEUE, 10, 60).await.unwrap();
    assert_eq!(leased.len(), 2);
    assert_ne!(leased[0].queue_message_id, leased[1].queue_message_id);
    assert!(leased
        .iter()
        .all(|e| e.queue_message_id.len() == 24
            && e.queue_message_id.chars().all(|c| c.is_ascii_hexdigit())));
}

#[tokio::test]
async fn concurrent_leases_never_overlap() {
    let store = QueueStore::open_in_memory().unwrap();
    store.publish(REQUESTS_QUEUE, requests(50)).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let store = store.clone();
        tasks.push(tokio::spawn(async move {
            store.lease(REQUESTS_QUEUE, 7, 60).await.unwrap()
        }));
    }

    let mut seen = HashSet::new();
    let mut total = 0;
    for task in tasks {
        for envelope in task.await.unwrap() {
            total += 1;
            assert!(
                seen.insert(envelope.queue_message_id),
                "message leased twice"
            );
        }
    }
    assert_eq!(total, 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn separate_instances_on_one_file_never_overlap() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("queue.sqlite");
    let first = QueueStore::open(&path).unwrap();
    let second = QueueStore::open(&path).unwrap();
    first.publish(REQUESTS_QUEUE, requests(40)).await.unwrap();

    let mut seen = HashSet::new();
    loop {
        let (a, b) = tokio::join!(
            first.lease(REQUESTS_QUEUE, 3, 60),
            second.lease(REQUESTS_QUEUE, 3, 60)
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        if a.is_empty() && b.is_empty() {
            break;
        }
        for envelope in a.into_iter().chain(b) {
            assert!(seen.insert(envelope.queue_message_id), "message leased twice");
        }
    }
    assert_eq!(seen.len(), 40);
}

#[tokio::test]
async fn oldest_pending_message_is_leased_first() {
    let clock = ManualClock::new();
    let store = QueueStore::open_in_memory()
        .unwrap()
        .with_clock(clock.clone());

    store.publish(REQUESTS_QUEUE, vec![request("first")]).await.unwrap();
    clock.advance(Duration::milliseconds(1));
    store.publish(REQUESTS_QUEUE, vec![request("second")]).await.unwrap();

    let leased = store.lease(REQUESTS_QUEUE, 1, 60).await.unwrap();
    assert_eq!(leased[0].payload.doc_id.as_deref(), Some("first"));
    let leased = store.lease(REQUESTS_QUEUE, 1, 60).await.unwrap();
    assert_eq!(leased[0].payload.doc_id.as_deref(), Some("second"));
}

#[tokio::test]
async fn same_instant_publishes_keep_insertion_order() {
    let clock = ManualClock::new();
    let store = QueueStore::open_in_memory()
        .unwrap()
        .with_clock(clock.clone());

    store.publish(REQUESTS_QUEUE, requests(5)).await.unwrap();

    let docs: Vec<String> = store
        .lease(REQUESTS_QUEUE, 5, 60)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|e| e.payload.doc_id)
        .collect();
    assert_eq!(docs, vec!["doc-0", "doc-1", "doc-2", "doc-3", "doc-4"]);
}

#[tokio::test]
async fn expired_lease_becomes_selectable_again() {
    let clock = ManualClock::new();
    let store = QueueStore::open_in_memory()
        .unwrap()
        .with_clock(clock.clone());
    store.publish(REQUESTS_QUEUE, vec![request("a")]).await.unwrap();

    let leased = store.lease(REQUESTS_QUEUE, 1, 30).await.unwrap();
    let id = leased[0].queue_message_id.clone();

    clock.advance(Duration::seconds(29));
    assert!(store.lease(REQUESTS_QUEUE, 1, 30).await.unwrap().is_empty());

    clock.advance(Duration::seconds(1));
    let again = store.lease(REQUESTS_QUEUE, 1, 30).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].queue_message_id, id);

    let message = store.get(REQUESTS_QUEUE, &id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Leased);
    assert_eq!(
        message.lease_until,
        Some(clock.now() + Duration::seconds(30))
    );
}

#[tokio::test]
async fn ack_is_idempotent_and_isolated() {
    let store = QueueStore::open_in_memory().unwrap();
    store.publish(REQUESTS_QUEUE, requests(2)).await.unwrap();
    let leased = store.lease(REQUESTS_QUEUE, 1, 60).await.unwrap();
    let id = leased[0].queue_message_id.clone();

    assert_eq!(store.ack(REQUESTS_QUEUE, vec![id.clone()]).await.unwrap(), 1);
    assert_eq!(store.ack(REQUESTS_QUEUE, vec![id.clone()]).await.unwrap(), 1);
    assert_eq!(
        store
            .ack(REQUESTS_QUEUE, vec!["never-existed".to_string()])
            .await
            .unwrap(),
        1
    );
    assert_eq!(store.ack(REQUESTS_QUEUE, vec![]).await.unwrap(), 0);

    let depth = store.depth(REQUESTS_QUEUE).await.unwrap();
    assert_eq!(depth.pending, 1);
    assert_eq!(depth.leased, 0);
}

#[tokio::test]
async fn ack_on_one_queue_leaves_the_other_alone() {
    let store = QueueStore::open_in_memory().unwrap();
    store.publish(REQUESTS_QUEUE, requests(1)).await.unwrap();
    let id = store.lease(REQUESTS_QUEUE, 1, 60).await.unwrap()[0]
        .queue_message_id
        .clone();

    store.ack(RESULTS_QUEUE, vec![id.clone()]).await.unwrap();
    assert!(store.get(REQUESTS_QUEUE, &id).await.unwrap().is_some());
}

#[tokio::test]
async fn messages_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("nested").join("queue.sqlite");

    {
        let store = QueueStore::open(&path).unwrap();
        store.publish(REQUESTS_QUEUE, requests(3)).await.unwrap();
        store.lease(REQUESTS_QUEUE, 1, 3600).await.unwrap();
    }

    let store = QueueStore::open(&path).unwrap();
    let depth = store.depth(REQUESTS_QUEUE).await.unwrap();
    assert_eq!(depth.pending, 2);
    assert_eq!(depth.leased, 1);
}
