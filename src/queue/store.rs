//! SQLite-backed queue store.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;

use super::clock::{Clock, SystemClock};
use super::error::{QueueError, Result};
use super::id::message_id;
use super::validate_queue_name;
use crate::models::{MessageStatus, QueueEnvelope, QueueMessage, QueuePayload};
use crate::utils::{format_timestamp, parse_timestamp};

/// Upper bound on a single lease. Longer requests are capped.
pub const MAX_LEASE_SECONDS: u64 = 366 * 24 * 60 * 60;

/// How long a writer waits on another process's lock before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Message counts for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueDepth {
    pub pending: u64,
    /// Includes leases that have expired but not yet been reclaimed.
    pub leased: u64,
}

struct StoreInner {
    conn: Mutex<Connection>,
    /// Mixed into message ids so same-instant publishes never collide.
    sequence: AtomicU64,
    location: String,
}

/// Durable store for any number of independently named queues.
///
/// Cloning is cheap and clones share the same connection. Every operation
/// takes the connection mutex and runs inside a single `BEGIN IMMEDIATE`
/// transaction, so publish, lease, and ack are serialized per store and
/// atomic across processes sharing the database file. The mutex is the
/// throughput ceiling: queues do not proceed in parallel.
#[derive(Clone)]
pub struct QueueStore {
    inner: Arc<StoreInner>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for QueueStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueStore")
            .field("location", &self.inner.location)
            .finish()
    }
}

impl QueueStore {
    /// Open (or create) a queue database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        tracing::debug!("Opened queue database {} (journal_mode={})", path.display(), mode);

        Self::from_connection(conn, path.display().to_string())
    }

    /// Open a private in-memory store.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, ":memory:".to_string())
    }

    fn from_connection(conn: Connection, location: String) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self {
            inner: Arc::new(StoreInner {
                conn: Mutex::new(conn),
                sequence: AtomicU64::new(0),
                location,
            }),
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source used for timestamps and lease expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Where the database lives (a path, or `:memory:`).
    pub fn location(&self) -> &str {
        &self.inner.location
    }

    /// Insert `payloads` as pending messages. All or nothing.
    ///
    /// Returns the number of messages inserted, which is always
    /// `payloads.len()` on success. A payload whose extension data reuses a
    /// typed field name is rejected before anything is written.
    pub async fn publish(&self, queue: &str, payloads: Vec<QueuePayload>) -> Result<usize> {
        validate_queue_name(queue)?;
        if payloads.is_empty() {
            return Ok(0);
        }
        let shadowed = payloads
            .iter()
            .enumerate()
            .find_map(|(index, payload)| payload.shadowed_field().map(|field| (index, field)));
        if let Some((index, field)) = shadowed {
            return Err(QueueError::InvalidPayload(format!(
                "message {} carries {:?} as an extension field",
                index, field
            )));
        }
        let queue = queue.to_string();
        self.run_blocking(move |store| store.publish_blocking(&queue, &payloads))
            .await
    }

    /// Lease up to `limit` pending messages for `lease_seconds`.
    ///
    /// Expired leases on this queue are reclaimed first, then the oldest
    /// pending messages are granted. The three steps share one transaction,
    /// so concurrent callers never receive overlapping messages.
    pub async fn lease(
        &self,
        queue: &str,
        limit: usize,
        lease_seconds: u64,
    ) -> Result<Vec<QueueEnvelope>> {
        validate_queue_name(queue)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        let queue = queue.to_string();
        self.run_blocking(move |store| store.lease_blocking(&queue, limit, lease_seconds))
            .await
    }

    /// Delete messages by id, whatever their status.
    ///
    /// Unknown ids are ignored. The count returned is the number of ids
    /// submitted, not the number of rows that existed.
    pub async fn ack(&self, queue: &str, ids: Vec<String>) -> Result<usize> {
        validate_queue_name(queue)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let queue = queue.to_string();
        self.run_blocking(move |store| store.ack_blocking(&queue, &ids))
            .await
    }

    /// Count pending and leased messages in a queue.
    pub async fn depth(&self, queue: &str) -> Result<QueueDepth> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        self.run_blocking(move |store| store.depth_blocking(&queue))
            .await
    }

    /// Fetch one message without changing its state.
    pub async fn get(&self, queue: &str, id: &str) -> Result<Option<QueueMessage>> {
        validate_queue_name(queue)?;
        let queue = queue.to_string();
        let id = id.to_string();
        self.run_blocking(move |store| store.get_blocking(&queue, &id))
            .await
    }

    async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&QueueStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store)).await?
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.inner.conn.lock().map_err(|_| QueueError::LockPoisoned)
    }

    fn publish_blocking(&self, queue: &str, payloads: &[QueuePayload]) -> Result<usize> {
        let now = self.clock.now();
        let created_at = format_timestamp(now);
        let id_seed = now
            .timestamp_nanos_opt()
            .map(|nanos| nanos.to_string())
            .unwrap_or_else(|| created_at.clone());

        let rows = payloads
            .iter()
            .map(|payload| {
                let sequence = self.inner.sequence.fetch_add(1, Ordering::Relaxed);
                Ok((
                    message_id(payload, &id_seed, sequence),
                    serde_json::to_string(payload)?,
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut insert = tx.prepare(
                r#"
                INSERT INTO queue_messages (queue_name, message_id, payload, status, created_at, lease_until)
                VALUES (?1, ?2, ?3, 'pending', ?4, NULL)
                "#,
            )?;
            for (id, body) in &rows {
                insert.execute(params![queue, id, body, created_at])?;
            }
        }
        tx.commit()?;

        tracing::debug!("Published {} message(s) to {}", rows.len(), queue);
        Ok(rows.len())
    }

    fn lease_blocking(
        &self,
        queue: &str,
        limit: usize,
        lease_seconds: u64,
    ) -> Result<Vec<QueueEnvelope>> {
        let now = self.clock.now();
        let now_str = format_timestamp(now);
        let lease_until = format_timestamp(lease_deadline(now, lease_seconds));
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        // A lease covers [granted, lease_until); at lease_until it is over.
        let reclaimed = tx.execute(
            r#"
            UPDATE queue_messages
            SET status = 'pending', lease_until = NULL
            WHERE queue_name = ?1 AND status = 'leased' AND lease_until <= ?2
            "#,
            params![queue, now_str],
        )?;
        if reclaimed > 0 {
            tracing::info!("Reclaimed {} expired lease(s) on {}", reclaimed, queue);
        }

        let rows: Vec<(String, String)> = {
            let mut select = tx.prepare(
                r#"
                SELECT message_id, payload FROM queue_messages
                WHERE queue_name = ?1 AND status = 'pending'
                ORDER BY created_at ASC, rowid ASC
                LIMIT ?2
                "#,
            )?;
            let rows = select
                .query_map(params![queue, limit], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };

        if rows.is_empty() {
            tx.commit()?;
            return Ok(Vec::new());
        }

        // Decode before granting so an unreadable row leases nothing.
        let envelopes = rows
            .into_iter()
            .map(|(id, body)| {
                let payload = serde_json::from_str::<QueuePayload>(&body).map_err(|e| {
                    QueueError::CorruptRow {
                        queue: queue.to_string(),
                        detail: format!("message {}: {}", id, e),
                    }
                })?;
                Ok(QueueEnvelope {
                    queue_message_id: id,
                    payload,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        {
            let mut grant = tx.prepare(
                r#"
                UPDATE queue_messages
                SET status = 'leased', lease_until = ?1
                WHERE queue_name = ?2 AND message_id = ?3
                "#,
            )?;
            for envelope in &envelopes {
                grant.execute(params![lease_until, queue, envelope.queue_message_id])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Leased {} message(s) from {} until {}",
            envelopes.len(),
            queue,
            lease_until
        );
        Ok(envelopes)
    }

    fn ack_blocking(&self, queue: &str, ids: &[String]) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut deleted = 0usize;
        {
            let mut delete =
                tx.prepare("DELETE FROM queue_messages WHERE queue_name = ?1 AND message_id = ?2")?;
            for id in ids {
                deleted += delete.execute(params![queue, id])?;
            }
        }
        tx.commit()?;

        tracing::debug!(
            "Acknowledged {} id(s) on {} ({} present)",
            ids.len(),
            queue,
            deleted
        );
        Ok(ids.len())
    }

    fn depth_blocking(&self, queue: &str) -> Result<QueueDepth> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM queue_messages WHERE queue_name = ?1 GROUP BY status",
        )?;
        let counts = stmt
            .query_map(params![queue], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut depth = QueueDepth::default();
        for (status, count) in counts {
            let count = count.max(0) as u64;
            match MessageStatus::from_str(&status) {
                Some(MessageStatus::Pending) => depth.pending = count,
                Some(MessageStatus::Leased) => depth.leased = count,
                None => {
                    return Err(QueueError::CorruptRow {
                        queue: queue.to_string(),
                        detail: format!("unknown status {:?}", status),
                    })
                }
            }
        }
        Ok(depth)
    }

    fn get_blocking(&self, queue: &str, id: &str) -> Result<Option<QueueMessage>> {
        let conn = self.lock()?;
        let row: Option<(String, String, String, Option<String>)> = conn
            .query_row(
                r#"
                SELECT payload, status, created_at, lease_until FROM queue_messages
                WHERE queue_name = ?1 AND message_id = ?2
                "#,
                params![queue, id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;

        let Some((body, status, created_at, lease_until)) = row else {
            return Ok(None);
        };

        let corrupt = |detail: String| QueueError::CorruptRow {
            queue: queue.to_string(),
            detail: format!("message {}: {}", id, detail),
        };
        let payload = serde_json::from_str(&body).map_err(|e| corrupt(e.to_string()))?;
        let status = MessageStatus::from_str(&status)
            .ok_or_else(|| corrupt(format!("unknown status {:?}", status)))?;
        let created_at = parse_timestamp(&created_at)
            .ok_or_else(|| corrupt(format!("bad created_at {:?}", created_at)))?;
        let lease_until = match lease_until {
            Some(s) => Some(
                parse_timestamp(&s).ok_or_else(|| corrupt(format!("bad lease_until {:?}", s)))?,
            ),
            None => None,
        };

        Ok(Some(QueueMessage {
            id: id.to_string(),
            payload,
            status,
            created_at,
            lease_until,
        }))
    }
}

/// Lease expiry for a lease granted at `now`.
fn lease_deadline(now: DateTime<Utc>, lease_seconds: u64) -> DateTime<Utc> {
    // Capped, so the cast and the addition cannot overflow.
    let seconds = lease_seconds.min(MAX_LEASE_SECONDS) as i64;
    now + chrono::Duration::seconds(seconds)
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS queue_messages (
            queue_name TEXT NOT NULL,
            message_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at TEXT NOT NULL,
            lease_until TEXT,

            PRIMARY KEY (queue_name, message_id),
            CHECK (
                (status = 'pending' AND lease_until IS NULL)
                OR (status = 'leased' AND lease_until IS NOT NULL)
            )
        );

        CREATE INDEX IF NOT EXISTS idx_queue_messages_status
            ON queue_messages(queue_name, status, created_at);
        CREATE INDEX IF NOT EXISTS idx_queue_messages_lease
            ON queue_messages(queue_name, lease_until) WHERE status = 'leased';
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct ManualClock(StdMutex<DateTime<Utc>>);

    impl ManualClock {
        fn new() -> Arc<Self> {
            let start = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc);
            Arc::new(Self(StdMutex::new(start)))
        }

        fn advance(&self, by: chrono::Duration) {
            *self.0.lock().unwrap() += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn request(doc: &str) -> QueuePayload {
        QueuePayload::request(Some("job".to_string()), doc, &format!("/pdf/{}.pdf", doc))
    }

    #[tokio::test]
    async fn test_publish_empty_is_noop() {
        let store = QueueStore::open_in_memory().unwrap();
        assert_eq!(store.publish("requests", vec![]).await.unwrap(), 0);
        assert_eq!(store.depth("requests").await.unwrap(), QueueDepth::default());
    }

    #[tokio::test]
    async fn test_shadowing_extension_key_is_rejected() {
        let store = QueueStore::open_in_memory().unwrap();
        let mut shadowing = request("a");
        shadowing
            .extra
            .insert("jobId".to_string(), serde_json::json!("other"));

        let err = store
            .publish("requests", vec![shadowing, request("b")])
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::InvalidPayload(_)));
        assert_eq!(store.depth("requests").await.unwrap(), QueueDepth::default());

        store.publish("requests", vec![request("c")]).await.unwrap();
        let leased = store.lease("requests", 10, 60).await.unwrap();
        assert_eq!(leased.len(), 1);
        assert_eq!(leased[0].payload.doc_id.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_publish_then_lease_returns_payloads() {
        let store = QueueStore::open_in_memory().unwrap();
        let payloads = vec![request("a"), request("b")];
        assert_eq!(store.publish("requests", payloads.clone()).await.unwrap(), 2);

        let leased = store.lease("requests", 10, 60).await.unwrap();
        let got: Vec<_> = leased.into_iter().map(|e| e.payload).collect();
        assert_eq!(got, payloads);
    }

    #[tokio::test]
    async fn test_lease_sets_status_and_deadline() {
        let clock = ManualClock::new();
        let store = QueueStore::open_in_memory().unwrap().with_clock(clock.clone());
        store.publish("requests", vec![request("a")]).await.unwrap();

        let leased = store.lease("requests", 1, 90).await.unwrap();
        let message = store
            .get("requests", &leased[0].queue_message_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.status, MessageStatus::Leased);
        assert_eq!(
            message.lease_until,
            Some(clock.now() + chrono::Duration::seconds(90))
        );
    }

    #[tokio::test]
    async fn test_zero_limit_returns_nothing() {
        let store = QueueStore::open_in_memory().unwrap();
        store.publish("requests", vec![request("a")]).await.unwrap();
        assert!(store.lease("requests", 0, 60).await.unwrap().is_empty());
        assert_eq!(store.depth("requests").await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let store = QueueStore::open_in_memory().unwrap();
        store.publish("requests", vec![request("a")]).await.unwrap();
        assert!(store.lease("results", 10, 60).await.unwrap().is_empty());
        assert_eq!(store.lease("requests", 10, 60).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimed_at_deadline() {
        let clock = ManualClock::new();
        let store = QueueStore::open_in_memory().unwrap().with_clock(clock.clone());
        store.publish("requests", vec![request("a")]).await.unwrap();
        let first = store.lease("requests", 1, 30).await.unwrap();

        clock.advance(chrono::Duration::seconds(30) - chrono::Duration::microseconds(1));
        assert!(store.lease("requests", 1, 30).await.unwrap().is_empty());

        clock.advance(chrono::Duration::microseconds(1));
        let second = store.lease("requests", 1, 30).await.unwrap();
        assert_eq!(second[0].queue_message_id, first[0].queue_message_id);
    }

    #[tokio::test]
    async fn test_ack_deletes_regardless_of_status() {
        let store = QueueStore::open_in_memory().unwrap();
        store
            .publish("requests", vec![request("a"), request("b")])
            .await
            .unwrap();
        let leased = store.lease("requests", 1, 60).await.unwrap();

        let mut ids: Vec<String> = vec![leased[0].queue_message_id.clone()];
        let pending = store.lease("requests", 1, 60).await.unwrap();
        ids.push(pending[0].queue_message_id.clone());
        ids.push("never-existed".to_string());

        assert_eq!(store.ack("requests", ids).await.unwrap(), 3);
        assert_eq!(store.depth("requests").await.unwrap(), QueueDepth::default());
    }

    #[tokio::test]
    async fn test_invalid_queue_name_rejected() {
        let store = QueueStore::open_in_memory().unwrap();
        let err = store.publish("no spaces", vec![request("a")]).await;
        assert!(matches!(err, Err(QueueError::InvalidQueueName(_))));
    }

    #[tokio::test]
    async fn test_corrupt_payload_leases_nothing() {
        let store = QueueStore::open_in_memory().unwrap();
        store.publish("requests", vec![request("a")]).await.unwrap();
        {
            let conn = store.lock().unwrap();
            conn.execute("UPDATE queue_messages SET payload = '[1,2]'", [])
                .unwrap();
        }

        let err = store.lease("requests", 5, 60).await;
        assert!(matches!(err, Err(QueueError::CorruptRow { .. })));
        assert_eq!(store.depth("requests").await.unwrap().pending, 1);
    }

    #[test]
    fn test_lease_deadline_is_capped() {
        let now = Utc::now();
        assert_eq!(
            lease_deadline(now, u64::MAX),
            now + chrono::Duration::seconds(MAX_LEASE_SECONDS as i64)
        );
    }
}
