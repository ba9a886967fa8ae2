//! SQLite-backed durable queue
//!
//! Tables:
//! - `queue_channels` - registered (topic, channel) pairs
//! - `queue_messages` - one row per pending (message, channel); rows with a
//!   NULL channel are the backlog of a topic nobody has subscribed to yet
//!
//! A delivery claims a row (`in_flight = 1`). Ack deletes it, requeue clears
//! the flag and bumps `attempts`. Rows left in flight by a consumer that died
//! are requeued when the channel subscribes again, which is what makes
//! delivery at-least-once.

use super::{
    ConsumerOptions, ConsumerStats, Message, MessageHandler, Subscription, Transport,
    TransportError,
};
use crate::sqlite_pragma::open_database;
use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS queue_channels (
    topic       TEXT NOT NULL,
    channel     TEXT NOT NULL,
    created_at  INTEGER NOT NULL,
    PRIMARY KEY (topic, channel)
);

CREATE TABLE IF NOT EXISTS queue_messages (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    topic         TEXT NOT NULL,
    channel       TEXT,
    body          BLOB NOT NULL,
    attempts      INTEGER NOT NULL DEFAULT 0,
    in_flight     INTEGER NOT NULL DEFAULT 0,
    published_at  INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_queue_ready
    ON queue_messages(topic, channel, in_flight, id);
"#;

enum Outcome {
    Acked,
    Requeued,
    Discarded,
}

#[derive(Clone)]
pub struct SqliteQueue {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueue {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, TransportError> {
        let conn = open_database(db_path.as_ref())?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ Vote queue ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Messages waiting (ready or in flight) for a channel
    pub fn depth(&self, topic: &str, channel: &str) -> Result<u64, TransportError> {
        let conn = self.conn();
        let depth: i64 = conn.query_row(
            "SELECT COUNT(*) FROM queue_messages WHERE topic = ?1 AND channel = ?2",
            params![topic, channel],
            |row| row.get(0),
        )?;
        Ok(depth as u64)
    }

    /// Register the channel, adopt the topic backlog and requeue orphaned deliveries
    fn register_channel(&self, topic: &str, channel: &str) -> Result<(usize, usize), TransportError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT OR IGNORE INTO queue_channels (topic, channel, created_at) VALUES (?1, ?2, ?3)",
            params![topic, channel, chrono::Utc::now().timestamp()],
        )?;
        let adopted = tx.execute(
            "UPDATE queue_messages SET channel = ?2 WHERE topic = ?1 AND channel IS NULL",
            params![topic, channel],
        )?;
        let recovered = tx.execute(
            "UPDATE queue_messages SET in_flight = 0
             WHERE topic = ?1 AND channel = ?2 AND in_flight = 1",
            params![topic, channel],
        )?;

        tx.commit()?;
        Ok((adopted, recovered))
    }

    /// Claim up to `limit` ready messages, oldest first
    fn claim(&self, topic: &str, channel: &str, limit: usize) -> Result<Vec<Message>, TransportError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let messages = {
            let mut stmt = tx.prepare(
                "SELECT id, body, attempts FROM queue_messages
                 WHERE topic = ?1 AND channel = ?2 AND in_flight = 0
                 ORDER BY id ASC
                 LIMIT ?3",
            )?;
            let rows = stmt.query_map(params![topic, channel, limit as i64], |row| {
                Ok(Message {
                    id: row.get(0)?,
                    body: row.get(1)?,
                    attempts: row.get::<_, i64>(2)?.max(0) as u32,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        for message in &messages {
            tx.execute(
                "UPDATE queue_messages SET in_flight = 1 WHERE id = ?1",
                params![message.id],
            )?;
        }

        tx.commit()?;
        Ok(messages)
    }

    fn ack(&self, id: i64) -> Result<(), TransportError> {
        self.conn()
            .execute("DELETE FROM queue_messages WHERE id = ?1", params![id])?;
        Ok(())
    }

    fn requeue(&self, message: &Message, max_attempts: u32) -> Result<Outcome, TransportError> {
        let attempts = message.attempts + 1;
        if attempts >= max_attempts {
            self.ack(message.id)?;
            return Ok(Outcome::Discarded);
        }

        self.conn().execute(
            "UPDATE queue_messages SET in_flight = 0, attempts = ?2 WHERE id = ?1",
            params![message.id, attempts as i64],
        )?;
        Ok(Outcome::Requeued)
    }

    async fn deliver(
        self,
        handler: Arc<dyn MessageHandler>,
        message: Message,
        max_attempts: u32,
    ) -> Result<Outcome, TransportError> {
        match handler.handle(&message).await {
            Ok(()) => {
                self.ack(message.id)?;
                Ok(Outcome::Acked)
            }
            Err(e) => {
                let outcome = self.requeue(&message, max_attempts)?;
                match outcome {
                    Outcome::Discarded => log::error!(
                        "❌ Message {} discarded after {} attempts: {}",
                        message.id,
                        message.attempts + 1,
                        e
                    ),
                    _ => log::warn!("⚠️  Message {} requeued: {}", message.id, e),
                }
                Ok(outcome)
            }
        }
    }

    async fn consume(
        self,
        topic: String,
        channel: String,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
        mut stop_rx: watch::Receiver<bool>,
    ) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut in_flight: JoinSet<Result<Outcome, TransportError>> = JoinSet::new();

        log::info!(
            "📡 Consuming {}/{} (max in flight: {})",
            topic,
            channel,
            options.max_in_flight
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }

            while let Some(result) = in_flight.try_join_next() {
                record_outcome(&mut stats, result);
            }

            let free = options.max_in_flight.saturating_sub(in_flight.len());
            let claimed = if free > 0 {
                match self.claim(&topic, &channel, free) {
                    Ok(messages) => messages,
                    Err(e) => {
                        log::error!("❌ Failed to claim messages from {}/{}: {}", topic, channel, e);
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            if !claimed.is_empty() {
                stats.delivered += claimed.len() as u64;
                for message in claimed {
                    in_flight.spawn(self.clone().deliver(
                        handler.clone(),
                        message,
                        options.max_attempts,
                    ));
                }
                continue;
            }

            // Nothing to claim (or no free slot): wait for a slot, new messages or stop
            tokio::select! {
                changed = stop_rx.changed() => {
                    // Sender gone means the Subscription was dropped
                    if changed.is_err() {
                        break;
                    }
                }
                Some(result) = in_flight.join_next(), if !in_flight.is_empty() => {
                    record_outcome(&mut stats, result);
                }
                _ = tokio::time::sleep(options.poll_interval) => {}
            }
        }

        log::info!(
            "🔄 Consumer {}/{} stopping, waiting for {} in-flight messages",
            topic,
            channel,
            in_flight.len()
        );
        while let Some(result) = in_flight.join_next().await {
            record_outcome(&mut stats, result);
        }

        log::info!(
            "✅ Consumer {}/{} stopped: {} delivered, {} acked, {} requeued, {} discarded",
            topic,
            channel,
            stats.delivered,
            stats.acked,
            stats.requeued,
            stats.discarded
        );
        stats
    }
}

fn record_outcome(
    stats: &mut ConsumerStats,
    result: Result<Result<Outcome, TransportError>, tokio::task::JoinError>,
) {
    match result {
        Ok(Ok(Outcome::Acked)) => stats.acked += 1,
        Ok(Ok(Outcome::Requeued)) => stats.requeued += 1,
        Ok(Ok(Outcome::Discarded)) => stats.discarded += 1,
        // The row stays in flight and is requeued on the next subscribe
        Ok(Err(e)) => log::error!("❌ Failed to settle delivery: {}", e),
        Err(e) => log::error!("❌ Delivery task failed: {}", e),
    }
}

impl SqliteQueue {
    /// Store one message per registered channel, or in the topic backlog
    ///
    /// Blocking: waits up to the busy timeout for another connection's write.
    fn publish_blocking(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = chrono::Utc::now().timestamp();

        let channels: Vec<String> = {
            let mut stmt = tx.prepare("SELECT channel FROM queue_channels WHERE topic = ?1")?;
            let rows = stmt.query_map(params![topic], |row| row.get(0))?;
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if channels.is_empty() {
            tx.execute(
                "INSERT INTO queue_messages (topic, channel, body, published_at)
                 VALUES (?1, NULL, ?2, ?3)",
                params![topic, payload, now],
            )?;
        } else {
            for channel in &channels {
                tx.execute(
                    "INSERT INTO queue_messages (topic, channel, body, published_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![topic, channel, payload, now],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[async_trait]
impl Transport for SqliteQueue {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError> {
        let queue = self.clone();
        let topic = topic.to_string();
        let payload = payload.to_vec();
        // Off the runtime threads, so a caller's timeout can fire while SQLite waits
        tokio::task::spawn_blocking(move || queue.publish_blocking(&topic, &payload)).await?
    }

    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
    ) -> Result<Subscription, TransportError> {
        let (adopted, recovered) = self.register_channel(topic, channel)?;
        if adopted > 0 {
            log::info!("📥 Channel {}/{} adopted {} backlog messages", topic, channel, adopted);
        }
        if recovered > 0 {
            log::warn!(
                "⚠️  Channel {}/{} requeued {} messages left in flight by a previous consumer",
                topic,
                channel,
                recovered
            );
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.clone().consume(
            topic.to_string(),
            channel.to_string(),
            handler,
            options,
            stop_rx,
        ));

        Ok(Subscription::new(stop_tx, handle))
    }

    async fn stop_producer(&self) -> Result<(), TransportError> {
        let conn = self.conn();
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))?;
        log::info!("✅ Vote queue checkpointed");
        Ok(())
    }
}
