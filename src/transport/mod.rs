//! Durable pub/sub transport between the publisher and the counter
//!
//! Semantics (NSQ-like):
//! - a topic fans out to every channel (consumer group) registered on it
//! - each channel delivers a message at least once
//! - a handler `Ok` acks (deletes) the message, `Err` requeues it
//! - ordering across messages is not guaranteed

pub mod sqlite_queue;

pub use sqlite_queue::SqliteQueue;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug)]
pub enum TransportError {
    Database(rusqlite::Error),
    /// The blocking task running a queue operation panicked or was cancelled
    Task(tokio::task::JoinError),
    Closed,
}

impl From<tokio::task::JoinError> for TransportError {
    fn from(err: tokio::task::JoinError) -> Self {
        TransportError::Task(err)
    }
}

impl From<rusqlite::Error> for TransportError {
    fn from(err: rusqlite::Error) -> Self {
        TransportError::Database(err)
    }
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Database(e) => write!(f, "Queue database error: {}", e),
            TransportError::Task(e) => write!(f, "Queue task failed: {}", e),
            TransportError::Closed => write!(f, "Transport is closed"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Handler failure; the message is requeued
#[derive(Debug)]
pub struct HandlerError(pub String);

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Handler error: {}", self.0)
    }
}

impl std::error::Error for HandlerError {}

/// One delivery of a queued message
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub body: Vec<u8>,
    /// Previous failed deliveries of this message
    pub attempts: u32,
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Called concurrently from the consumer's delivery tasks
    async fn handle(&self, message: &Message) -> Result<(), HandlerError>;
}

#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub max_in_flight: usize,
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 16,
            max_attempts: 5,
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Delivery counters of one consumer run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConsumerStats {
    pub delivered: u64,
    pub acked: u64,
    pub requeued: u64,
    /// Dropped after exceeding `max_attempts`
    pub discarded: u64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Best-effort publish of one message to every channel of `topic`
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), TransportError>;

    /// Start consuming `topic` as `channel`
    async fn subscribe(
        &self,
        topic: &str,
        channel: &str,
        handler: Arc<dyn MessageHandler>,
        options: ConsumerOptions,
    ) -> Result<Subscription, TransportError>;

    /// Producer-side shutdown; called once after the last publish
    async fn stop_producer(&self) -> Result<(), TransportError>;
}

/// Handle to a running consumer task
pub struct Subscription {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<ConsumerStats>,
}

impl Subscription {
    pub fn new(stop_tx: watch::Sender<bool>, handle: JoinHandle<ConsumerStats>) -> Self {
        Self { stop_tx, handle }
    }

    /// Stop claiming new messages and wait for in-flight handler calls
    pub async fn stop(self) -> ConsumerStats {
        let _ = self.stop_tx.send(true);
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("❌ Consumer task failed: {}", e);
                ConsumerStats::default()
            }
        }
    }

    /// True once the consumer task has exited on its own
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
