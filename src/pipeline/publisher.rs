//! Publisher: forwards votes from the handoff channel to the queue
//!
//! Votes are published one at a time in arrival order. A failed or timed-out
//! publish is logged and the vote is dropped, so a stuck queue holds the
//! handoff channel for at most the publish timeout per vote. The timeout only
//! bounds transports whose publish yields while waiting (`SqliteQueue` runs
//! its write on the blocking pool); a timed-out write may still land later.
//! When the channel closes, the publisher shuts the producer down and reports
//! on its completion channel.

use crate::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublisherStats {
    pub published: u64,
    /// Votes dropped because the publish failed or timed out
    pub dropped: u64,
}

pub struct Publisher {
    transport: Arc<dyn Transport>,
    topic: String,
    publish_timeout: Duration,
}

impl Publisher {
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
            publish_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_publish_timeout(mut self, publish_timeout: Duration) -> Self {
        self.publish_timeout = publish_timeout;
        self
    }

    /// Publish every vote until the channel is closed and drained
    pub async fn forward(self, mut votes: mpsc::Receiver<String>) -> PublisherStats {
        let mut stats = PublisherStats::default();

        log::info!("📤 Publisher: forwarding votes to topic '{}'", self.topic);

        while let Some(vote) = votes.recv().await {
            let publish = self.transport.publish(&self.topic, vote.as_bytes());
            match tokio::time::timeout(self.publish_timeout, publish).await {
                Ok(Ok(())) => {
                    stats.published += 1;
                    log::debug!("📤 Published vote: {}", vote);
                }
                Ok(Err(e)) => {
                    stats.dropped += 1;
                    log::warn!("⚠️  Failed to publish vote {:?}, dropping: {}", vote, e);
                }
                Err(_) => {
                    stats.dropped += 1;
                    log::warn!(
                        "⚠️  Publish of vote {:?} timed out after {:?}, dropping",
                        vote,
                        self.publish_timeout
                    );
                }
            }
        }

        log::info!("🔄 Publisher: stopping");
        if let Err(e) = self.transport.stop_producer().await {
            log::error!("❌ Publisher: producer shutdown failed: {}", e);
        }
        log::info!(
            "✅ Publisher: stopped ({} published, {} dropped)",
            stats.published,
            stats.dropped
        );

        stats
    }

    /// Run `forward` on its own task
    ///
    /// The returned receiver fires once every vote already queued on the
    /// channel has been handled and the producer is shut down.
    pub fn spawn(self, votes: mpsc::Receiver<String>) -> oneshot::Receiver<PublisherStats> {
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let stats = self.forward(votes).await;
            let _ = done_tx.send(stats);
        });
        done_rx
    }
}
