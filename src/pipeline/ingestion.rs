//! Ingestion: vote source -> membership filter -> handoff channel
//!
//! Reads until the source is exhausted or the drain begins. Votes for options
//! no poll offers are dropped here, before they reach the queue. Sending on
//! the bounded handoff channel blocks when the publisher falls behind, which
//! stalls the source instead of buffering without limit.
//!
//! Returning drops the handoff sender, which closes the channel and lets the
//! publisher drain and stop.

use crate::shutdown::ShutdownListener;
use crate::source::EventSource;
use crate::store::OptionSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionEnd {
    /// The source has no more votes
    Exhausted,
    /// The drain began
    Stopped,
    /// The publisher is gone
    ChannelClosed,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestionStats {
    pub received: u64,
    pub forwarded: u64,
    /// Not an option of any poll
    pub rejected: u64,
    pub reconnects: u64,
}

pub struct Ingestion<S> {
    source: S,
    options: OptionSet,
    reconnect_every: Option<Duration>,
}

impl<S: EventSource> Ingestion<S> {
    pub fn new(source: S, options: OptionSet) -> Self {
        Self {
            source,
            options,
            reconnect_every: None,
        }
    }

    /// Force a source reconnect on this period so a stalled stream is restarted
    pub fn with_reconnect_every(mut self, reconnect_every: Option<Duration>) -> Self {
        self.reconnect_every = reconnect_every;
        self
    }

    pub async fn run(
        mut self,
        handoff: mpsc::Sender<String>,
        mut shutdown: ShutdownListener,
    ) -> (IngestionEnd, IngestionStats) {
        let mut stats = IngestionStats::default();
        let period = self.reconnect_every.unwrap_or(Duration::from_secs(3600));
        let mut reconnect_timer = interval_at(Instant::now() + period, period);
        reconnect_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!(
            "📡 Ingesting votes from {} ({} valid options)",
            self.source.describe(),
            self.options.len()
        );

        let end = loop {
            if !shutdown.is_running() {
                break IngestionEnd::Stopped;
            }

            let vote = tokio::select! {
                _ = shutdown.draining() => break IngestionEnd::Stopped,
                _ = reconnect_timer.tick(), if self.reconnect_every.is_some() => {
                    log::info!("🔄 Periodic reconnect of {}", self.source.describe());
                    stats.reconnects += 1;
                    if let Err(e) = self.source.reconnect().await {
                        log::error!("❌ Source reconnect failed, stopping ingestion: {}", e);
                        break IngestionEnd::Exhausted;
                    }
                    continue;
                }
                next = self.source.next_vote() => next,
            };

            match vote {
                Ok(Some(vote)) => {
                    stats.received += 1;
                    if !self.options.contains(&vote) {
                        stats.rejected += 1;
                        log::debug!("Skipping vote for unknown option: {:?}", vote);
                        continue;
                    }

                    // Blocks while the handoff channel is full
                    tokio::select! {
                        sent = handoff.send(vote) => {
                            if sent.is_err() {
                                log::error!("❌ Handoff channel closed, stopping ingestion");
                                break IngestionEnd::ChannelClosed;
                            }
                            stats.forwarded += 1;
                        }
                        _ = shutdown.draining() => break IngestionEnd::Stopped,
                    }
                }
                Ok(None) => break IngestionEnd::Exhausted,
                Err(e) => {
                    log::warn!("⚠️  Source error on {}: {}, reconnecting", self.source.describe(), e);
                    stats.reconnects += 1;
                    if let Err(e) = self.source.reconnect().await {
                        log::error!("❌ Source reconnect failed, stopping ingestion: {}", e);
                        break IngestionEnd::Exhausted;
                    }
                }
            }
        };

        log::info!(
            "✅ Ingestion stopped ({:?}): {} received, {} forwarded, {} rejected",
            end,
            stats.received,
            stats.forwarded,
            stats.rejected
        );
        (end, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
    use crate::source::{LineSource, SourceError};
    use async_trait::async_trait;

    /// Yields the scripted votes, then blocks forever
    struct ScriptedSource {
        votes: Vec<Result<String, ()>>,
        reconnects: usize,
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_vote(&mut self) -> Result<Option<String>, SourceError> {
            if self.votes.is_empty() {
                std::future::pending::<()>().await;
            }
            match self.votes.remove(0) {
                Ok(vote) => Ok(Some(vote)),
                Err(()) => Err(SourceError::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "stream reset",
                ))),
            }
        }

        async fn reconnect(&mut self) -> Result<(), SourceError> {
            self.reconnects += 1;
            Ok(())
        }

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn options() -> OptionSet {
        ["a", "b"].into_iter().collect()
    }

    #[tokio::test]
    async fn test_filters_unknown_votes_and_stops_on_exhaustion() {
        let input: &[u8] = b"a\nzzz\nb\na\n";
        let coordinator = ShutdownCoordinator::new();
        let (tx, mut rx) = mpsc::channel(16);

        let (end, stats) = Ingestion::new(LineSource::new(input, "test"), options())
            .run(tx, coordinator.subscribe())
            .await;

        assert_eq!(end, IngestionEnd::Exhausted);
        assert_eq!(stats.received, 4);
        assert_eq!(stats.forwarded, 3);
        assert_eq!(stats.rejected, 1);

        let mut forwarded = Vec::new();
        while let Some(vote) = rx.recv().await {
            forwarded.push(vote);
        }
        assert_eq!(forwarded, vec!["a", "b", "a"]);
    }

    #[tokio::test]
    async fn test_source_error_triggers_reconnect() {
        let source = ScriptedSource {
            votes: vec![Ok("a".to_string()), Err(()), Ok("b".to_string())],
            reconnects: 0,
        };
        let coordinator = ShutdownCoordinator::new();
        let (tx, mut rx) = mpsc::channel(16);

        let task = tokio::spawn(Ingestion::new(source, options()).run(tx, coordinator.subscribe()));

        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await.as_deref(), Some("b"));

        coordinator.begin_drain(ShutdownReason::Requested);
        let (end, stats) = task.await.unwrap();

        assert_eq!(end, IngestionEnd::Stopped);
        assert_eq!(stats.reconnects, 1);
        // Sender dropped with the task: channel closed
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_drain_interrupts_blocked_send() {
        let source = ScriptedSource {
            votes: vec![Ok("a".to_string()), Ok("b".to_string())],
            reconnects: 0,
        };
        let coordinator = ShutdownCoordinator::new();
        // Capacity 1 and nobody reading: the second send blocks
        let (tx, mut rx) = mpsc::channel(1);

        let task = tokio::spawn(Ingestion::new(source, options()).run(tx, coordinator.subscribe()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());

        coordinator.begin_drain(ShutdownReason::Signal);
        let (end, stats) = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(end, IngestionEnd::Stopped);
        assert_eq!(stats.forwarded, 1);
        assert_eq!(rx.recv().await.as_deref(), Some("a"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_periodic_reconnect() {
        let source = ScriptedSource {
            votes: Vec::new(),
            reconnects: 0,
        };
        let coordinator = ShutdownCoordinator::new();
        let (tx, _rx) = mpsc::channel(1);

        let task = tokio::spawn(
            Ingestion::new(source, options())
                .with_reconnect_every(Some(Duration::from_millis(10)))
                .run(tx, coordinator.subscribe()),
        );
        tokio::time::sleep(Duration::from_millis(55)).await;
        coordinator.begin_drain(ShutdownReason::Requested);

        let (_, stats) = task.await.unwrap();
        assert!(stats.reconnects >= 3);
    }
}
