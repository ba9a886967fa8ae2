//! Runtimes for the two halves of the pipeline
//!
//! Both follow the same shutdown order:
//! stop the producer side → let the downstream task drain → stop.

use crate::config::PipelineConfig;
use crate::pipeline::{
    AggregatorStats, FlushStats, Flusher, Ingestion, IngestionEnd, IngestionStats, Publisher,
    PublisherStats, SharedTally, VoteAggregator,
};
use crate::shutdown::{ShutdownCoordinator, ShutdownReason};
use crate::source::EventSource;
use crate::store::{OptionSet, Poll, PollStore, StoreError};
use crate::transport::{ConsumerOptions, ConsumerStats, Transport, TransportError};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Load every poll and the union of their options
pub async fn load_options(store: &dyn PollStore) -> Result<(Vec<Poll>, OptionSet), StoreError> {
    let polls = store.load_polls().await?;
    let options = OptionSet::from_polls(&polls);

    log::info!(
        "🗳️  Loaded {} polls, {} options: {:?}",
        polls.len(),
        options.len(),
        options.sorted()
    );
    if options.is_empty() {
        log::warn!("⚠️  No poll options found, every vote will be rejected");
    }

    Ok((polls, options))
}

#[derive(Debug, Clone, PartialEq)]
pub struct PublisherRunStats {
    pub ingestion_end: IngestionEnd,
    pub ingestion: IngestionStats,
    pub publisher: PublisherStats,
}

/// Ingestion side: source → filter → handoff channel → publisher → queue
///
/// Returns once the source is exhausted or the coordinator starts draining,
/// and every vote already on the handoff channel has been published.
pub async fn run_publisher<S>(
    source: S,
    options: OptionSet,
    transport: Arc<dyn Transport>,
    config: &PipelineConfig,
    coordinator: ShutdownCoordinator,
) -> PublisherRunStats
where
    S: EventSource + 'static,
{
    let (handoff_tx, handoff_rx) = mpsc::channel::<String>(config.handoff_buffer);
    log::info!("✅ Handoff channel created (buffer: {})", config.handoff_buffer);

    let publisher_done = Publisher::new(transport, config.topic.clone()).spawn(handoff_rx);

    let ingestion = tokio::spawn(
        Ingestion::new(source, options)
            .with_reconnect_every(config.reconnect_every())
            .run(handoff_tx, coordinator.subscribe()),
    );

    let (ingestion_end, ingestion_stats) = match ingestion.await {
        Ok(result) => result,
        Err(e) => {
            log::error!("❌ Ingestion task failed: {}", e);
            (IngestionEnd::Stopped, IngestionStats::default())
        }
    };

    // No-op when a signal already started the drain
    if ingestion_end != IngestionEnd::Stopped {
        coordinator.begin_drain(ShutdownReason::SourceExhausted);
    }

    // Ingestion has returned, so its sender is gone and the channel is closed
    log::info!("🔄 Shutdown: waiting for publisher to drain the handoff channel");
    let publisher_stats = match publisher_done.await {
        Ok(stats) => stats,
        Err(_) => {
            log::error!("❌ Publisher exited without reporting");
            PublisherStats::default()
        }
    };

    coordinator.finish();

    PublisherRunStats {
        ingestion_end,
        ingestion: ingestion_stats,
        publisher: publisher_stats,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CounterRunStats {
    pub consumer: ConsumerStats,
    pub aggregator: AggregatorStats,
    pub flush: FlushStats,
    /// Votes still unflushed at exit (store failures on the final flush)
    pub pending: u64,
}

pub fn consumer_options(config: &PipelineConfig) -> ConsumerOptions {
    ConsumerOptions {
        max_in_flight: config.max_in_flight,
        max_attempts: config.max_attempts,
        poll_interval: config.poll_interval(),
    }
}

/// Aggregation side: queue → aggregator → tally → flusher → store
///
/// Runs until the coordinator starts draining, then stops the subscription
/// (in-flight deliveries finish), runs the final flush and stops.
pub async fn run_counter(
    store: Arc<dyn PollStore>,
    options: OptionSet,
    transport: Arc<dyn Transport>,
    config: &PipelineConfig,
    coordinator: ShutdownCoordinator,
) -> Result<CounterRunStats, TransportError> {
    let tally = Arc::new(SharedTally::new());
    let aggregator = Arc::new(VoteAggregator::new(tally.clone(), options));

    let subscription = transport
        .subscribe(
            &config.topic,
            &config.channel,
            aggregator.clone(),
            consumer_options(config),
        )
        .await?;
    let flusher = Flusher::new(tally.clone(), store, config.update_interval()).spawn();

    log::info!("⏳ Waiting for votes on {}/{}...", config.topic, config.channel);

    coordinator.subscribe().draining().await;

    log::info!("🔄 Shutdown: stopping consumer");
    let consumer_stats = subscription.stop().await;

    log::info!("🔄 Shutdown: stopping flusher");
    let flush_stats = flusher.stop().await;

    let pending = tally.pending();
    if pending > 0 {
        log::error!("❌ {} counted votes were not persisted", pending);
    }

    coordinator.finish();

    Ok(CounterRunStats {
        consumer: consumer_stats,
        aggregator: aggregator.stats(),
        flush: flush_stats,
        pending,
    })
}
