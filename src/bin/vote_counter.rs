//! Vote Counter - aggregation side of the pipeline
//!
//! Consumes votes from the durable queue, counts them in memory and adds the
//! counts to the poll store every UPDATE_INTERVAL_MS.
//!
//! Usage:
//!   cargo run --release --bin vote_counter
//!
//! Environment variables:
//!   BALLOTFLOW_DB_PATH - Poll store (default: data/ballots.db)
//!   BALLOTFLOW_QUEUE_PATH - Vote queue (default: data/votes_queue.db)
//!   VOTES_TOPIC / COUNTER_CHANNEL - Queue topic and consumer group (default: votes / counter)
//!   UPDATE_INTERVAL_MS - Flush interval (default: 1000)
//!   TRANSPORT_MAX_IN_FLIGHT - Concurrent deliveries (default: 16)
//!   TRANSPORT_MAX_ATTEMPTS - Deliveries before a message is discarded (default: 5)

use ballotflow::config::PipelineConfig;
use ballotflow::runtime::{load_options, run_counter};
use ballotflow::shutdown::ShutdownCoordinator;
use ballotflow::store::{PollStore, SqlitePollStore};
use ballotflow::transport::{SqliteQueue, Transport};
use dotenv::dotenv;
use log::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = PipelineConfig::from_env();
    ballotflow::init_logging(&config.rust_log);

    info!("🚀 Vote Counter");
    config.validate()?;
    info!("   ├─ Poll store: {}", config.db_path);
    info!("   ├─ Queue: {} ({}/{})", config.queue_path, config.topic, config.channel);
    info!("   ├─ Update interval: {}ms", config.update_interval_ms);
    info!("   └─ Max in flight: {}", config.max_in_flight);

    info!("🔧 Connecting to poll store...");
    let store: Arc<dyn PollStore> = Arc::new(SqlitePollStore::open(&config.db_path).map_err(|e| {
        error!("❌ Failed to open poll store: {}", e);
        e
    })?);
    let (_, options) = load_options(store.as_ref()).await?;

    info!("🔧 Connecting to vote queue...");
    let transport: Arc<dyn Transport> = Arc::new(SqliteQueue::open(&config.queue_path).map_err(|e| {
        error!("❌ Failed to open vote queue: {}", e);
        e
    })?);

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.listen_for_signals();
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let stats = run_counter(store, options, transport, &config, coordinator).await?;
    signals.abort();

    info!("📊 Counter summary:");
    info!("   ├─ Delivered: {} ({} requeued)", stats.consumer.delivered, stats.consumer.requeued);
    info!("   ├─ Counted: {} ({} rejected)", stats.aggregator.counted, stats.aggregator.rejected);
    info!("   ├─ Votes persisted: {}", stats.flush.votes_applied);
    info!("   └─ Flush ticks: {} ({} idle)", stats.flush.ticks, stats.flush.idle_ticks);
    if stats.pending > 0 {
        warn!("⚠️  Exiting with {} unpersisted votes", stats.pending);
    }

    info!("✅ Closing database connection");
    Ok(())
}
