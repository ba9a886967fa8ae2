//! Vote Publisher - ingestion side of the pipeline
//!
//! Reads raw votes (one per line), drops votes for options no poll offers and
//! publishes the rest to the durable vote queue.
//!
//! Usage:
//!   echo "rust" | cargo run --release --bin vote_publisher
//!   VOTES_SOURCE=/var/log/votes.txt cargo run --release --bin vote_publisher
//!
//! Environment variables:
//!   BALLOTFLOW_DB_PATH - Poll store, read once for the valid options (default: data/ballots.db)
//!   BALLOTFLOW_QUEUE_PATH - Vote queue (default: data/votes_queue.db)
//!   VOTES_TOPIC - Queue topic (default: votes)
//!   VOTES_SOURCE - `-` for stdin, or a file to follow (default: -)
//!   HANDOFF_CHANNEL_BUFFER - Ingestion -> publisher buffer (default: 1024)
//!   SOURCE_RECONNECT_SECS - Forced source reconnect period, 0 disables (default: 60)

use ballotflow::config::{PipelineConfig, SourceKind};
use ballotflow::runtime::{load_options, run_publisher, PublisherRunStats};
use ballotflow::shutdown::ShutdownCoordinator;
use ballotflow::source::{BlockingLineSource, TailSource};
use ballotflow::store::SqlitePollStore;
use ballotflow::transport::{SqliteQueue, Transport};
use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let config = PipelineConfig::from_env();
    ballotflow::init_logging(&config.rust_log);

    info!("🚀 Vote Publisher");
    config.validate()?;
    info!("   ├─ Poll store: {}", config.db_path);
    info!("   ├─ Queue: {} (topic: {})", config.queue_path, config.topic);
    info!("   ├─ Source: {:?}", config.source);
    info!("   └─ Handoff buffer: {}", config.handoff_buffer);

    info!("🔧 Connecting to poll store...");
    let (_, options) = {
        let store = SqlitePollStore::open(&config.db_path).map_err(|e| {
            error!("❌ Failed to open poll store: {}", e);
            e
        })?;
        load_options(&store).await?
    };
    info!("✅ Poll store connection closed");

    info!("🔧 Connecting to vote queue...");
    let transport: Arc<dyn Transport> = Arc::new(SqliteQueue::open(&config.queue_path).map_err(|e| {
        error!("❌ Failed to open vote queue: {}", e);
        e
    })?);

    let coordinator = ShutdownCoordinator::new();
    let signals = coordinator.listen_for_signals();
    info!("🔄 Press CTRL+C to shutdown gracefully");

    let stats = match &config.source {
        SourceKind::Stdin => {
            let source = BlockingLineSource::stdin()?;
            run_publisher(source, options, transport, &config, coordinator).await
        }
        SourceKind::Tail(path) => {
            run_publisher(TailSource::new(path), options, transport, &config, coordinator).await
        }
    };
    signals.abort();

    report(&stats);
    Ok(())
}

fn report(stats: &PublisherRunStats) {
    info!("📊 Publisher summary ({:?}):", stats.ingestion_end);
    info!("   ├─ Received: {}", stats.ingestion.received);
    info!("   ├─ Rejected (unknown option): {}", stats.ingestion.rejected);
    info!("   ├─ Published: {}", stats.publisher.published);
    info!("   └─ Dropped (publish failed): {}", stats.publisher.dropped);
}
