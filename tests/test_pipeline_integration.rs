//! Integration tests for the full vote pipeline
//!
//! Both halves run against real SQLite files (poll store + vote queue):
//! - publisher runtime: source → filter → handoff → queue
//! - counter runtime: queue → tally → flush → poll store
//! - shutdown ordering and drain completeness
//! - flush retry after a store failure

#[cfg(test)]
mod pipeline_integration_tests {
    use async_trait::async_trait;
    use ballotflow::config::{PipelineConfig, SourceKind};
    use ballotflow::pipeline::IngestionEnd;
    use ballotflow::runtime::{load_options, run_counter, run_publisher};
    use ballotflow::shutdown::{ShutdownCoordinator, ShutdownReason, ShutdownState};
    use ballotflow::source::LineSource;
    use ballotflow::store::{Poll, PollStore, SqlitePollStore, StoreError};
    use ballotflow::transport::{SqliteQueue, Transport};
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tempfile::TempDir;

    fn test_config(dir: &Path) -> PipelineConfig {
        PipelineConfig {
            db_path: dir.join("ballots.db").display().to_string(),
            queue_path: dir.join("queue.db").display().to_string(),
            topic: "votes".to_string(),
            channel: "counter".to_string(),
            update_interval_ms: 20,
            handoff_buffer: 4,
            poll_interval_ms: 10,
            max_in_flight: 8,
            max_attempts: 5,
            source: SourceKind::Stdin,
            reconnect_secs: 0,
            rust_log: "info".to_string(),
        }
    }

    fn setup() -> (TempDir, PipelineConfig, Arc<SqlitePollStore>, Arc<SqliteQueue>) {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let store = Arc::new(SqlitePollStore::open(&config.db_path).unwrap());
        store
            .add_poll("first", &["a".to_string(), "b".to_string()])
            .unwrap();
        store
            .add_poll("second", &["b".to_string(), "c".to_string()])
            .unwrap();

        let queue = Arc::new(SqliteQueue::open(&config.queue_path).unwrap());
        (dir, config, store, queue)
    }

    async fn results(store: &dyn PollStore) -> Vec<BTreeMap<String, u64>> {
        store
            .load_polls()
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.results)
            .collect()
    }

    async fn wait_for_results(store: &dyn PollStore, expected: &[(&str, u64)]) {
        for _ in 0..300 {
            let polls = results(store).await;
            let all_match = expected.iter().all(|(option, count)| {
                polls
                    .iter()
                    .filter_map(|r| r.get(*option))
                    .all(|value| value == count)
            });
            if all_match {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("results never reached {:?}: {:?}", expected, results(store).await);
    }

    #[tokio::test]
    async fn test_votes_flow_end_to_end() {
        // Test: "a","b","a","a" plus an unknown option flow from source to store
        let (_dir, config, store, queue) = setup();
        let (_, options) = load_options(store.as_ref()).await.unwrap();

        let input: &[u8] = b"a\nb\nnot-an-option\na\na\n";
        let publisher_stats = run_publisher(
            LineSource::new(input, "test"),
            options.clone(),
            queue.clone(),
            &config,
            ShutdownCoordinator::new(),
        )
        .await;

        assert_eq!(publisher_stats.ingestion_end, IngestionEnd::Exhausted);
        assert_eq!(publisher_stats.ingestion.rejected, 1);
        assert_eq!(publisher_stats.publisher.published, 4);
        assert_eq!(queue.depth("votes", "counter").unwrap_or(0), 0);

        let counter_shutdown = ShutdownCoordinator::new();
        let counter = tokio::spawn({
            let store: Arc<dyn PollStore> = store.clone();
            let transport: Arc<dyn Transport> = queue.clone();
            let config = config.clone();
            let coordinator = counter_shutdown.clone();
            async move { run_counter(store, options, transport, &config, coordinator).await }
        });

        wait_for_results(store.as_ref(), &[("a", 3), ("b", 1)]).await;

        counter_shutdown.begin_drain(ShutdownReason::Signal);
        let stats = counter.await.unwrap().unwrap();

        assert_eq!(counter_shutdown.state(), ShutdownState::Stopped);
        assert_eq!(stats.aggregator.counted, 4);
        assert_eq!(stats.flush.votes_applied, 4);
        assert_eq!(stats.pending, 0);

        // "b" is offered by both polls; "c" never voted
        let polls = results(store.as_ref()).await;
        assert_eq!(polls[0].get("a"), Some(&3));
        assert_eq!(polls[0].get("b"), Some(&1));
        assert_eq!(polls[1].get("b"), Some(&1));
        assert_eq!(polls[1].get("c"), Some(&0));
        assert!(polls.iter().all(|r| !r.contains_key("not-an-option")));
        assert_eq!(queue.depth("votes", "counter").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_drain_publishes_every_queued_vote() {
        // Test: votes accepted before the drain are all published
        let (_dir, config, store, queue) = setup();
        let (_, options) = load_options(store.as_ref()).await.unwrap();

        let votes: String = (0..200).map(|i| if i % 2 == 0 { "a\n" } else { "c\n" }).collect();
        let coordinator = ShutdownCoordinator::new();

        let stats = run_publisher(
            LineSource::new(std::io::Cursor::new(votes.into_bytes()), "test"),
            options,
            queue.clone(),
            &config,
            coordinator.clone(),
        )
        .await;

        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        assert_eq!(stats.ingestion.forwarded, 200);
        assert_eq!(stats.publisher.published, stats.ingestion.forwarded);

        // No consumer yet: everything sits in the topic backlog, adopted on subscribe
        let tally = Arc::new(ballotflow::pipeline::SharedTally::new());
        let aggregator = Arc::new(ballotflow::pipeline::VoteAggregator::new(
            tally.clone(),
            ["a", "c"].into_iter().collect(),
        ));
        let subscription = queue
            .subscribe("votes", "counter", aggregator.clone(), Default::default())
            .await
            .unwrap();
        for _ in 0..300 {
            if aggregator.stats().counted == 200 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        subscription.stop().await;

        assert_eq!(tally.snapshot().get("a"), 100);
        assert_eq!(tally.snapshot().get("c"), 100);
    }

    #[tokio::test]
    async fn test_signal_during_ingestion_stops_cleanly() {
        // Test: a drain request stops a source that never ends
        let (_dir, config, store, queue) = setup();
        let (_, options) = load_options(store.as_ref()).await.unwrap();

        let (mut writer, reader) = tokio::io::duplex(64);
        let coordinator = ShutdownCoordinator::new();

        let publisher = tokio::spawn({
            let transport: Arc<dyn Transport> = queue.clone();
            let config = config.clone();
            let coordinator = coordinator.clone();
            async move {
                run_publisher(
                    LineSource::new(tokio::io::BufReader::new(reader), "duplex"),
                    options,
                    transport,
                    &config,
                    coordinator,
                )
                .await
            }
        });

        use tokio::io::AsyncWriteExt;
        writer.write_all(b"a\nb\n").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(coordinator.begin_drain(ShutdownReason::Signal));
        // Second signal is ignored
        assert!(!coordinator.begin_drain(ShutdownReason::Signal));

        let stats = tokio::time::timeout(Duration::from_secs(2), publisher)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(stats.ingestion_end, IngestionEnd::Stopped);
        assert_eq!(stats.publisher.published, 2);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
        drop(writer);
    }

    /// Delegates to SQLite, failing the first increment of selected options
    struct FlakyStore {
        inner: Arc<SqlitePollStore>,
        fail_once: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl PollStore for FlakyStore {
        async fn load_polls(&self) -> Result<Vec<Poll>, StoreError> {
            self.inner.load_polls().await
        }

        async fn increment_results(&self, option: &str, amount: u64) -> Result<usize, StoreError> {
            let fail = {
                let mut fail_once = self.fail_once.lock().unwrap();
                match fail_once.iter().position(|o| o == option) {
                    Some(pos) => {
                        fail_once.remove(pos);
                        true
                    }
                    None => false,
                }
            };
            if fail {
                return Err(StoreError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "store timed out",
                )));
            }
            self.inner.increment_results(option, amount).await
        }
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_exactly_once() {
        // Test: "b" fails on its first flush; final counts are exact
        let (_dir, config, store, queue) = setup();
        let flaky: Arc<dyn PollStore> = Arc::new(FlakyStore {
            inner: store.clone(),
            fail_once: Mutex::new(vec!["b".to_string()]),
        });
        let (_, options) = load_options(flaky.as_ref()).await.unwrap();

        for vote in ["a", "b", "a", "a"] {
            queue.publish("votes", vote.as_bytes()).await.unwrap();
        }

        let coordinator = ShutdownCoordinator::new();
        let counter = tokio::spawn({
            let transport: Arc<dyn Transport> = queue.clone();
            let config = config.clone();
            let coordinator = coordinator.clone();
            async move { run_counter(flaky, options, transport, &config, coordinator).await }
        });

        wait_for_results(store.as_ref(), &[("a", 3), ("b", 1)]).await;
        // A few more ticks: nothing is applied twice
        tokio::time::sleep(Duration::from_millis(100)).await;

        coordinator.begin_drain(ShutdownReason::Requested);
        let stats = counter.await.unwrap().unwrap();

        assert_eq!(stats.flush.keys_failed, 1);
        assert_eq!(stats.flush.votes_applied, 4);
        assert_eq!(stats.pending, 0);

        let polls = results(store.as_ref()).await;
        assert_eq!(polls[0].get("a"), Some(&3));
        assert_eq!(polls[0].get("b"), Some(&1));
        assert_eq!(polls[1].get("b"), Some(&1));
    }
}
