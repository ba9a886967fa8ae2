//! Periodic flush of the live tally into the poll store
//!
//! Flush cycle:
//! 1. Take the live tally (slot left empty, new votes start a fresh one)
//! 2. Release the lock, then apply one increment per option
//! 3. Merge the options whose increment failed back into the live tally
//!
//! Only failed options are retried. An option that was applied in a cycle
//! where a sibling failed is never applied again.
//!
//! The next tick is scheduled after the current tick's writes return, so
//! ticks never overlap.

use super::tally::{SharedTally, Tally};
use crate::store::PollStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one flush tick
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Nothing counted since the last flush; no store calls made
    Idle,
    Flushed(FlushReport),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushReport {
    /// (option, amount) pairs durably applied
    pub applied: Vec<(String, u64)>,
    /// (option, amount) pairs merged back for the next tick
    pub failed: Vec<(String, u64)>,
}

impl FlushReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn votes_applied(&self) -> u64 {
        self.applied.iter().map(|(_, amount)| amount).sum()
    }
}

/// Counters over the flusher's lifetime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushStats {
    pub ticks: u64,
    pub idle_ticks: u64,
    pub keys_applied: u64,
    pub keys_failed: u64,
    pub votes_applied: u64,
}

impl FlushStats {
    fn record(&mut self, outcome: &FlushOutcome) {
        self.ticks += 1;
        match outcome {
            FlushOutcome::Idle => self.idle_ticks += 1,
            FlushOutcome::Flushed(report) => {
                self.keys_applied += report.applied.len() as u64;
                self.keys_failed += report.failed.len() as u64;
                self.votes_applied += report.votes_applied();
            }
        }
    }
}

pub struct Flusher {
    tally: Arc<SharedTally>,
    store: Arc<dyn PollStore>,
    interval: Duration,
}

impl Flusher {
    pub fn new(tally: Arc<SharedTally>, store: Arc<dyn PollStore>, interval: Duration) -> Self {
        Self {
            tally,
            store,
            interval,
        }
    }

    /// Run one flush cycle now
    pub async fn flush_once(&self) -> FlushOutcome {
        let Some(tally) = self.tally.take() else {
            log::debug!("No new votes, skipping database update");
            return FlushOutcome::Idle;
        };

        let flush_start = Instant::now();
        log::info!(
            "🔄 Updating database: {} options, {} votes",
            tally.len(),
            tally.total()
        );

        let mut report = FlushReport::default();
        for (option, amount) in tally {
            match self.store.increment_results(&option, amount).await {
                Ok(polls) => {
                    log::debug!("✅ results.{} += {} ({} polls)", option, amount, polls);
                    report.applied.push((option, amount));
                }
                Err(e) => {
                    log::error!("❌ Failed to update results.{} (+{}): {}", option, amount, e);
                    report.failed.push((option, amount));
                }
            }
        }

        if report.is_complete() {
            log::info!(
                "✅ Finished updating database: {} votes in {}ms",
                report.votes_applied(),
                flush_start.elapsed().as_millis()
            );
        } else {
            let unflushed: Tally = report.failed.iter().cloned().collect();
            log::warn!(
                "⚠️  {} of {} options failed, {} votes kept for the next tick",
                report.failed.len(),
                report.failed.len() + report.applied.len(),
                unflushed.total()
            );
            self.tally.restore(unflushed);
        }

        FlushOutcome::Flushed(report)
    }

    /// Tick until stopped, then flush one last time
    pub async fn run(self, mut stop_rx: watch::Receiver<bool>) -> FlushStats {
        let mut stats = FlushStats::default();

        log::info!("⏰ Starting flusher (interval: {}ms)", self.interval.as_millis());

        loop {
            if *stop_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    let outcome = self.flush_once().await;
                    stats.record(&outcome);
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        log::info!("🔄 Flusher stopping, performing final flush...");
        let outcome = self.flush_once().await;
        stats.record(&outcome);
        if let FlushOutcome::Flushed(report) = &outcome {
            if !report.is_complete() {
                log::error!(
                    "❌ Final flush left {} options unapplied ({} votes pending)",
                    report.failed.len(),
                    self.tally.pending()
                );
            }
        }

        log::info!(
            "✅ Flusher stopped: {} ticks ({} idle), {} votes applied, {} key failures",
            stats.ticks,
            stats.idle_ticks,
            stats.votes_applied,
            stats.keys_failed
        );
        stats
    }

    pub fn spawn(self) -> FlusherHandle {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(stop_rx));
        FlusherHandle { stop_tx, handle }
    }
}

pub struct FlusherHandle {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<FlushStats>,
}

impl FlusherHandle {
    /// Stop ticking and wait for the final flush
    pub async fn stop(self) -> FlushStats {
        let _ = self.stop_tx.send(true);
        match self.handle.await {
            Ok(stats) => stats,
            Err(e) => {
                log::error!("❌ Flusher task failed: {}", e);
                FlushStats::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Poll, StoreError};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store; options listed in `fail_once` fail their first increment
    #[derive(Default)]
    struct FakeStore {
        results: Mutex<HashMap<String, u64>>,
        fail_once: Mutex<Vec<String>>,
        calls: Mutex<Vec<(String, u64)>>,
    }

    impl FakeStore {
        fn failing_once(options: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_once: Mutex::new(options.iter().map(|s| s.to_string()).collect()),
                ..Default::default()
            })
        }

        fn result(&self, option: &str) -> u64 {
            self.results.lock().unwrap().get(option).copied().unwrap_or(0)
        }

        fn calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PollStore for FakeStore {
        async fn load_polls(&self) -> Result<Vec<Poll>, StoreError> {
            Ok(Vec::new())
        }

        async fn increment_results(&self, option: &str, amount: u64) -> Result<usize, StoreError> {
            self.calls.lock().unwrap().push((option.to_string(), amount));
            {
                let mut fail_once = self.fail_once.lock().unwrap();
                if let Some(pos) = fail_once.iter().position(|o| o == option) {
                    fail_once.remove(pos);
                    return Err(StoreError::Io(std::io::Error::new(
                        std::io::ErrorKind::ConnectionRefused,
                        "store unavailable",
                    )));
                }
            }
            *self.results.lock().unwrap().entry(option.to_string()).or_insert(0) += amount;
            Ok(1)
        }
    }

    fn flusher(store: Arc<FakeStore>) -> (Arc<SharedTally>, Flusher) {
        let tally = Arc::new(SharedTally::new());
        let flusher = Flusher::new(tally.clone(), store, Duration::from_millis(10));
        (tally, flusher)
    }

    #[tokio::test]
    async fn test_flush_applies_counts_then_idles() {
        let store = Arc::new(FakeStore::default());
        let (tally, flusher) = flusher(store.clone());

        for vote in ["a", "b", "a", "a"] {
            tally.record(vote);
        }

        match flusher.flush_once().await {
            FlushOutcome::Flushed(report) => {
                assert!(report.is_complete());
                assert_eq!(report.votes_applied(), 4);
            }
            FlushOutcome::Idle => panic!("expected a flush"),
        }
        assert_eq!(store.result("a"), 3);
        assert_eq!(store.result("b"), 1);

        // Empty interval: no store calls
        let calls_before = store.calls();
        assert_eq!(flusher.flush_once().await, FlushOutcome::Idle);
        assert_eq!(store.calls(), calls_before);
    }

    #[tokio::test]
    async fn test_failed_key_retried_without_reapplying_siblings() {
        let store = FakeStore::failing_once(&["b"]);
        let (tally, flusher) = flusher(store.clone());

        for vote in ["a", "b", "a", "a"] {
            tally.record(vote);
        }

        match flusher.flush_once().await {
            FlushOutcome::Flushed(report) => {
                assert_eq!(report.applied, vec![("a".to_string(), 3)]);
                assert_eq!(report.failed, vec![("b".to_string(), 1)]);
            }
            FlushOutcome::Idle => panic!("expected a flush"),
        }
        assert_eq!(store.result("a"), 3);
        assert_eq!(store.result("b"), 0);
        // Only the failed delta is pending
        assert_eq!(tally.snapshot().get("a"), 0);
        assert_eq!(tally.snapshot().get("b"), 1);

        // A vote for b arrives before the retry tick
        tally.record("b");

        assert!(matches!(flusher.flush_once().await, FlushOutcome::Flushed(r) if r.is_complete()));
        assert_eq!(store.result("a"), 3);
        assert_eq!(store.result("b"), 2);
        assert_eq!(flusher.flush_once().await, FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn test_run_ticks_and_final_flush_on_stop() {
        let store = Arc::new(FakeStore::default());
        let (tally, flusher) = flusher(store.clone());
        let handle = flusher.spawn();

        tally.record("a");
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.result("a"), 1);

        // Counted after the last tick; picked up by the final flush
        tally.record("b");
        let stats = handle.stop().await;

        assert_eq!(store.result("b"), 1);
        assert_eq!(stats.votes_applied, 2);
        assert!(stats.ticks >= 2);
        assert!(stats.idle_ticks >= 1);
    }

    #[tokio::test]
    async fn test_timer_survives_store_errors() {
        let store = FakeStore::failing_once(&["a"]);
        let (tally, flusher) = flusher(store.clone());
        let handle = flusher.spawn();

        tally.record("a");
        tokio::time::sleep(Duration::from_millis(80)).await;
        let stats = handle.stop().await;

        assert_eq!(store.result("a"), 1);
        assert_eq!(stats.keys_failed, 1);
        assert_eq!(stats.votes_applied, 1);
    }
}
