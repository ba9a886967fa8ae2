//! Vote aggregator: the queue delivery handler of the counter
//!
//! Each delivery is one vote token. Handling it is a single in-memory
//! increment, so a redelivered duplicate adds one extra vote and nothing else.

use super::tally::SharedTally;
use crate::store::OptionSet;
use crate::transport::{HandlerError, Message, MessageHandler};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatorStats {
    pub counted: u64,
    /// Tokens outside every poll's options
    pub rejected: u64,
    /// Payloads that were not UTF-8
    pub malformed: u64,
}

pub struct VoteAggregator {
    tally: Arc<SharedTally>,
    options: OptionSet,
    counted: AtomicU64,
    rejected: AtomicU64,
    malformed: AtomicU64,
}

impl VoteAggregator {
    pub fn new(tally: Arc<SharedTally>, options: OptionSet) -> Self {
        Self {
            tally,
            options,
            counted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
        }
    }

    /// Count one vote token; returns false if it was not a known option
    pub fn count_vote(&self, vote: &str) -> bool {
        if !self.options.contains(vote) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            log::debug!("Ignoring vote for unknown option: {:?}", vote);
            return false;
        }

        self.tally.record(vote);
        self.counted.fetch_add(1, Ordering::Relaxed);
        true
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            counted: self.counted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl MessageHandler for VoteAggregator {
    /// Always acks: unknown or malformed tokens would fail the same way on
    /// every redelivery.
    async fn handle(&self, message: &Message) -> Result<(), HandlerError> {
        match std::str::from_utf8(&message.body) {
            Ok(vote) => {
                self.count_vote(vote.trim());
            }
            Err(e) => {
                self.malformed.fetch_add(1, Ordering::Relaxed);
                log::warn!("⚠️  Discarding non-UTF-8 vote message {}: {}", message.id, e);
            }
        }
        Ok(())
    }
}
