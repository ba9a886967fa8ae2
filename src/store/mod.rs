//! Poll store: the durable home of polls, their options and vote results
//!
//! The pipeline needs exactly two things from the store:
//! - `load_polls` once at startup, to learn the valid options
//! - `increment_results` on every flush, an additive update that only
//!   touches `results[option]` of the polls offering that option

pub mod sqlite;

pub use sqlite::SqlitePollStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

#[derive(Debug)]
pub enum StoreError {
    Database(rusqlite::Error),
    Io(std::io::Error),
    /// Increment larger than SQLite's signed 64-bit integer
    AmountOutOfRange(u64),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::AmountOutOfRange(amount) => {
                write!(f, "Increment {} exceeds the store's integer range", amount)
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// A named ballot with a fixed set of options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub options: Vec<String>,
    /// Persisted count per option
    pub results: BTreeMap<String, u64>,
}

/// Union of every poll's options; a vote is countable only if it is in here
#[derive(Debug, Clone, Default)]
pub struct OptionSet {
    options: HashSet<String>,
}

impl OptionSet {
    pub fn from_polls(polls: &[Poll]) -> Self {
        Self {
            options: polls
                .iter()
                .flat_map(|poll| poll.options.iter().cloned())
                .collect(),
        }
    }

    pub fn contains(&self, vote: &str) -> bool {
        self.options.contains(vote)
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }

    /// Sorted copy, for log output
    pub fn sorted(&self) -> Vec<&str> {
        let mut options: Vec<&str> = self.options.iter().map(String::as_str).collect();
        options.sort_unstable();
        options
    }
}

impl<S: Into<String>> FromIterator<S> for OptionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            options: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
pub trait PollStore: Send + Sync {
    /// Every poll with its options and current results
    async fn load_polls(&self) -> Result<Vec<Poll>, StoreError>;

    /// Add `amount` to `results[option]` of every poll offering `option`
    ///
    /// Returns the number of polls updated. Zero matches is not an error.
    async fn increment_results(&self, option: &str, amount: u64) -> Result<usize, StoreError>;
}
