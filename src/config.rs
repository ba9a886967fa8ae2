//! Pipeline configuration from environment variables
//!
//! Both binaries share one config struct; each reads the fields it needs.

use std::env;
use std::time::Duration;

/// Where the publisher reads raw votes from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Newline-separated votes on stdin, exhausted at EOF
    Stdin,
    /// Follow an append-only file (never exhausted)
    Tail(String),
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration for the vote pipeline
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Path to the SQLite poll store
    pub db_path: String,

    /// Path to the SQLite file backing the vote queue
    pub queue_path: String,

    /// Queue topic votes are published on
    pub topic: String,

    /// Consumer group of the counter
    pub channel: String,

    /// Flush interval in milliseconds
    pub update_interval_ms: u64,

    /// Capacity of the ingestion -> publisher handoff channel
    pub handoff_buffer: usize,

    /// Idle consumer poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Max concurrent handler calls per consumer
    pub max_in_flight: usize,

    /// Deliveries before a message is discarded
    pub max_attempts: u32,

    /// Vote source for the publisher
    pub source: SourceKind,

    /// Forced source reconnect period in seconds (0 disables)
    pub reconnect_secs: u64,

    pub rust_log: String,
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BALLOTFLOW_DB_PATH` (default: data/ballots.db)
    /// - `BALLOTFLOW_QUEUE_PATH` (default: data/votes_queue.db)
    /// - `VOTES_TOPIC` (default: votes)
    /// - `COUNTER_CHANNEL` (default: counter)
    /// - `UPDATE_INTERVAL_MS` (default: 1000)
    /// - `HANDOFF_CHANNEL_BUFFER` (default: 1024)
    /// - `TRANSPORT_POLL_INTERVAL_MS` (default: 100)
    /// - `TRANSPORT_MAX_IN_FLIGHT` (default: 16)
    /// - `TRANSPORT_MAX_ATTEMPTS` (default: 5)
    /// - `VOTES_SOURCE` (default: `-`, meaning stdin)
    /// - `SOURCE_RECONNECT_SECS` (default: 60)
    pub fn from_env() -> Self {
        let source = match env::var("VOTES_SOURCE") {
            Ok(path) if !path.trim().is_empty() && path.trim() != "-" => {
                SourceKind::Tail(path.trim().to_string())
            }
            _ => SourceKind::Stdin,
        };

        Self {
            db_path: env::var("BALLOTFLOW_DB_PATH")
                .unwrap_or_else(|_| "data/ballots.db".to_string()),

            queue_path: env::var("BALLOTFLOW_QUEUE_PATH")
                .unwrap_or_else(|_| "data/votes_queue.db".to_string()),

            topic: env::var("VOTES_TOPIC").unwrap_or_else(|_| "votes".to_string()),

            channel: env::var("COUNTER_CHANNEL").unwrap_or_else(|_| "counter".to_string()),

            update_interval_ms: parse_or("UPDATE_INTERVAL_MS", 1_000),

            handoff_buffer: parse_or("HANDOFF_CHANNEL_BUFFER", 1_024),

            poll_interval_ms: parse_or("TRANSPORT_POLL_INTERVAL_MS", 100),

            max_in_flight: parse_or("TRANSPORT_MAX_IN_FLIGHT", 16),

            max_attempts: parse_or("TRANSPORT_MAX_ATTEMPTS", 5),

            source,

            reconnect_secs: parse_or("SOURCE_RECONNECT_SECS", 60),

            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.update_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "UPDATE_INTERVAL_MS must be greater than 0".to_string(),
            ));
        }
        if self.handoff_buffer == 0 {
            return Err(ConfigError::InvalidValue(
                "HANDOFF_CHANNEL_BUFFER must be greater than 0".to_string(),
            ));
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidValue(
                "TRANSPORT_MAX_IN_FLIGHT must be greater than 0".to_string(),
            ));
        }
        if self.topic.is_empty() {
            return Err(ConfigError::MissingVariable("VOTES_TOPIC".to_string()));
        }
        if self.channel.is_empty() {
            return Err(ConfigError::MissingVariable("COUNTER_CHANNEL".to_string()));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_every(&self) -> Option<Duration> {
        (self.reconnect_secs > 0).then(|| Duration::from_secs(self.reconnect_secs))
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}
