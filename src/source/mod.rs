//! Vote sources
//!
//! A source yields raw vote tokens one at a time. It owns its connection and
//! reconnect policy; the ingestion loop only asks for the next vote, asks for
//! a reconnect after an error, and stops calling when shutdown begins.

pub mod backoff;
pub mod lines;
pub mod tail;

pub use backoff::{ExponentialBackoff, MaxRetriesExceeded};
pub use lines::{BlockingLineSource, LineSource};
pub use tail::TailSource;

use async_trait::async_trait;

#[derive(Debug)]
pub enum SourceError {
    Io(std::io::Error),
    MaxRetries,
}

impl From<std::io::Error> for SourceError {
    fn from(err: std::io::Error) -> Self {
        SourceError::Io(err)
    }
}

impl From<MaxRetriesExceeded> for SourceError {
    fn from(_: MaxRetriesExceeded) -> Self {
        SourceError::MaxRetries
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Io(e) => write!(f, "Source IO error: {}", e),
            SourceError::MaxRetries => write!(f, "Maximum reconnect attempts exceeded"),
        }
    }
}

impl std::error::Error for SourceError {}

#[async_trait]
pub trait EventSource: Send {
    /// Next raw vote, or `None` once the source is exhausted
    ///
    /// Must be cancel-safe: the ingestion loop drops this future when
    /// shutdown begins.
    async fn next_vote(&mut self) -> Result<Option<String>, SourceError>;

    /// Drop the current connection and open a fresh one
    async fn reconnect(&mut self) -> Result<(), SourceError>;

    /// Name for log lines
    fn describe(&self) -> String;
}
