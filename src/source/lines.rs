//! Newline-delimited votes from a reader
//!
//! - `LineSource`: any async reader (pipes, sockets, test buffers)
//! - `BlockingLineSource`: a blocking reader drained on its own OS thread
//!   (stdin in production)

use super::{EventSource, SourceError};
use async_trait::async_trait;
use std::io::BufRead;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, Lines};
use tokio::sync::mpsc;

pub struct LineSource<R> {
    lines: Lines<R>,
    name: String,
}

impl<R: AsyncBufRead + Unpin + Send> LineSource<R> {
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        Self {
            lines: reader.lines(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl<R: AsyncBufRead + Unpin + Send> EventSource for LineSource<R> {
    async fn next_vote(&mut self) -> Result<Option<String>, SourceError> {
        // next_line is cancel-safe, so a shutdown mid-read loses nothing
        while let Some(line) = self.lines.next_line().await? {
            let vote = line.trim();
            if !vote.is_empty() {
                return Ok(Some(vote.to_string()));
            }
        }
        Ok(None)
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        // A pipe cannot be reopened; keep reading where we are.
        log::debug!("{} does not support reconnect, continuing", self.name);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

/// Lines read by a detached thread and handed over on a channel
///
/// `tokio::io::stdin` reads on the runtime's blocking pool, and runtime
/// shutdown waits for that read to return. Here the reading thread is not
/// owned by the runtime, so a drain can finish and the process exit while
/// stdin is still open and silent.
pub struct BlockingLineSource {
    lines: mpsc::Receiver<std::io::Result<String>>,
    name: String,
}

impl BlockingLineSource {
    pub fn spawn<R>(reader: R, name: impl Into<String>) -> std::io::Result<Self>
    where
        R: BufRead + Send + 'static,
    {
        let name = name.into();
        let (tx, rx) = mpsc::channel(1_024);

        std::thread::Builder::new()
            .name(format!("{}-reader", name))
            .spawn(move || {
                for line in reader.lines() {
                    let failed = line.is_err();
                    // Receiver gone: the source was dropped
                    if tx.blocking_send(line).is_err() || failed {
                        break;
                    }
                }
            })?;

        Ok(Self { lines: rx, name })
    }

    pub fn stdin() -> std::io::Result<Self> {
        Self::spawn(std::io::BufReader::new(std::io::stdin()), "stdin")
    }
}

#[async_trait]
impl EventSource for BlockingLineSource {
    async fn next_vote(&mut self) -> Result<Option<String>, SourceError> {
        // mpsc recv is cancel-safe
        while let Some(line) = self.lines.recv().await {
            let line = line?;
            let vote = line.trim();
            if !vote.is_empty() {
                return Ok(Some(vote.to_string()));
            }
        }
        Ok(None)
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        log::debug!("{} does not support reconnect, continuing", self.name);
        Ok(())
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
