//! Follow an append-only vote file, surviving rotation and reconnects

use super::{EventSource, ExponentialBackoff, SourceError};
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::sleep;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

pub struct TailSource {
    path: PathBuf,
    reader: Option<BufReader<File>>,
    /// Bytes of complete lines consumed so far; `None` until the first open
    /// (which seeks to end)
    offset: Option<u64>,
    /// Bytes read past `offset` with no newline yet
    fragment: Vec<u8>,
    inode: Option<u64>,
    poll_interval: Duration,
    backoff: ExponentialBackoff,
}

impl TailSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            offset: None,
            fragment: Vec::new(),
            inode: None,
            poll_interval: Duration::from_millis(100),
            backoff: ExponentialBackoff::new(Duration::from_secs(1), Duration::from_secs(30), 10),
        }
    }

    /// Read votes already in the file instead of only new ones
    pub fn from_beginning(mut self) -> Self {
        self.offset = Some(0);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_backoff(mut self, backoff: ExponentialBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn open(&mut self) -> std::io::Result<()> {
        let file = File::open(&self.path).await?;
        let metadata = file.metadata().await?;

        #[cfg(unix)]
        {
            self.inode = Some(metadata.ino());
        }

        let mut reader = BufReader::new(file);
        let offset = match self.offset {
            Some(offset) if offset <= metadata.len() => offset,
            // Shorter than what we consumed: truncated, start over
            Some(_) => 0,
            None => metadata.len(),
        };
        reader.seek(SeekFrom::Start(offset)).await?;

        self.offset = Some(offset);
        self.fragment.clear();
        self.reader = Some(reader);

        log::info!("📖 Tailing {} from byte {}", self.path.display(), offset);
        Ok(())
    }

    /// Rotated (inode changed) or truncated since we opened it
    async fn detect_rotation(&self) -> std::io::Result<bool> {
        let metadata = tokio::fs::metadata(&self.path).await?;

        #[cfg(unix)]
        {
            if self.inode.map_or(false, |old| old != metadata.ino()) {
                return Ok(true);
            }
        }

        Ok(self.offset.map_or(false, |offset| metadata.len() < offset))
    }
}

#[async_trait]
impl EventSource for TailSource {
    async fn next_vote(&mut self) -> Result<Option<String>, SourceError> {
        loop {
            if self.reader.is_none() {
                self.open().await?;
            }

            if self.detect_rotation().await? {
                log::info!("🔄 File rotation detected, reopening: {}", self.path.display());
                self.offset = Some(0);
                self.open().await?;
            }

            // read_until appends to `fragment`, so a cancelled read keeps its bytes
            if let Some(reader) = self.reader.as_mut() {
                reader.read_until(b'\n', &mut self.fragment).await?;
            }

            if !self.fragment.ends_with(b"\n") {
                // Writer has not finished the line yet; a followed file is never exhausted
                sleep(self.poll_interval).await;
                continue;
            }

            let line = std::mem::take(&mut self.fragment);
            self.offset = Some(self.offset.unwrap_or(0) + line.len() as u64);

            let vote = String::from_utf8_lossy(&line);
            let vote = vote.trim();
            if !vote.is_empty() {
                return Ok(Some(vote.to_string()));
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), SourceError> {
        self.reader = None;

        loop {
            match self.open().await {
                Ok(()) => {
                    self.backoff.reset();
                    return Ok(());
                }
                Err(e) => {
                    log::error!("❌ Failed to reopen {}: {}", self.path.display(), e);
                    self.backoff.sleep().await?;
                }
            }
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}
