//! SQLite implementation of PollStore
//!
//! Tables:
//! - `polls` - one row per ballot
//! - `poll_options` - one row per (poll, option), carrying the result counter

use super::{Poll, PollStore, StoreError};
use crate::sqlite_pragma::open_database;
use async_trait::async_trait;
use rusqlite::{params, Connection, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS polls (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    title       TEXT NOT NULL,
    created_at  INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS poll_options (
    poll_id     INTEGER NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
    option      TEXT NOT NULL,
    results     INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (poll_id, option)
);

CREATE INDEX IF NOT EXISTS idx_poll_options_option ON poll_options(option);
"#;

pub struct SqlitePollStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePollStore {
    /// Open (or create) the poll store and run the idempotent schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = open_database(db_path.as_ref())?;
        conn.execute_batch(SCHEMA)?;

        log::info!("✅ Poll store ready: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a poll with the given options
    ///
    /// Blank options are skipped and duplicates collapsed.
    pub fn add_poll(&self, title: &str, options: &[String]) -> Result<Poll, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        tx.execute(
            "INSERT INTO polls (title, created_at) VALUES (?1, ?2)",
            params![title, chrono::Utc::now().timestamp()],
        )?;
        let id = tx.last_insert_rowid();

        let mut stored = Vec::new();
        for option in options.iter().map(|o| o.trim()).filter(|o| !o.is_empty()) {
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO poll_options (poll_id, option) VALUES (?1, ?2)",
                params![id, option],
            )?;
            if inserted > 0 {
                stored.push(option.to_string());
            }
        }
        tx.commit()?;

        log::info!("🗳️  Created poll {} '{}' with {} options", id, title, stored.len());

        Ok(Poll {
            id,
            title: title.to_string(),
            results: stored.iter().map(|o| (o.clone(), 0)).collect(),
            options: stored,
        })
    }

    fn query_polls(conn: &Connection) -> Result<Vec<Poll>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT p.id, p.title, o.option, o.results
             FROM polls p
             LEFT JOIN poll_options o ON o.poll_id = p.id
             ORDER BY p.id ASC, o.rowid ASC",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<i64>>(3)?,
            ))
        })?;

        let mut polls: Vec<Poll> = Vec::new();
        for row in rows {
            let (id, title, option, results) = row?;

            if polls.last().map(|p| p.id) != Some(id) {
                polls.push(Poll {
                    id,
                    title,
                    options: Vec::new(),
                    results: BTreeMap::new(),
                });
            }

            if let (Some(option), Some(poll)) = (option, polls.last_mut()) {
                poll.results
                    .insert(option.clone(), results.unwrap_or(0).max(0) as u64);
                poll.options.push(option);
            }
        }

        Ok(polls)
    }
}

#[async_trait]
impl PollStore for SqlitePollStore {
    async fn load_polls(&self) -> Result<Vec<Poll>, StoreError> {
        let conn = self.conn();
        Self::query_polls(&conn)
    }

    /// One UPDATE across every poll offering `option`
    ///
    /// The statement only adds to the matched counters, so it never touches
    /// other options or polls.
    async fn increment_results(&self, option: &str, amount: u64) -> Result<usize, StoreError> {
        let amount = i64::try_from(amount).map_err(|_| StoreError::AmountOutOfRange(amount))?;
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE poll_options SET results = results + ?1 WHERE option = ?2",
            params![amount, option],
        )?;
        Ok(updated)
    }
}
