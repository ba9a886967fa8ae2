//! Shared SQLite connection setup
//!
//! The poll store and the vote queue are opened by separate processes
//! (publisher, counter, poll_admin), so every connection runs in WAL mode with
//! a busy timeout instead of failing fast on a concurrent writer.

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// Apply WAL, NORMAL sync, in-memory temp storage and a busy timeout
pub fn apply_optimized_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", 1000)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(())
}

/// Open a database file, creating its parent directory if needed
pub fn open_database(db_path: impl AsRef<Path>) -> Result<Connection, rusqlite::Error> {
    let db_path = db_path.as_ref();
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            // Surface as a SQLite open error; the caller logs the path.
            std::fs::create_dir_all(parent).map_err(|e| {
                rusqlite::Error::InvalidPath(
                    format!("{} ({})", parent.display(), e).into(),
                )
            })?;
        }
    }

    let conn = Connection::open(db_path)?;
    apply_optimized_pragmas(&conn)?;
    Ok(conn)
}
