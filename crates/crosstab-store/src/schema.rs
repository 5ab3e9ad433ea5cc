//! SQLite schema for the record store.
//!
//! The schema version lives in `PRAGMA user_version`. A database stamped
//! with a newer version than this build knows is refused rather than
//! written to.

use rusqlite::Connection;

use crate::error::{Result, StoreError};

/// Version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

const RECORDS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS records (
        channel_key TEXT PRIMARY KEY,
        record TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )";

/// Create the schema on a fresh database, or check an existing one.
pub fn ensure(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    match found {
        SCHEMA_VERSION => Ok(()),
        0 => {
            let tx = conn.transaction()?;
            tx.execute(RECORDS_TABLE, [])?;
            tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
            tx.commit()?;
            tracing::debug!(version = SCHEMA_VERSION, "schema created");
            Ok(())
        }
        newer => Err(StoreError::Schema(format!(
            "database schema v{} is newer than supported v{}",
            newer, SCHEMA_VERSION
        ))),
    }
}

/// Unix time in milliseconds, stamped on each write.
pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
