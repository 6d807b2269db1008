use rusqlite::Connection;
use std::time::Duration;

/// How long a writer waits on another connection's lock before failing
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Apply store PRAGMAs (WAL, NORMAL, foreign keys, busy timeout)
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    log::debug!("SQLite journal_mode={}", mode);

    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    Ok(())
}
