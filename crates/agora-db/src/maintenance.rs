use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info};

/// Layout SQLite's `CURRENT_TIMESTAMP` uses; stored timestamps compare as text.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Delete OAuth handshake states that expired before `now`.
pub fn purge_expired_oauth_states(
    conn: &Connection,
    now: DateTime<Utc>,
) -> rusqlite::Result<usize> {
    let cutoff = now.format(SQLITE_TIMESTAMP_FORMAT).to_string();
    let deleted = conn.execute(
        "DELETE FROM oauth_states WHERE expires_at < ?1",
        params![cutoff],
    )?;

    if deleted > 0 {
        info!("cleaned up {deleted} expired OAuth state(s)");
    } else {
        debug!("no expired OAuth states");
    }
    Ok(deleted)
}
