use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::InitError;

/// Version assumed for databases created before the version log existed.
pub const INITIAL_VERSION: u32 = 1;

/// Table whose presence marks a pre-versioning install.
pub const LEGACY_MARKER_TABLE: &str = "user";

pub const CREATE_VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS database_version (
    version INTEGER PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
)";

/// Only inserts when `version` is above every recorded row, so the log stays
/// strictly increasing.
pub const RECORD_VERSION_SQL: &str = "INSERT INTO database_version (version)
    SELECT ?1 WHERE ?1 > COALESCE((SELECT MAX(version) FROM database_version), 0)";

/// One row of the applied-version log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub version: u32,
    pub applied_at: DateTime<Utc>,
}

/// Reads and writes the schema version log.
///
/// Methods take a `&Connection` so they can run on a plain connection or on
/// an open `Transaction` (which derefs to one).
#[derive(Debug, Clone)]
pub struct VersionStore {
    legacy_marker: String,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self::new(LEGACY_MARKER_TABLE)
    }
}

impl VersionStore {
    pub fn new(legacy_marker: impl Into<String>) -> Self {
        Self {
            legacy_marker: legacy_marker.into(),
        }
    }

    pub fn ensure_table(&self, conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(CREATE_VERSION_TABLE_SQL)
    }

    /// Current schema version, creating the log table if needed.
    ///
    /// An empty log on a database that already has the legacy marker table is
    /// stamped with [`INITIAL_VERSION`]. An empty log on an empty database
    /// returns 0, which callers treat as a fresh install.
    pub fn current_version(&self, conn: &Connection) -> Result<u32, InitError> {
        self.ensure_table(conn)
            .map_err(|source| InitError::Version { source })?;

        if let Some(version) = self
            .latest_recorded(conn)
            .map_err(|source| InitError::Version { source })?
        {
            return Ok(version);
        }

        let legacy = table_exists(conn, &self.legacy_marker)
            .map_err(|source| InitError::Version { source })?;
        if !legacy {
            debug!("no version rows and no domain tables, treating as uninitialized");
            return Ok(0);
        }

        info!(
            "found `{}` table without version history, assuming version {INITIAL_VERSION}",
            self.legacy_marker
        );
        self.record_version(conn, INITIAL_VERSION)
            .map_err(|source| InitError::Version { source })?;
        Ok(INITIAL_VERSION)
    }

    /// Append `version` to the log. Call on the transaction that carries the
    /// schema change so both commit or neither does.
    ///
    /// Fails with `StatementChangedRows(0)` if `version` is not above the
    /// current maximum.
    pub fn record_version(&self, conn: &Connection, version: u32) -> rusqlite::Result<()> {
        let changed = conn.execute(RECORD_VERSION_SQL, params![version])?;
        if changed != 1 {
            return Err(rusqlite::Error::StatementChangedRows(changed));
        }
        Ok(())
    }

    /// The full applied-version log, oldest first.
    pub fn history(&self, conn: &Connection) -> rusqlite::Result<Vec<VersionRecord>> {
        self.ensure_table(conn)?;
        let mut stmt =
            conn.prepare("SELECT version, applied_at FROM database_version ORDER BY version ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok(VersionRecord {
                version: row.get(0)?,
                applied_at: parse_timestamp(&row.get::<_, String>(1)?),
            })
        })?;
        rows.collect()
    }

    fn latest_recorded(&self, conn: &Connection) -> rusqlite::Result<Option<u32>> {
        conn.query_row(
            "SELECT version FROM database_version ORDER BY version DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
    }
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![name],
        |row| row.get(0),
    )
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| {
            // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .unwrap_or_default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::CREATE_USER_TABLE;

    fn memory() -> Connection {
        Connection::open_in_memory().unwrap()
    }

    #[test]
    fn empty_database_reports_zero_and_creates_table() {
        let conn = memory();
        let store = VersionStore::default();

        assert_eq!(store.current_version(&conn).unwrap(), 0);
        assert!(table_exists(&conn, "database_version").unwrap());
        assert!(store.history(&conn).unwrap().is_empty());
    }

    #[test]
    fn legacy_install_is_stamped_with_initial_version() {
        let conn = memory();
        conn.execute_batch(CREATE_USER_TABLE).unwrap();
        let store = VersionStore::default();

        assert_eq!(store.current_version(&conn).unwrap(), INITIAL_VERSION);

        let history = store.history(&conn).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].version, INITIAL_VERSION);

        // Second read comes from the log, no extra row.
        assert_eq!(store.current_version(&conn).unwrap(), INITIAL_VERSION);
        assert_eq!(store.history(&conn).unwrap().len(), 1);
    }

    #[test]
    fn custom_marker_table() {
        let conn = memory();
        conn.execute_batch("CREATE TABLE widgets (id INTEGER)").unwrap();

        assert_eq!(VersionStore::default().current_version(&conn).unwrap(), 0);
        assert_eq!(
            VersionStore::new("widgets").current_version(&conn).unwrap(),
            INITIAL_VERSION
        );
    }

    #[test]
    fn current_version_is_the_maximum_row() {
        let conn = memory();
        let store = VersionStore::default();
        store.ensure_table(&conn).unwrap();
        store.record_version(&conn, 1).unwrap();
        store.record_version(&conn, 2).unwrap();
        store.record_version(&conn, 5).unwrap();

        assert_eq!(store.current_version(&conn).unwrap(), 5);
        let versions: Vec<u32> = store
            .history(&conn)
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        assert_eq!(versions, vec![1, 2, 5]);
    }

    #[test]
    fn record_version_rejects_duplicates_and_regressions() {
        let conn = memory();
        let store = VersionStore::default();
        store.ensure_table(&conn).unwrap();
        store.record_version(&conn, 3).unwrap();

        assert!(matches!(
            store.record_version(&conn, 3),
            Err(rusqlite::Error::StatementChangedRows(0))
        ));
        assert!(store.record_version(&conn, 2).is_err());
        assert_eq!(store.current_version(&conn).unwrap(), 3);
    }

    #[test]
    fn record_version_rolls_back_with_its_transaction() {
        let mut conn = memory();
        let store = VersionStore::default();
        store.ensure_table(&conn).unwrap();

        {
            let tx = conn.transaction().unwrap();
            store.record_version(&tx, 2).unwrap();
            tx.rollback().unwrap();
        }

        assert_eq!(store.current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn applied_at_is_parsed() {
        let conn = memory();
        let store = VersionStore::default();
        store.ensure_table(&conn).unwrap();
        conn.execute(
            "INSERT INTO database_version (version, applied_at) VALUES (1, '2025-03-04 05:06:07')",
            [],
        )
        .unwrap();

        let history = store.history(&conn).unwrap();
        assert_eq!(
            history[0].applied_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            "2025-03-04 05:06:07"
        );
    }

    #[test]
    fn broken_connection_surfaces_version_error() {
        let conn = memory();
        // A read-only query_only connection cannot create the log table.
        conn.execute_batch("PRAGMA query_only = ON").unwrap();
        let err = VersionStore::default().current_version(&conn).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Version);
    }
}
