use rusqlite::{Connection, params};
use tracing::info;

use crate::error::InitError;
use crate::schema::{BOOTSTRAP_STATEMENTS, SEED_CATEGORY_SQL};
use crate::version::{CREATE_VERSION_TABLE_SQL, RECORD_VERSION_SQL, VersionStore};

/// Creates the full schema of a new install in one transaction.
///
/// The script encodes the cumulative result of every migration; historical
/// migration units are never replayed on a fresh database.
#[derive(Debug, Clone)]
pub struct Bootstrapper {
    statements: &'static [&'static str],
    categories: Vec<String>,
}

impl Bootstrapper {
    pub fn new(statements: &'static [&'static str], categories: Vec<String>) -> Self {
        Self {
            statements,
            categories,
        }
    }

    /// The forum schema, seeding the given categories.
    pub fn forum(categories: Vec<String>) -> Self {
        Self::new(BOOTSTRAP_STATEMENTS, categories)
    }

    /// Create tables and indexes, seed categories and stamp `target_version`.
    ///
    /// Any failure rolls the whole script back.
    pub fn run(
        &self,
        conn: &mut Connection,
        versions: &VersionStore,
        target_version: u32,
    ) -> Result<(), InitError> {
        let tx = conn
            .transaction()
            .map_err(|source| schema_error("BEGIN", None, source))?;

        for (i, stmt) in self.statements.iter().copied().enumerate() {
            tx.execute_batch(stmt)
                .map_err(|source| schema_error(stmt, Some(i + 1), source))?;
        }

        {
            let mut insert = tx
                .prepare(SEED_CATEGORY_SQL)
                .map_err(|source| schema_error(SEED_CATEGORY_SQL, None, source))?;
            for name in &self.categories {
                insert
                    .execute(params![name])
                    .map_err(|source| schema_error(SEED_CATEGORY_SQL, None, source))?;
            }
        }

        tx.execute_batch(CREATE_VERSION_TABLE_SQL)
            .map_err(|source| schema_error(CREATE_VERSION_TABLE_SQL, None, source))?;
        versions
            .record_version(&tx, target_version)
            .map_err(|source| schema_error(RECORD_VERSION_SQL, None, source))?;

        tx.commit()
            .map_err(|source| schema_error("COMMIT", None, source))?;

        info!(
            "database initialized at version {target_version} ({} categories seeded)",
            self.categories.len()
        );
        Ok(())
    }
}

fn schema_error(
    statement: &str,
    statement_index: Option<usize>,
    source: rusqlite::Error,
) -> InitError {
    InitError::Schema {
        version: None,
        statement_index,
        statement: statement.to_string(),
        backup: None,
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::table_exists;

    fn categories(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn category_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn creates_schema_seeds_and_stamps_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let versions = VersionStore::default();

        Bootstrapper::forum(categories(&["General", "Rust"]))
            .run(&mut conn, &versions, 5)
            .unwrap();

        for table in ["user", "posts", "images", "notifications", "oauth_states"] {
            assert!(table_exists(&conn, table).unwrap(), "missing {table}");
        }
        assert_eq!(category_count(&conn), 2);
        assert_eq!(versions.current_version(&conn).unwrap(), 5);
        assert_eq!(versions.history(&conn).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_categories_are_ignored() {
        let mut conn = Connection::open_in_memory().unwrap();
        Bootstrapper::forum(categories(&["General", "General", "Music"]))
            .run(&mut conn, &VersionStore::default(), 5)
            .unwrap();
        assert_eq!(category_count(&conn), 2);
    }

    #[test]
    fn failure_rolls_back_everything() {
        const BROKEN: &[&str] = &[
            "CREATE TABLE IF NOT EXISTS first (id INTEGER)",
            "CREATE TABLE IF NOT EXISTS categories (category_id INTEGER PRIMARY KEY, name TEXT UNIQUE)",
            "CREATE INDEX idx_nowhere ON missing_table(id)",
        ];
        let mut conn = Connection::open_in_memory().unwrap();
        let versions = VersionStore::default();

        let err = Bootstrapper::new(BROKEN, Vec::new())
            .run(&mut conn, &versions, 3)
            .unwrap_err();

        match &err {
            InitError::Schema {
                version,
                statement_index,
                statement,
                backup,
                ..
            } => {
                assert_eq!(*version, None);
                assert_eq!(*statement_index, Some(3));
                assert!(statement.contains("missing_table"));
                assert!(backup.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!table_exists(&conn, "first").unwrap());
        assert!(!table_exists(&conn, "database_version").unwrap());
    }
}
