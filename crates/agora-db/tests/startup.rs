use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use agora_db::schema::LEGACY_V1_STATEMENTS;
use agora_db::{
    BackupManager, Bootstrapper, DatabaseInit, FORUM_MIGRATIONS, InitError, MigrationCatalog,
    MigrationUnit, VersionStore,
};
use rusqlite::Connection;
use tempfile::TempDir;

/// Units that leave a trace table behind, so a test can tell whether they ran.
const TRACED_UNITS: &[MigrationUnit] = &[
    MigrationUnit {
        version: 2,
        description: "trace 2",
        statements: &["CREATE TABLE IF NOT EXISTS ran_unit_2 (id INTEGER)"],
    },
    MigrationUnit {
        version: 3,
        description: "trace 3",
        statements: &["CREATE TABLE IF NOT EXISTS ran_unit_3 (id INTEGER)"],
    },
    MigrationUnit {
        version: 4,
        description: "trace 4",
        statements: &["CREATE TABLE IF NOT EXISTS ran_unit_4 (id INTEGER)"],
    },
    MigrationUnit {
        version: 5,
        description: "trace 5",
        statements: &["CREATE TABLE IF NOT EXISTS ran_unit_5 (id INTEGER)"],
    },
];

/// Unit 4 fails on its second statement.
const BROKEN_UNITS: &[MigrationUnit] = &[
    MigrationUnit {
        version: 2,
        description: "two",
        statements: &["CREATE TABLE IF NOT EXISTS step_two (id INTEGER)"],
    },
    MigrationUnit {
        version: 3,
        description: "three",
        statements: &["CREATE TABLE IF NOT EXISTS step_three (id INTEGER)"],
    },
    MigrationUnit {
        version: 4,
        description: "four",
        statements: &[
            "CREATE TABLE IF NOT EXISTS step_four (id INTEGER)",
            "INSERT INTO no_such_table (id) VALUES (1)",
        ],
    },
    MigrationUnit {
        version: 5,
        description: "five",
        statements: &["CREATE TABLE IF NOT EXISTS step_five (id INTEGER)"],
    },
];

struct Fixture {
    _dir: TempDir,
    db_path: PathBuf,
    backup_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("database");
        Self {
            db_path: data.join("forum.db"),
            backup_dir: data.join("backups"),
            _dir: dir,
        }
    }

    fn init(&self) -> DatabaseInit {
        DatabaseInit::new(&self.db_path, &self.backup_dir)
            .with_bootstrapper(Bootstrapper::forum(vec![
                "General".to_string(),
                "Music".to_string(),
            ]))
    }

    /// A pre-versioning database: the original tables, no version log.
    fn seed_legacy(&self) {
        fs::create_dir_all(self.db_path.parent().unwrap()).unwrap();
        let conn = Connection::open(&self.db_path).unwrap();
        for stmt in LEGACY_V1_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn.execute(
            "INSERT INTO user (user_id, username, email) VALUES ('u1', 'alice', 'alice@example.com')",
            [],
        )
        .unwrap();
    }

    fn backups(&self) -> Vec<PathBuf> {
        BackupManager::new(&self.backup_dir)
            .list()
            .unwrap()
            .into_iter()
            .map(|record| record.path)
            .collect()
    }

    fn open(&self) -> Connection {
        Connection::open(&self.db_path).unwrap()
    }
}

fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get::<_, i64>(0),
    )
    .unwrap()
        > 0
}

fn recorded_versions(conn: &Connection) -> Vec<u32> {
    VersionStore::default()
        .history(conn)
        .unwrap()
        .into_iter()
        .map(|record| record.version)
        .collect()
}

fn schema_objects(conn: &Connection) -> Vec<(String, String, String)> {
    let mut stmt = conn
        .prepare(
            "SELECT type, name, sql FROM sqlite_master
             WHERE name NOT LIKE 'sqlite_%' ORDER BY type, name",
        )
        .unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
        .unwrap()
        .collect::<rusqlite::Result<_>>()
        .unwrap()
}

fn age(path: &Path, days: u64) {
    let when = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(when)
        .unwrap();
}

#[test]
fn fresh_install_bootstraps_without_running_units() {
    let fx = Fixture::new();
    let catalog = MigrationCatalog::new(TRACED_UNITS.to_vec()).unwrap();

    let db = fx.init().with_catalog(catalog.clone()).init().unwrap();
    assert_eq!(db.schema_version(), 5);
    drop(db);

    let conn = fx.open();
    for unit in 2..=5 {
        assert!(!table_exists(&conn, &format!("ran_unit_{unit}")));
    }
    assert_eq!(recorded_versions(&conn), vec![5]);
    assert!(fx.backups().is_empty());
    drop(conn);

    // A second start finds nothing to do and seeds nothing twice.
    let db = fx.init().with_catalog(catalog).init().unwrap();
    assert_eq!(db.schema_version(), 5);
    let categories: i64 = db
        .connection()
        .unwrap()
        .query_row("SELECT COUNT(*) FROM categories", [], |row| row.get(0))
        .unwrap();
    assert_eq!(categories, 2);
    assert_eq!(recorded_versions(&db.connection().unwrap()), vec![5]);
    assert!(fx.backups().is_empty());
}

#[test]
fn legacy_install_is_upgraded_in_order() {
    let fx = Fixture::new();
    fx.seed_legacy();

    let db = fx.init().init().unwrap();
    assert_eq!(db.schema_version(), 5);

    let conn = db.connection().unwrap();
    assert_eq!(recorded_versions(&conn), vec![1, 2, 3, 4, 5]);
    for table in ["oauth_accounts", "oauth_states", "images", "notifications"] {
        assert!(table_exists(&conn, table), "missing {table}");
    }
    let username: String = conn
        .query_row("SELECT username FROM user WHERE user_id = 'u1'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(username, "alice");
    assert_eq!(fx.backups().len(), 1);
}

#[test]
fn failing_unit_stops_the_run_and_names_the_backup() {
    let fx = Fixture::new();
    fx.seed_legacy();
    let catalog = MigrationCatalog::new(BROKEN_UNITS.to_vec()).unwrap();

    let err = fx.init().with_catalog(catalog).init().unwrap_err();

    let backup = match &err {
        InitError::Schema {
            version,
            statement_index,
            statement,
            backup,
            ..
        } => {
            assert_eq!(*version, Some(4));
            assert_eq!(*statement_index, Some(2));
            assert!(statement.contains("no_such_table"));
            backup.clone().expect("backup path on migration failure")
        }
        other => panic!("unexpected error: {other}"),
    };
    assert!(backup.is_file());
    assert_eq!(err.backup_path(), Some(backup.as_path()));
    let message = err.to_string();
    assert!(message.contains("migration 4"));
    assert!(message.contains(&backup.display().to_string()));

    let conn = fx.open();
    assert_eq!(recorded_versions(&conn), vec![1, 2, 3]);
    assert!(table_exists(&conn, "step_three"));
    assert!(!table_exists(&conn, "step_four"));
    assert!(!table_exists(&conn, "step_five"));
}

#[test]
fn bootstrap_matches_legacy_plus_every_unit() {
    let fresh = Fixture::new();
    drop(fresh.init().init().unwrap());

    let upgraded = Fixture::new();
    upgraded.seed_legacy();
    drop(upgraded.init().init().unwrap());

    assert_eq!(
        schema_objects(&fresh.open()),
        schema_objects(&upgraded.open())
    );
}

#[test]
fn every_intermediate_version_reaches_latest() {
    for applied in 0..FORUM_MIGRATIONS.len() {
        let fx = Fixture::new();
        fx.seed_legacy();

        let partial = MigrationCatalog::new(FORUM_MIGRATIONS[..applied].to_vec()).unwrap();
        let start = fx.init().with_catalog(partial).init().unwrap();
        assert_eq!(start.schema_version(), applied as u32 + 1);
        drop(start);

        let db = fx.init().init().unwrap();
        assert_eq!(db.schema_version(), 5);
        assert_eq!(
            recorded_versions(&db.connection().unwrap()),
            vec![1, 2, 3, 4, 5]
        );
    }
}

#[test]
fn backup_holds_the_pre_migration_state() {
    let fx = Fixture::new();
    fx.seed_legacy();

    drop(fx.init().init().unwrap());

    let backups = fx.backups();
    assert_eq!(backups.len(), 1);
    let snapshot = Connection::open(&backups[0]).unwrap();
    assert_eq!(recorded_versions(&snapshot), vec![1]);
    assert!(table_exists(&snapshot, "user"));
    assert!(!table_exists(&snapshot, "images"));
    let users: i64 = snapshot
        .query_row("SELECT COUNT(*) FROM user", [], |row| row.get(0))
        .unwrap();
    assert_eq!(users, 1);
}

#[test]
fn migration_sweeps_only_expired_backups() {
    let fx = Fixture::new();
    fx.seed_legacy();
    fs::create_dir_all(&fx.backup_dir).unwrap();

    let expired = fx.backup_dir.join("forum_backup_20200101_000000.db");
    let recent = fx.backup_dir.join("forum_backup_20200102_000000.db");
    let foreign = fx.backup_dir.join("notes.txt");
    for path in [&expired, &recent, &foreign] {
        fs::write(path, b"x").unwrap();
    }
    age(&expired, 45);
    age(&recent, 3);
    age(&foreign, 45);

    drop(fx.init().with_retention_days(30).init().unwrap());

    assert!(!expired.exists());
    assert!(recent.exists());
    assert!(foreign.exists());
    // The recent file plus the snapshot this run took.
    assert_eq!(fx.backups().len(), 2);
}

#[test]
fn restore_rolls_back_a_failed_upgrade() {
    let fx = Fixture::new();
    fx.seed_legacy();
    let catalog = MigrationCatalog::new(BROKEN_UNITS.to_vec()).unwrap();
    let err = fx.init().with_catalog(catalog).init().unwrap_err();
    let backup = err.backup_path().unwrap().to_path_buf();

    let init = fx.init();
    let safety = init.restore_from_backup(&backup).unwrap();
    assert!(safety.is_some());

    let conn = fx.open();
    assert_eq!(recorded_versions(&conn), vec![1]);
    assert!(!table_exists(&conn, "step_two"));
    drop(conn);

    let db = init.init().unwrap();
    assert_eq!(db.schema_version(), 5);
}
