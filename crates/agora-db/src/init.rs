use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use agora_common::{Error, Result};
use agora_config::AppConfig;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::backup::{BackupManager, BackupRecord, SweepReport};
use crate::bootstrap::Bootstrapper;
use crate::catalog::MigrationCatalog;
use crate::error::{InitError, RetentionError};
use crate::maintenance;
use crate::pool::{self, DbPool, PoolSettings, PooledConnection};
use crate::runner::{DEFAULT_RETENTION_DAYS, MigrationRunner, RunOutcome};
use crate::version::{VersionRecord, VersionStore};

/// Startup sequence for the forum database.
///
/// `init` creates the data directory, bootstraps a new file or migrates an
/// existing one, verifies the schema converged on the catalog's latest
/// version, and only then builds the shared pool. The operator methods work
/// on the same paths without building a pool.
#[derive(Debug, Clone)]
pub struct DatabaseInit {
    path: PathBuf,
    catalog: MigrationCatalog,
    versions: VersionStore,
    bootstrapper: Bootstrapper,
    backups: BackupManager,
    pool: PoolSettings,
    retention_days: u32,
}

impl DatabaseInit {
    /// Builtin catalog and schema, no seeded categories, default pool bounds.
    pub fn new(path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            catalog: MigrationCatalog::builtin(),
            versions: VersionStore::default(),
            bootstrapper: Bootstrapper::forum(Vec::new()),
            backups: BackupManager::new(backup_dir),
            pool: PoolSettings::default(),
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.database_path(), config.backup_dir())
            .with_bootstrapper(Bootstrapper::forum(config.categories.clone()))
            .with_pool_settings(PoolSettings::from(&config.database))
            .with_retention_days(config.database.backup_retention_days)
    }

    pub fn with_catalog(mut self, catalog: MigrationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_bootstrapper(mut self, bootstrapper: Bootstrapper) -> Self {
        self.bootstrapper = bootstrapper;
        self
    }

    pub fn with_version_store(mut self, versions: VersionStore) -> Self {
        self.versions = versions;
        self
    }

    pub fn with_pool_settings(mut self, settings: PoolSettings) -> Self {
        self.pool = settings;
        self
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Bring the database to the latest schema version and open the pool.
    pub fn init(&self) -> std::result::Result<Database, InitError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| InitError::Config {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let existed = self.path.exists();
        let mut conn = pool::open_connection(&self.path, self.pool.busy_timeout)?;
        let expected = self.catalog.latest_version();

        let mut backup = None;
        if existed {
            match self.runner().run(&mut conn, &self.path)? {
                RunOutcome::Uninitialized => {
                    info!(
                        "database file {} has no schema, initializing",
                        self.path.display()
                    );
                    self.bootstrapper.run(&mut conn, &self.versions, expected)?;
                }
                RunOutcome::UpToDate { .. } => {}
                RunOutcome::Migrated { backup: record, .. } => backup = Some(record.path),
            }
        } else {
            info!("creating new database at {}", self.path.display());
            self.bootstrapper.run(&mut conn, &self.versions, expected)?;
        }

        let current = self
            .versions
            .current_version(&conn)
            .map_err(|e| e.with_backup(backup.as_deref()))?;
        if current != expected {
            return Err(InitError::NotConverged {
                current,
                expected,
                backup,
            });
        }

        // The migration connection must be closed before the pool opens its own.
        drop(conn);
        let pool = pool::open_pool(&self.path, self.pool)
            .map_err(|e| e.with_backup(backup.as_deref()))?;
        info!("database ready at schema version {current}");

        Ok(Database {
            pool,
            path: self.path.clone(),
            schema_version: current,
        })
    }

    /// Version state of the database file without migrating it.
    ///
    /// Reading the version heals a missing log table and stamps a legacy
    /// database, exactly as startup would.
    pub fn status(&self) -> std::result::Result<StatusReport, InitError> {
        let latest_version = self.catalog.latest_version();
        if !self.path.exists() {
            return Ok(StatusReport {
                path: self.path.clone(),
                exists: false,
                current_version: 0,
                latest_version,
                pending: self.pending_versions(0),
                history: Vec::new(),
            });
        }

        let conn = pool::open_connection(&self.path, self.pool.busy_timeout)?;
        let current_version = self.versions.current_version(&conn)?;
        let history = self
            .versions
            .history(&conn)
            .map_err(|source| InitError::Version { source })?;

        Ok(StatusReport {
            path: self.path.clone(),
            exists: true,
            current_version,
            latest_version,
            pending: self.pending_versions(current_version),
            history,
        })
    }

    /// Replace the live file with `backup`. Must not run while a pool is open.
    ///
    /// Returns the snapshot taken of the file being replaced, if there was one.
    pub fn restore_from_backup(
        &self,
        backup: &Path,
    ) -> std::result::Result<Option<BackupRecord>, InitError> {
        Ok(self.backups.restore(backup, &self.path)?)
    }

    pub fn list_backups(&self) -> std::result::Result<Vec<BackupRecord>, InitError> {
        Ok(self.backups.list()?)
    }

    /// Take an on-demand snapshot of the live file.
    pub fn snapshot(&self) -> std::result::Result<BackupRecord, InitError> {
        Ok(self.backups.snapshot(&self.path)?)
    }

    pub fn prune_backups(
        &self,
        max_age_days: u32,
    ) -> std::result::Result<SweepReport, RetentionError> {
        self.backups.sweep(max_age_days)
    }

    fn runner(&self) -> MigrationRunner {
        MigrationRunner::new(
            self.catalog.clone(),
            self.versions.clone(),
            self.backups.clone(),
        )
        .with_retention_days(self.retention_days)
    }

    fn pending_versions(&self, current: u32) -> Vec<u32> {
        self.catalog
            .pending(current)
            .iter()
            .map(|unit| unit.version)
            .collect()
    }
}

/// Snapshot of the schema version state, for operators.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub path: PathBuf,
    pub exists: bool,
    pub current_version: u32,
    pub latest_version: u32,
    pub pending: Vec<u32>,
    pub history: Vec<VersionRecord>,
}

/// A converged database and its bounded connection pool.
pub struct Database {
    pool: DbPool,
    path: PathBuf,
    schema_version: u32,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("schema_version", &self.schema_version)
            .field("max_size", &self.pool.max_size())
            .finish()
    }
}

impl Database {
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn connection(&self) -> Result<PooledConnection> {
        self.pool
            .get()
            .map_err(|e| Error::Database(format!("failed to check out connection: {e}")))
    }

    /// Remove expired OAuth states; returns how many were deleted.
    pub fn purge_expired_oauth_states(&self) -> Result<usize> {
        let conn = self.connection()?;
        maintenance::purge_expired_oauth_states(&conn, Utc::now())
            .map_err(|e| Error::Database(format!("failed to purge OAuth states: {e}")))
    }
}
