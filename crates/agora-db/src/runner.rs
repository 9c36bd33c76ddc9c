use std::path::{Path, PathBuf};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::backup::{BackupManager, BackupRecord, SweepReport};
use crate::catalog::{MigrationCatalog, MigrationUnit};
use crate::error::InitError;
use crate::version::{RECORD_VERSION_SQL, VersionStore};

/// Days a pre-migration snapshot is kept before the sweep may remove it.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// How a migration run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No version rows and no domain tables: the caller should bootstrap.
    Uninitialized,
    /// Nothing pending; no backup was taken.
    UpToDate { version: u32 },
    Migrated {
        from: u32,
        to: u32,
        applied: Vec<u32>,
        backup: BackupRecord,
    },
}

impl RunOutcome {
    pub fn version(&self) -> u32 {
        match self {
            Self::Uninitialized => 0,
            Self::UpToDate { version } => *version,
            Self::Migrated { to, .. } => *to,
        }
    }
}

/// Carries an existing database forward through the pending catalog units.
///
/// Each unit runs in its own transaction together with its version stamp.
/// A failing unit is rolled back and stops the run; units committed before it
/// stay committed. Nothing runs until a snapshot of the file exists.
#[derive(Debug, Clone)]
pub struct MigrationRunner {
    catalog: MigrationCatalog,
    versions: VersionStore,
    backups: BackupManager,
    retention_days: u32,
}

impl MigrationRunner {
    pub fn new(catalog: MigrationCatalog, versions: VersionStore, backups: BackupManager) -> Self {
        Self {
            catalog,
            versions,
            backups,
            retention_days: DEFAULT_RETENTION_DAYS,
        }
    }

    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = days;
        self
    }

    pub fn catalog(&self) -> &MigrationCatalog {
        &self.catalog
    }

    /// Apply every pending unit to the database at `db_path`, opened as `conn`.
    pub fn run(&self, conn: &mut Connection, db_path: &Path) -> Result<RunOutcome, InitError> {
        let current = self.versions.current_version(conn)?;
        if current == 0 {
            return Ok(RunOutcome::Uninitialized);
        }

        let pending = self.catalog.pending(current);
        if pending.is_empty() {
            info!("database is up to date (version {current})");
            return Ok(RunOutcome::UpToDate { version: current });
        }

        info!(
            "running {} migration(s) from version {current} to {}",
            pending.len(),
            self.catalog.latest_version()
        );
        let backup = self.backups.snapshot(db_path)?;

        let mut applied = Vec::with_capacity(pending.len());
        for unit in pending {
            self.apply(conn, unit, &backup.path)?;
            applied.push(unit.version);
        }

        self.sweep_backups();

        let to = applied.last().copied().unwrap_or(current);
        info!(
            "all migrations completed, version {to}; backup stored at {}",
            backup.path.display()
        );
        Ok(RunOutcome::Migrated {
            from: current,
            to,
            applied,
            backup,
        })
    }

    /// Retention is best effort; `None` when the sweep could not run at all.
    fn sweep_backups(&self) -> Option<SweepReport> {
        match self.backups.sweep(self.retention_days) {
            Ok(report) => {
                if report.failed > 0 {
                    warn!("{} old backup(s) could not be removed", report.failed);
                }
                Some(report)
            }
            Err(e) => {
                warn!("backup retention sweep failed: {e}");
                None
            }
        }
    }

    fn apply(
        &self,
        conn: &mut Connection,
        unit: &MigrationUnit,
        backup: &Path,
    ) -> Result<(), InitError> {
        info!("applying migration {}: {}", unit.version, unit.description);
        let fail = |statement: &str, statement_index: Option<usize>, source| InitError::Schema {
            version: Some(unit.version),
            statement_index,
            statement: statement.to_string(),
            backup: Some(PathBuf::from(backup)),
            source,
        };

        let tx = conn
            .transaction()
            .map_err(|source| fail("BEGIN", None, source))?;

        for (i, stmt) in unit.statements.iter().copied().enumerate() {
            // Dropping `tx` on the error path rolls the unit back.
            tx.execute_batch(stmt)
                .map_err(|source| fail(stmt, Some(i + 1), source))?;
        }

        self.versions
            .record_version(&tx, unit.version)
            .map_err(|source| fail(RECORD_VERSION_SQL, None, source))?;

        tx.commit().map_err(|source| fail("COMMIT", None, source))?;
        info!("migration {} completed", unit.version);
        Ok(())
    }
}
