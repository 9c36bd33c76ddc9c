use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{BackupError, RetentionError};

/// File name prefix shared by the snapshot writer and the retention sweep.
pub const BACKUP_PREFIX: &str = "forum_backup";
pub const BACKUP_EXTENSION: &str = "db";
/// `chrono` format of the timestamp segment of a backup name.
pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;
const SIDECAR_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

static BACKUP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = format!(
        r"^{}_\d{{8}}_\d{{6}}(?:_\d+)?\.{}$",
        regex::escape(BACKUP_PREFIX),
        regex::escape(BACKUP_EXTENSION)
    );
    Regex::new(&pattern).expect("valid backup name pattern")
});

/// Whether `file_name` follows the `<prefix>_<YYYYMMDD_HHMMSS>[_n].db` convention.
pub fn is_backup_name(file_name: &str) -> bool {
    BACKUP_NAME.is_match(file_name)
}

/// A snapshot file on disk. Derived from the filesystem, never stored in the database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupRecord {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

/// Outcome of a retention sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: Vec<PathBuf>,
    pub failed: usize,
}

/// Takes, lists, prunes and restores byte-for-byte snapshots of the database file.
#[derive(Debug, Clone)]
pub struct BackupManager {
    backup_dir: PathBuf,
}

impl BackupManager {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Copy `source` into a new timestamped file and flush it to disk.
    ///
    /// The destination is created exclusively; if a snapshot already exists
    /// for the same second a numeric suffix is added.
    pub fn snapshot(&self, source: &Path) -> Result<BackupRecord, BackupError> {
        let mut reader = File::open(source).map_err(|e| BackupError::SourceUnreadable {
            path: source.to_path_buf(),
            source: e,
        })?;

        fs::create_dir_all(&self.backup_dir).map_err(|e| BackupError::CreateDir {
            path: self.backup_dir.clone(),
            source: e,
        })?;

        let stamp = Utc::now().format(BACKUP_TIMESTAMP_FORMAT).to_string();
        let (path, writer) = self.create_unique(&stamp)?;

        // A partial copy must not survive under a valid backup name.
        let record = match fill_snapshot(&mut reader, writer, source, &path) {
            Ok(record) => record,
            Err(e) => {
                if let Err(remove) = fs::remove_file(&path) {
                    warn!("failed to remove partial backup {}: {remove}", path.display());
                }
                return Err(e);
            }
        };
        info!(
            "database backup created: {} ({} bytes)",
            record.path.display(),
            record.size
        );
        Ok(record)
    }

    /// Delete backups last modified more than `max_age_days` ago.
    ///
    /// Best effort: files that cannot be removed are logged and counted, the
    /// sweep carries on. Files outside the naming convention are never touched.
    pub fn sweep(&self, max_age_days: u32) -> Result<SweepReport, RetentionError> {
        let age = Duration::from_secs(u64::from(max_age_days) * SECONDS_PER_DAY);
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.sweep_older_than(cutoff)
    }

    pub fn sweep_older_than(&self, cutoff: SystemTime) -> Result<SweepReport, RetentionError> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(SweepReport::default()),
            Err(e) => {
                return Err(RetentionError {
                    dir: self.backup_dir.clone(),
                    source: e,
                });
            }
        };

        let mut expired = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_backup_name(name) {
                continue;
            }
            let Ok(meta) = entry.metadata() else { continue };
            if !meta.is_file() {
                continue;
            }
            let Ok(modified) = meta.modified() else { continue };
            if modified >= cutoff {
                continue;
            }

            expired.push(entry.path());
        }

        let report = remove_expired(expired);
        if !report.deleted.is_empty() {
            info!("cleaned up {} old backup(s)", report.deleted.len());
        }
        Ok(report)
    }

    /// Overwrite `live` with the bytes of `backup`.
    ///
    /// The current live file is snapshotted first, so a bad restore can itself
    /// be undone; that snapshot is returned, or named in the error if the
    /// overwrite fails. Stale journal sidecars of the live file are removed so
    /// SQLite does not replay them over the restored bytes.
    pub fn restore(
        &self,
        backup: &Path,
        live: &Path,
    ) -> Result<Option<BackupRecord>, BackupError> {
        if !backup.is_file() {
            return Err(BackupError::NotFound {
                path: backup.to_path_buf(),
            });
        }

        let safety = if live.exists() {
            let record = self.snapshot(live)?;
            info!("current database backed up to {}", record.path.display());
            Some(record)
        } else {
            None
        };

        if let Err(e) = overwrite(backup, live) {
            return Err(BackupError::Restore {
                safety: safety.map(|record| record.path),
                source: Box::new(e),
            });
        }

        remove_sidecars(live);
        info!("database restored from {}", backup.display());
        Ok(safety)
    }

    /// Every file following the naming convention, oldest first.
    pub fn list(&self) -> Result<Vec<BackupRecord>, BackupError> {
        let entries = match fs::read_dir(&self.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(BackupError::ReadDir {
                    path: self.backup_dir.clone(),
                    source: e,
                });
            }
        };

        let mut records = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            if !name.to_str().is_some_and(|n| is_backup_name(n)) {
                continue;
            }
            match record_for(&entry.path()) {
                Ok(record) if record.path.is_file() => records.push(record),
                Ok(_) => {}
                Err(e) => warn!("skipping unreadable backup {}: {e}", entry.path().display()),
            }
        }
        records.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(records)
    }

    fn create_unique(&self, stamp: &str) -> Result<(PathBuf, File), BackupError> {
        let mut counter = 0u32;
        loop {
            let name = if counter == 0 {
                format!("{BACKUP_PREFIX}_{stamp}.{BACKUP_EXTENSION}")
            } else {
                format!("{BACKUP_PREFIX}_{stamp}_{counter}.{BACKUP_EXTENSION}")
            };
            let path = self.backup_dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((path, file)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => counter += 1,
                Err(e) => {
                    return Err(BackupError::Copy {
                        from: PathBuf::new(),
                        to: path,
                        source: e,
                    });
                }
            }
        }
    }
}

fn overwrite(backup: &Path, live: &Path) -> Result<(), BackupError> {
    let mut reader = File::open(backup).map_err(|e| BackupError::SourceUnreadable {
        path: backup.to_path_buf(),
        source: e,
    })?;
    let copy_err = |e: io::Error| BackupError::Copy {
        from: backup.to_path_buf(),
        to: live.to_path_buf(),
        source: e,
    };
    let mut writer = File::create(live).map_err(copy_err)?;
    io::copy(&mut reader, &mut writer).map_err(copy_err)?;
    writer.sync_all().map_err(|e| BackupError::Sync {
        path: live.to_path_buf(),
        source: e,
    })
}

fn fill_snapshot(
    reader: &mut File,
    mut writer: File,
    source: &Path,
    path: &Path,
) -> Result<BackupRecord, BackupError> {
    io::copy(reader, &mut writer).map_err(|e| BackupError::Copy {
        from: source.to_path_buf(),
        to: path.to_path_buf(),
        source: e,
    })?;
    writer.sync_all().map_err(|e| BackupError::Sync {
        path: path.to_path_buf(),
        source: e,
    })?;
    drop(writer);
    record_for(path).map_err(|e| BackupError::Sync {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Remove every path, carrying on past failures.
fn remove_expired(paths: Vec<PathBuf>) -> SweepReport {
    let mut report = SweepReport::default();
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("removed expired backup {}", path.display());
                report.deleted.push(path);
            }
            Err(e) => {
                warn!("failed to remove expired backup {}: {e}", path.display());
                report.failed += 1;
            }
        }
    }
    report
}

fn record_for(path: &Path) -> io::Result<BackupRecord> {
    let meta = fs::metadata(path)?;
    let created_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    Ok(BackupRecord {
        path: path.to_path_buf(),
        created_at,
        size: meta.len(),
    })
}

fn remove_sidecars(live: &Path) {
    for suffix in SIDECAR_SUFFIXES {
        let mut name = live.as_os_str().to_owned();
        name.push(suffix);
        let sidecar = PathBuf::from(name);
        match fs::remove_file(&sidecar) {
            Ok(()) => debug!("removed stale {}", sidecar.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {e}", sidecar.display()),
        }
    }
}
