use std::path::{Path, PathBuf};

use thiserror::Error;

/// Coarse classification of a startup failure, for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Connection,
    Version,
    Backup,
    Schema,
}

/// Fatal failure of database initialization. Nothing is served after one of these.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("failed to create database directory {}: {source}", .path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to connect to database {}: {source}", .path.display())]
    Connection {
        path: PathBuf,
        #[source]
        source: ConnectFailure,
    },

    #[error("failed to read schema version: {source}")]
    Version {
        #[source]
        source: rusqlite::Error,
    },

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error("{}", describe_schema_failure(.version, .statement_index, .statement, .backup, .source))]
    Schema {
        /// Migration unit being applied; `None` during bootstrap.
        version: Option<u32>,
        /// 1-based position of the failing statement inside its unit or script.
        statement_index: Option<usize>,
        statement: String,
        /// Snapshot taken before the run, if one was taken.
        backup: Option<PathBuf>,
        #[source]
        source: rusqlite::Error,
    },

    #[error("schema version {current} does not match expected {expected}{}", backup_suffix(.backup))]
    NotConverged {
        current: u32,
        expected: u32,
        backup: Option<PathBuf>,
    },

    /// A failure after migrations committed; the pre-migration snapshot is kept.
    #[error("{source}\nBackup: {}", .backup.display())]
    AfterMigration {
        backup: PathBuf,
        #[source]
        source: Box<InitError>,
    },
}

impl InitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::Config,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Version { .. } => ErrorKind::Version,
            Self::Backup(_) => ErrorKind::Backup,
            Self::Schema { .. } | Self::NotConverged { .. } => ErrorKind::Schema,
            Self::AfterMigration { source, .. } => source.kind(),
        }
    }

    /// Attach the snapshot taken by this run, unless the error already names one.
    pub fn with_backup(self, backup: Option<&Path>) -> Self {
        match backup {
            Some(path) if self.backup_path().is_none() => Self::AfterMigration {
                backup: path.to_path_buf(),
                source: Box::new(self),
            },
            _ => self,
        }
    }

    /// Snapshot an operator can restore from, when the failure happened after one was taken.
    pub fn backup_path(&self) -> Option<&Path> {
        match self {
            Self::Schema { backup, .. } | Self::NotConverged { backup, .. } => backup.as_deref(),
            Self::AfterMigration { backup, .. } => Some(backup),
            Self::Backup(BackupError::Restore { safety, .. }) => safety.as_deref(),
            _ => None,
        }
    }

    pub fn failing_statement(&self) -> Option<&str> {
        match self {
            Self::Schema { statement, .. } => Some(statement),
            Self::AfterMigration { source, .. } => source.failing_statement(),
            _ => None,
        }
    }

    pub fn migration_version(&self) -> Option<u32> {
        match self {
            Self::Schema { version, .. } => *version,
            Self::AfterMigration { source, .. } => source.migration_version(),
            _ => None,
        }
    }
}

impl From<InitError> for agora_common::Error {
    fn from(err: InitError) -> Self {
        match err {
            InitError::Config { .. } => Self::Config(err.to_string()),
            InitError::Backup(BackupError::NotFound { path }) => {
                Self::NotFound(format!("backup {}", path.display()))
            }
            InitError::Backup(e) => Self::Backup(e.to_string()),
            other => Self::Database(other.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConnectFailure {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),
}

/// Failure to take, list or restore a snapshot.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("failed to open source database {}: {source}", .path.display())]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create backup directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to copy {} to {}: {source}", .from.display(), .to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to sync {}: {source}", .path.display())]
    Sync {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("backup does not exist: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("restore failed: {source}{}", safety_suffix(.safety))]
    Restore {
        /// Snapshot of the live file taken before it was overwritten.
        safety: Option<PathBuf>,
        #[source]
        source: Box<BackupError>,
    },

    #[error("failed to read backup directory {}: {source}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The retention sweep could not list the backup directory. Logged, never fatal.
#[derive(Error, Debug)]
#[error("failed to read backup directory {}: {source}", .dir.display())]
pub struct RetentionError {
    pub dir: PathBuf,
    #[source]
    pub source: std::io::Error,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("migration version {version} must be above the baseline {baseline}")]
    BelowBaseline { version: u32, baseline: u32 },

    #[error("duplicate migration version {0}")]
    Duplicate(u32),

    #[error("migration {next} is listed after {previous}")]
    OutOfOrder { previous: u32, next: u32 },
}

fn describe_schema_failure(
    version: &Option<u32>,
    statement_index: &Option<usize>,
    statement: &str,
    backup: &Option<PathBuf>,
    source: &rusqlite::Error,
) -> String {
    let scope = match version {
        Some(v) => format!("migration {v}"),
        None => "bootstrap".to_string(),
    };
    let step = match statement_index {
        Some(i) => format!(" statement {i}"),
        None => String::new(),
    };
    format!(
        "{scope}{step} failed: {source}\nSQL: {}{}",
        statement.trim(),
        backup_suffix(backup)
    )
}

fn safety_suffix(safety: &Option<PathBuf>) -> String {
    match safety {
        Some(path) => format!("\nPrevious database saved to: {}", path.display()),
        None => String::new(),
    }
}

fn backup_suffix(backup: &Option<PathBuf>) -> String {
    match backup {
        Some(path) => format!("\nBackup: {}", path.display()),
        None => String::new(),
    }
}
