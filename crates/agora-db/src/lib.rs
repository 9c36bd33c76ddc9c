//! Schema versioning, migrations and backups for the forum's SQLite database.
//!
//! [`DatabaseInit`] is the entry point: it bootstraps or migrates the file at
//! startup and hands back a pooled [`Database`] once the schema has converged.

pub mod backup;
pub mod bootstrap;
pub mod catalog;
pub mod error;
pub mod init;
pub mod maintenance;
pub mod pool;
pub mod runner;
pub mod schema;
pub mod version;

pub use backup::{BackupManager, BackupRecord, SweepReport};
pub use bootstrap::Bootstrapper;
pub use catalog::{FORUM_MIGRATIONS, MigrationCatalog, MigrationUnit};
pub use error::{BackupError, CatalogError, ConnectFailure, ErrorKind, InitError, RetentionError};
pub use init::{Database, DatabaseInit, StatusReport};
pub use pool::{DbPool, PoolSettings, PooledConnection};
pub use runner::{MigrationRunner, RunOutcome};
pub use version::{VersionRecord, VersionStore};
