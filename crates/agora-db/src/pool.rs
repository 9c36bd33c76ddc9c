use std::path::Path;
use std::time::Duration;

use agora_config::DatabaseConfig;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{ConnectFailure, InitError};

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Bounds applied to the shared pool before it is handed to request handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_open: u32,
    /// Idle connections the pool keeps warm (r2d2 `min_idle`).
    pub max_idle: u32,
    pub busy_timeout: Duration,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::from(&DatabaseConfig::default())
    }
}

impl From<&DatabaseConfig> for PoolSettings {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_open: config.max_open_connections,
            max_idle: config.max_idle_connections,
            busy_timeout: Duration::from_millis(config.busy_timeout_ms),
            acquire_timeout: Duration::from_secs(config.acquire_timeout_secs),
        }
    }
}

impl PoolSettings {
    /// r2d2 requires at least one connection and no more idle than open.
    fn normalized(self) -> Self {
        let max_open = self.max_open.max(1);
        Self {
            max_open,
            max_idle: self.max_idle.min(max_open),
            ..self
        }
    }
}

const CONNECTION_PRAGMAS: &str = "PRAGMA foreign_keys=ON;";

/// Open the single connection used for bootstrap and migrations, and ping it.
pub(crate) fn open_connection(
    path: &Path,
    busy_timeout: Duration,
) -> Result<Connection, InitError> {
    let connect_err = |source: rusqlite::Error| InitError::Connection {
        path: path.to_path_buf(),
        source: ConnectFailure::Sqlite(source),
    };

    let conn = Connection::open(path).map_err(connect_err)?;
    conn.busy_timeout(busy_timeout).map_err(connect_err)?;
    conn.execute_batch(CONNECTION_PRAGMAS).map_err(connect_err)?;
    ping(&conn).map_err(connect_err)?;
    debug!("opened migration connection to {}", path.display());
    Ok(conn)
}

/// Build the shared pool. Every pooled connection gets the same pragmas.
pub(crate) fn open_pool(path: &Path, settings: PoolSettings) -> Result<DbPool, InitError> {
    let settings = settings.normalized();
    let busy_timeout = settings.busy_timeout;
    let manager = SqliteConnectionManager::file(path).with_init(move |conn| {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(CONNECTION_PRAGMAS)
    });

    let pool = r2d2::Pool::builder()
        .max_size(settings.max_open)
        .min_idle(Some(settings.max_idle))
        .connection_timeout(settings.acquire_timeout)
        .build(manager)
        .map_err(|e| InitError::Connection {
            path: path.to_path_buf(),
            source: ConnectFailure::Pool(e),
        })?;

    let conn = pool.get().map_err(|e| InitError::Connection {
        path: path.to_path_buf(),
        source: ConnectFailure::Pool(e),
    })?;
    ping(&conn).map_err(|e| InitError::Connection {
        path: path.to_path_buf(),
        source: ConnectFailure::Sqlite(e),
    })?;

    info!(
        "connection pool ready (max open {}, idle {})",
        settings.max_open, settings.max_idle
    );
    Ok(pool)
}

fn ping(conn: &Connection) -> rusqlite::Result<()> {
    conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
        .map(|_| ())
}
