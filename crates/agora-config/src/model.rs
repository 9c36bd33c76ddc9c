use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Directory holding the database file and its backups when no override is given.
pub const DEFAULT_DATA_DIR: &str = "./database";

/// Top-level configuration for the forum storage layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub data_dir: Option<PathBuf>,
    pub database: DatabaseConfig,
    /// Reference categories seeded on a fresh install.
    pub categories: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            database: DatabaseConfig::default(),
            categories: default_categories(),
        }
    }
}

impl AppConfig {
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    /// Full path of the live database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir().join(&self.database.file_name)
    }

    /// Directory that receives pre-migration snapshots.
    pub fn backup_dir(&self) -> PathBuf {
        self.data_dir().join(&self.database.backup_dir)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub file_name: String,
    /// Backup directory, relative to the data directory unless absolute.
    pub backup_dir: PathBuf,
    pub backup_retention_days: u32,
    pub max_open_connections: u32,
    pub max_idle_connections: u32,
    pub busy_timeout_ms: u64,
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            file_name: "forum.db".to_string(),
            backup_dir: PathBuf::from("backups"),
            backup_retention_days: 30,
            max_open_connections: 10,
            max_idle_connections: 5,
            busy_timeout_ms: 5_000,
            acquire_timeout_secs: 30,
        }
    }
}

fn default_categories() -> Vec<String> {
    [
        "General",
        "Technology",
        "Science",
        "Gaming",
        "Music",
        "Movies",
        "Sports",
        "Travel",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
