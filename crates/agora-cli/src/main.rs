mod commands;

use std::path::PathBuf;

use agora_config::{AppConfig, ConfigLoader};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "agora")]
#[command(about = "Forum database initialization, status and backups")]
#[command(version)]
struct Cli {
    /// Directory holding config.yml / config.yaml / config.toml
    #[arg(long, env = "AGORA_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Overrides the configured data directory
    #[arg(long, env = "AGORA_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or migrate the database, then verify the pool opens
    Init,
    /// Show the schema version, pending migrations and version history
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Manage database snapshots
    Backup {
        #[command(subcommand)]
        action: BackupAction,
    },
    /// Delete OAuth states that have expired
    PurgeOauthStates,
}

#[derive(Subcommand)]
enum BackupAction {
    /// Snapshot the live database now
    Create,
    /// List snapshots, oldest first
    List {
        #[arg(long)]
        json: bool,
    },
    /// Replace the live database with a snapshot. Stop the server first.
    Restore { path: PathBuf },
    /// Delete snapshots older than the retention window
    Prune {
        /// Defaults to the configured retention
        #[arg(long)]
        days: Option<u32>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli)?;

    match cli.command {
        Command::Init => commands::init(&config),
        Command::Status { json } => commands::status(&config, json),
        Command::Backup { action } => match action {
            BackupAction::Create => commands::backup_create(&config),
            BackupAction::List { json } => commands::backup_list(&config, json),
            BackupAction::Restore { path } => commands::backup_restore(&config, &path),
            BackupAction::Prune { days } => commands::backup_prune(&config, days),
        },
        Command::PurgeOauthStates => commands::purge_oauth_states(&config),
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(ConfigLoader::default_config_dir);
    let mut config = ConfigLoader::new(&config_dir)
        .load()
        .with_context(|| format!("failed to load config from {}", config_dir.display()))?;

    if let Some(dir) = &cli.data_dir {
        config.data_dir = Some(dir.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_backup_restore() {
        let cli = Cli::try_parse_from([
            "agora",
            "--data-dir",
            "/srv/forum",
            "backup",
            "restore",
            "/srv/forum/backups/forum_backup_20240101_000000.db",
        ])
        .unwrap();

        assert_eq!(cli.data_dir, Some(PathBuf::from("/srv/forum")));
        match cli.command {
            Command::Backup {
                action: BackupAction::Restore { path },
            } => assert!(path.ends_with("forum_backup_20240101_000000.db")),
            _ => panic!("expected backup restore"),
        }
    }

    #[test]
    fn prune_days_is_optional() {
        let cli = Cli::try_parse_from(["agora", "backup", "prune"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backup {
                action: BackupAction::Prune { days: None }
            }
        ));
    }
}
