use std::path::Path;

use agora_config::AppConfig;
use agora_db::{BackupRecord, DatabaseInit};
use anyhow::{Context, Result};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn init(config: &AppConfig) -> Result<()> {
    let db = DatabaseInit::from_config(config)
        .init()
        .context("database initialization failed")?;
    println!(
        "Database ready at {} (schema version {})",
        db.path().display(),
        db.schema_version()
    );
    Ok(())
}

pub fn status(config: &AppConfig, json: bool) -> Result<()> {
    let report = DatabaseInit::from_config(config)
        .status()
        .context("failed to read database status")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("Database:        {}", report.path.display());
    if !report.exists {
        println!("State:           not created yet");
        println!("Latest version:  {}", report.latest_version);
        return Ok(());
    }
    println!("Current version: {}", report.current_version);
    println!("Latest version:  {}", report.latest_version);
    if report.pending.is_empty() {
        println!("Pending:         none");
    } else {
        let pending: Vec<String> = report.pending.iter().map(|v| v.to_string()).collect();
        println!("Pending:         {}", pending.join(", "));
    }
    if report.current_version > report.latest_version {
        println!("Warning: schema is newer than this build understands");
    }
    if !report.history.is_empty() {
        println!();
        println!("Applied:");
        for record in &report.history {
            println!(
                "  {:>3}  {}",
                record.version,
                record.applied_at.format(TIME_FORMAT)
            );
        }
    }
    Ok(())
}

pub fn backup_create(config: &AppConfig) -> Result<()> {
    let record = DatabaseInit::from_config(config)
        .snapshot()
        .context("failed to create backup")?;
    println!("Backup created: {}", record.path.display());
    Ok(())
}

pub fn backup_list(config: &AppConfig, json: bool) -> Result<()> {
    let records = DatabaseInit::from_config(config)
        .list_backups()
        .context("failed to list backups")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No backups in {}", config.backup_dir().display());
        return Ok(());
    }
    for record in &records {
        print_record(record);
    }
    Ok(())
}

pub fn backup_restore(config: &AppConfig, backup: &Path) -> Result<()> {
    let safety = DatabaseInit::from_config(config)
        .restore_from_backup(backup)
        .with_context(|| format!("failed to restore from {}", backup.display()))?;

    if let Some(record) = safety {
        println!("Previous database saved to {}", record.path.display());
    }
    println!(
        "Restored {} from {}",
        config.database_path().display(),
        backup.display()
    );
    Ok(())
}

pub fn backup_prune(config: &AppConfig, days: Option<u32>) -> Result<()> {
    let days = days.unwrap_or(config.database.backup_retention_days);
    let report = DatabaseInit::from_config(config)
        .prune_backups(days)
        .context("failed to prune backups")?;

    println!(
        "Removed {} backup(s) older than {days} day(s)",
        report.deleted.len()
    );
    if report.failed > 0 {
        println!("{} backup(s) could not be removed, see log", report.failed);
    }
    Ok(())
}

pub fn purge_oauth_states(config: &AppConfig) -> Result<()> {
    let db = DatabaseInit::from_config(config)
        .init()
        .context("database initialization failed")?;
    let deleted = db.purge_expired_oauth_states()?;
    println!("Removed {deleted} expired OAuth state(s)");
    Ok(())
}

fn print_record(record: &BackupRecord) {
    println!(
        "{}  {:>10} bytes  {}",
        record.created_at.format(TIME_FORMAT),
        record.size,
        record.path.display()
    );
}
