use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tidemark_config::{AppConfig, ConfigLoader};
use tidemark_db::DatabaseManager;
use tidemark_migrations::{
    DB_DATE_FORMAT, FileRepository, Migrator, Repository, SqlSource, State, Status,
};
use tracing::info;

use crate::prompt;

pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    match path {
        Some(path) => ConfigLoader::from_path(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => {
            let cwd = std::env::current_dir().context("failed to resolve working directory")?;
            ConfigLoader::discover(&cwd).context("failed to load config")
        }
    }
}

fn migrator(config: &AppConfig) -> Result<Migrator<FileRepository>> {
    let dbal = DatabaseManager::from_config(config).context("failed to open databases")?;
    let repository = FileRepository::new(&config.migrations.directory);
    Ok(Migrator::new(config.migrations.clone(), dbal, repository))
}

fn ensure_configured(migrator: &Migrator<FileRepository>) -> Result<()> {
    if !migrator.is_configured()? {
        bail!("migrations are not configured, run `tidemark init` first");
    }
    Ok(())
}

pub fn init(config: &AppConfig) -> Result<()> {
    let migrator = migrator(config)?;
    migrator.configure().context("failed to configure migrations")?;

    println!("Bookkeeping table '{}' is ready.", config.migrations.table);
    Ok(())
}

pub fn migrate(config: &AppConfig, one: bool, force: bool) -> Result<()> {
    let migrator = migrator(config)?;
    ensure_configured(&migrator)?;

    if !(config.migrations.safe || force)
        && !prompt::confirm("Apply pending migrations to the configured databases?")?
    {
        bail!("migration cancelled");
    }

    let mut executed = 0;
    while let Some(migration) = migrator.run(None)? {
        println!("Migration '{}' was successfully executed.", migration.identity());
        executed += 1;
        if one {
            break;
        }
    }

    if executed == 0 {
        println!("No pending migrations.");
    }
    info!("{executed} migration(s) executed");
    Ok(())
}

pub fn rollback(config: &AppConfig, all: bool, force: bool) -> Result<()> {
    let migrator = migrator(config)?;
    ensure_configured(&migrator)?;

    let question = if all {
        "Roll back every executed migration?"
    } else {
        "Roll back the last executed migration?"
    };
    if !(config.migrations.safe || force) && !prompt::confirm(question)? {
        bail!("rollback cancelled");
    }

    let mut reverted = 0;
    while let Some(migration) = migrator.rollback(None)? {
        println!("Migration '{}' was successfully rolled back.", migration.identity());
        reverted += 1;
        if !all {
            break;
        }
    }

    if reverted == 0 {
        println!("No executed migrations.");
    }
    info!("{reverted} migration(s) rolled back");
    Ok(())
}

#[derive(Serialize)]
struct StatusEntry<'a> {
    database: &'a str,
    #[serde(flatten)]
    state: &'a State,
}

pub fn status(config: &AppConfig, json: bool) -> Result<()> {
    let migrator = migrator(config)?;
    ensure_configured(&migrator)?;

    let migrations = migrator.migrations()?;
    let mut entries = Vec::with_capacity(migrations.len());
    for migration in &migrations {
        entries.push(StatusEntry {
            database: migration
                .database()
                .unwrap_or(migrator.dbal().default_name()),
            state: migration.state()?,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No migrations found in {}.", config.migrations.directory.display());
        return Ok(());
    }

    println!(
        "{:<40} {:<12} {:<20} {:<10} {}",
        "Migration", "Database", "Created", "Status", "Executed"
    );
    for entry in &entries {
        let status = match entry.state.status() {
            Status::Executed => "executed",
            Status::Pending => "pending",
            Status::Undefined => "undefined",
        };
        let executed = entry
            .state
            .time_executed()
            .map(|at| at.format(DB_DATE_FORMAT).to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<40} {:<12} {:<20} {:<10} {}",
            entry.state.name(),
            entry.database,
            entry.state.time_created().format(DB_DATE_FORMAT),
            status,
            executed
        );
    }
    Ok(())
}

pub fn new_migration(config: &AppConfig, name: &str, database: Option<String>) -> Result<()> {
    if let Some(database) = &database {
        if !config.databases.contains_key(database) {
            bail!("database '{database}' is not configured");
        }
    }

    let repository = FileRepository::new(&config.migrations.directory);
    let source = SqlSource {
        database,
        ..SqlSource::default()
    };
    let identity = repository
        .register(name, source)
        .with_context(|| format!("failed to create migration '{name}'"))?;

    println!(
        "Created {}",
        repository.directory().join(format!("{identity}.sql")).display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;
    use tidemark_config::DatabaseConfig;
    use tidemark_db::Database;

    use super::*;

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.migrations.directory = dir.path().join("migrations");
        config.databases.insert(
            "default".to_string(),
            DatabaseConfig::new(dir.path().join("app.db").to_string_lossy()),
        );
        config
    }

    #[test]
    fn migrate_requires_init() {
        let dir = TempDir::new().unwrap();
        let err = migrate(&config(&dir), false, true).unwrap_err();
        assert!(err.to_string().contains("tidemark init"));
    }

    #[test]
    fn new_rejects_unknown_database() {
        let dir = TempDir::new().unwrap();
        let err = new_migration(&config(&dir), "create_users", Some("nope".to_string())).unwrap_err();
        assert!(err.to_string().contains("'nope' is not configured"));
    }

    #[test]
    fn full_cycle_against_sqlite_file() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);

        new_migration(&config, "placeholder", None).unwrap();
        fs::write(
            config.migrations.directory.join("20200101.000000_1_create_users.sql"),
            "-- up\nCREATE TABLE users (id INTEGER PRIMARY KEY);\n-- down\nDROP TABLE users;\n",
        )
        .unwrap();

        init(&config).unwrap();
        migrate(&config, false, true).unwrap();
        status(&config, true).unwrap();
        status(&config, false).unwrap();

        let db = tidemark_db::SqliteDatabase::from_config("default", &config.databases["default"]).unwrap();
        assert!(db.introspect("users").unwrap().exists);
        let rows = db.query("SELECT migration FROM migrations ORDER BY id", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get_str("migration"), Some("create_users"));

        rollback(&config, true, true).unwrap();
        assert!(!db.introspect("users").unwrap().exists);
        let rows = db.query("SELECT migration FROM migrations", &[]).unwrap();
        assert!(rows.is_empty());
    }
}
