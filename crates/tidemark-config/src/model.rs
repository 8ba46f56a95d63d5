use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::LazyLock;

use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tidemark_common::{Error, Result};

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Top-level configuration: where migrations live and which databases they
/// target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_name")]
    pub default_database: String,
    #[serde(default)]
    pub migrations: MigrationConfig,
    #[serde(default = "default_databases")]
    pub databases: BTreeMap<String, DatabaseConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            default_database: default_database_name(),
            migrations: MigrationConfig::default(),
            databases: default_databases(),
        }
    }
}

impl AppConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.databases.contains_key(&self.default_database) {
            return Err(Error::Config(format!(
                "default database '{}' is not declared under `databases`",
                self.default_database
            )));
        }

        if !IDENTIFIER.is_match(&self.migrations.table) {
            return Err(Error::Config(format!(
                "invalid migrations table name '{}'",
                self.migrations.table
            )));
        }

        for (name, database) in &self.databases {
            database
                .timezone()
                .map_err(|e| Error::Config(format!("database '{name}': {e}")))?;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Directory scanned by the file repository.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// Bookkeeping table created in every writable database.
    #[serde(default = "default_table")]
    pub table: String,
    /// Run destructive commands without asking for confirmation. Not used by
    /// the migrator itself.
    #[serde(default)]
    pub safe: bool,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            table: default_table(),
            safe: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// File path, or `:memory:` for a private in-memory database.
    pub path: String,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            readonly: false,
            timezone: default_timezone(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(":memory:")
    }

    pub fn is_in_memory(&self) -> bool {
        self.path == ":memory:"
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| Error::Config(format!("invalid timezone '{}': {e}", self.timezone)))
    }
}

fn default_database_name() -> String {
    "default".to_string()
}

fn default_databases() -> BTreeMap<String, DatabaseConfig> {
    [(default_database_name(), DatabaseConfig::new("tidemark.db"))]
        .into_iter()
        .collect()
}

fn default_directory() -> PathBuf {
    PathBuf::from("migrations")
}

fn default_table() -> String {
    "migrations".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}
