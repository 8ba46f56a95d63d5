use std::collections::BTreeMap;
use std::sync::Arc;

use tidemark_common::{Error, Result};
use tidemark_config::AppConfig;
use tracing::debug;

use crate::database::Database;
use crate::sqlite::SqliteDatabase;

/// Named databases plus the name used when a migration targets none.
pub struct DatabaseManager {
    default: String,
    databases: BTreeMap<String, Arc<dyn Database>>,
}

impl DatabaseManager {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            databases: BTreeMap::new(),
        }
    }

    /// Open every database declared in `config` with the SQLite driver.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;

        let mut manager = Self::new(config.default_database.clone());
        for (name, database) in &config.databases {
            debug!("registering database '{name}' ({})", database.path);
            manager.add(Arc::new(SqliteDatabase::from_config(name, database)?));
        }
        Ok(manager)
    }

    /// Register a database under its own name, replacing any previous one.
    pub fn add(&mut self, database: Arc<dyn Database>) -> &mut Self {
        self.databases.insert(database.name().to_string(), database);
        self
    }

    pub fn default_name(&self) -> &str {
        &self.default
    }

    /// Resolve a database by name; `None` selects the default database.
    pub fn database(&self, name: Option<&str>) -> Result<Arc<dyn Database>> {
        let name = name.unwrap_or(self.default.as_str());
        self.databases
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Database(format!("database '{name}' is not configured")))
    }

    pub fn databases(&self) -> impl Iterator<Item = &Arc<dyn Database>> {
        self.databases.values()
    }
}
