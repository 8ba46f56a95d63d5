use std::path::{Path, PathBuf};

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::model::AppConfig;

/// File names probed by [`ConfigLoader::discover`], in order.
const CANDIDATES: &[&str] = &["tidemark.yml", "tidemark.yaml", "tidemark.toml"];

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load and validate a config file. The format follows the extension.
    pub fn from_path(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = Self::parse(&contents, ext)?;
        config.validate()?;

        info!("config loaded from {}", path.display());
        Ok(config)
    }

    /// Look for a config file in `dir`, falling back to defaults when none
    /// exists.
    pub fn discover(dir: &Path) -> Result<AppConfig> {
        match Self::find(dir) {
            Some(path) => Self::from_path(&path),
            None => {
                debug!("no config file in {}, using defaults", dir.display());
                Ok(AppConfig::default())
            }
        }
    }

    pub fn find(dir: &Path) -> Option<PathBuf> {
        CANDIDATES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    fn parse(contents: &str, ext: &str) -> Result<AppConfig> {
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => {
                toml::from_str(contents).map_err(|e| Error::Config(format!("TOML parse error: {e}")))
            }
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_yaml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yml");
        std::fs::write(
            &path,
            "default_database: main
migrations:
  directory: db/migrations
  table: schema_migrations
  safe: true
databases:
  main:
    path: main.db
  replica:
    path: replica.db
    readonly: true
    timezone: Europe/Berlin
",
        )
        .unwrap();

        let config = ConfigLoader::from_path(&path).unwrap();
        assert_eq!(config.default_database, "main");
        assert_eq!(config.migrations.table, "schema_migrations");
        assert_eq!(config.migrations.directory, PathBuf::from("db/migrations"));
        assert!(config.migrations.safe);
        assert!(!config.databases["main"].readonly);
        assert_eq!(config.databases["main"].timezone, "UTC");
        assert!(config.databases["replica"].readonly);
    }

    #[test]
    fn loads_toml_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.toml");
        std::fs::write(
            &path,
            r#"
[migrations]
table = "migrations"

[databases.default]
path = ":memory:"
"#,
        )
        .unwrap();

        let config = ConfigLoader::from_path(&path).unwrap();
        assert_eq!(config.default_database, "default");
        assert!(config.databases["default"].is_in_memory());
        assert_eq!(config.migrations.directory, PathBuf::from("migrations"));
    }

    #[test]
    fn rejects_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.ini");
        std::fs::write(&path, "table=migrations").unwrap();

        let err = ConfigLoader::from_path(&path).unwrap_err();
        assert!(err.to_string().contains("unsupported config extension: ini"));
    }

    #[test]
    fn invalid_config_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tidemark.yaml");
        std::fs::write(&path, "default_database: missing\n").unwrap();

        assert!(ConfigLoader::from_path(&path).is_err());
    }

    #[test]
    fn discover_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConfigLoader::find(dir.path()).is_none());

        let config = ConfigLoader::discover(dir.path()).unwrap();
        assert_eq!(config.databases.len(), 1);

        std::fs::write(dir.path().join("tidemark.yaml"), "migrations:\n  safe: true\n").unwrap();
        let config = ConfigLoader::discover(dir.path()).unwrap();
        assert!(config.migrations.safe);
    }
}
