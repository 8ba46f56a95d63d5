use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tidemark_common::{Error, Result};
use tracing::{debug, info};

use crate::capsule::Capsule;
use crate::migration::{Migration, MigrationDefinition};
use crate::repository::{MigrationIdentity, Repository, declare, ensure_unique, next_identity};

const DATABASE_HEADER: &str = "-- database:";
const UP_MARKER: &str = "-- up";
const DOWN_MARKER: &str = "-- down";

/// SQL text of one migration, as stored in a `.sql` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlSource {
    pub database: Option<String>,
    pub up: String,
    pub down: String,
}

impl SqlSource {
    pub fn new(up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            database: None,
            up: up.into(),
            down: down.into(),
        }
    }

    pub fn on_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Parse a migration file body. `None` when there is no `-- up` section.
    pub fn parse(content: &str) -> Option<Self> {
        #[derive(PartialEq)]
        enum Section {
            Header,
            Up,
            Down,
        }

        let mut database = None;
        let mut section = Section::Header;
        let mut seen_up = false;
        let mut up = Vec::new();
        let mut down = Vec::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.eq_ignore_ascii_case(UP_MARKER) {
                section = Section::Up;
                seen_up = true;
                continue;
            }
            if trimmed.eq_ignore_ascii_case(DOWN_MARKER) {
                section = Section::Down;
                continue;
            }

            match section {
                Section::Header => {
                    if let Some(name) = trimmed.strip_prefix(DATABASE_HEADER) {
                        let name = name.trim();
                        if !name.is_empty() {
                            database = Some(name.to_string());
                        }
                    }
                }
                Section::Up => up.push(line),
                Section::Down => down.push(line),
            }
        }

        if !seen_up {
            return None;
        }

        Some(Self {
            database,
            up: up.join("\n").trim().to_string(),
            down: down.join("\n").trim().to_string(),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(database) = &self.database {
            out.push_str(&format!("{DATABASE_HEADER} {database}\n\n"));
        }
        out.push_str(UP_MARKER);
        out.push('\n');
        out.push_str(self.up.trim());
        out.push_str("\n\n");
        out.push_str(DOWN_MARKER);
        out.push('\n');
        out.push_str(self.down.trim());
        out.push('\n');
        out
    }
}

/// A migration whose body is plain SQL.
#[derive(Debug, Clone)]
pub struct SqlMigration {
    source: SqlSource,
}

impl SqlMigration {
    pub fn new(source: SqlSource) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &SqlSource {
        &self.source
    }
}

impl Migration for SqlMigration {
    fn database(&self) -> Option<&str> {
        self.source.database.as_deref()
    }

    fn up(&self, capsule: &Capsule) -> Result<()> {
        if self.source.up.is_empty() {
            return Ok(());
        }
        capsule.execute_batch(&self.source.up)
    }

    fn down(&self, capsule: &Capsule) -> Result<()> {
        if self.source.down.is_empty() {
            return Ok(());
        }
        capsule.execute_batch(&self.source.down)
    }
}

/// Migrations stored as `<identity>.sql` files in one directory.
pub struct FileRepository {
    directory: PathBuf,
}

impl FileRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Identities and paths of every `.sql` file, unsorted.
    fn scan(&self) -> Result<Vec<(MigrationIdentity, PathBuf)>> {
        if !self.directory.exists() {
            debug!("migration directory {} does not exist", self.directory.display());
            return Ok(Vec::new());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            found.push((MigrationIdentity::parse(stem)?, path));
        }
        Ok(found)
    }

    fn load(identity: &MigrationIdentity, path: &Path) -> Result<SqlMigration> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::Repository(format!("failed to read migration {}: {e}", path.display()))
        })?;
        let source = SqlSource::parse(&content).ok_or_else(|| {
            Error::Repository(format!(
                "migration '{identity}' cannot be resolved, no '{UP_MARKER}' section in {}",
                path.display()
            ))
        })?;
        Ok(SqlMigration::new(source))
    }
}

impl Repository for FileRepository {
    type Source = SqlSource;

    fn migrations(&self) -> Result<Vec<MigrationDefinition>> {
        let mut found = self.scan()?;
        found.sort_by(|a, b| a.0.cmp(&b.0));

        let mut migrations = Vec::with_capacity(found.len());
        for (position, (identity, path)) in found.iter().enumerate() {
            ensure_unique(identity, found[..position].iter().map(|(accepted, _)| accepted))?;
            let migration = Self::load(identity, path)?;
            migrations.push(declare(identity, Arc::new(migration)));
        }
        Ok(migrations)
    }

    fn register(&self, name: &str, source: Self::Source) -> Result<String> {
        let existing: Vec<MigrationIdentity> =
            self.scan()?.into_iter().map(|(identity, _)| identity).collect();
        let identity = next_identity(name, existing.iter())?;

        fs::create_dir_all(&self.directory)?;
        let path = self.directory.join(format!("{identity}.sql"));
        if path.exists() {
            return Err(Error::Repository(format!(
                "unable to register migration '{name}', file {} already exists",
                path.display()
            )));
        }
        fs::write(&path, source.render())?;

        info!("created migration {}", path.display());
        Ok(identity.to_string())
    }
}
