use tidemark_common::Result;
use tidemark_db::{ColumnDefinition, Database, TableBlueprint};
use tracing::{debug, info};

/// Columns every bookkeeping table must carry.
pub const FIELDS: [&str; 4] = ["id", "migration", "time_executed", "created_at"];

/// Composite index identifying one applied migration.
pub const INDEX: [&str; 2] = ["migration", "created_at"];

/// Index left behind by older layouts that keyed rows by name only.
const LEGACY_INDEX: [&str; 1] = ["migration"];

/// The bookkeeping table of one database.
pub struct MigrationsTable<'a> {
    db: &'a dyn Database,
    name: &'a str,
}

impl<'a> MigrationsTable<'a> {
    pub fn new(db: &'a dyn Database, name: &'a str) -> Self {
        Self { db, name }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Whether the table exists with every expected column and the
    /// `(migration, created_at)` index.
    pub fn is_present(&self) -> Result<bool> {
        let schema = self.db.introspect(self.name)?;
        if !schema.exists {
            return Ok(false);
        }

        Ok(FIELDS.iter().all(|field| schema.has_column(field)) && schema.has_index(&INDEX))
    }

    /// Create or repair the table. Issues no DDL when it is already in shape.
    pub fn actualize(&self) -> Result<()> {
        let changed = TableBlueprint::new(self.db, self.name)
            .primary("id")
            .column(ColumnDefinition::string("migration", 191).not_null())
            .column(ColumnDefinition::datetime("time_executed"))
            .column(ColumnDefinition::datetime("created_at"))
            .drop_index(&LEGACY_INDEX)
            .unique(&INDEX)
            .save()?;

        if changed {
            info!("{}: bookkeeping table '{}' actualized", self.db.name(), self.name);
        } else {
            debug!("{}: bookkeeping table '{}' is up to date", self.db.name(), self.name);
        }
        Ok(())
    }
}
