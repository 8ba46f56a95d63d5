use tidemark_common::{Error, Result};
use tracing::debug;

use crate::database::Database;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    /// Auto-incrementing integer primary key.
    Primary,
    Integer,
    String(u32),
    Text,
    DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub kind: ColumnType,
    pub nullable: bool,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: kind != ColumnType::Primary,
        }
    }

    pub fn primary(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Primary)
    }

    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Integer)
    }

    pub fn string(name: impl Into<String>, length: u32) -> Self {
        Self::new(name, ColumnType::String(length))
    }

    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::Text)
    }

    pub fn datetime(name: impl Into<String>) -> Self {
        Self::new(name, ColumnType::DateTime)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    pub columns: Vec<String>,
    pub unique: bool,
}

impl IndexDefinition {
    pub fn new(columns: &[&str], unique: bool) -> Self {
        Self {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique,
        }
    }

    /// Deterministic index name, scoped by table since some engines keep
    /// index names database-wide.
    pub fn name_for(&self, table: &str) -> String {
        format!("{table}_index_{}", self.columns.join("_"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub primary: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexInfo {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    /// False for indexes backing constraints, which cannot be dropped alone.
    pub droppable: bool,
}

/// Introspected shape of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub exists: bool,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
}

impl TableSchema {
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// True when an index covers exactly `columns`, in order.
    pub fn has_index(&self, columns: &[&str]) -> bool {
        self.find_index(columns).is_some()
    }

    pub fn find_index(&self, columns: &[&str]) -> Option<&IndexInfo> {
        self.indexes.iter().find(|index| {
            index.columns.len() == columns.len()
                && index.columns.iter().zip(columns).all(|(a, b)| a == b)
        })
    }
}

/// Declarative description of a table, applied against the live schema.
///
/// `save` brings the table to the declared shape and is a no-op when nothing
/// differs. `create`, `update`, `drop_table` and `rename` are strict: they fail
/// with [`Error::Schema`] when the live schema contradicts the request.
pub struct TableBlueprint<'a> {
    db: &'a dyn Database,
    table: String,
    columns: Vec<ColumnDefinition>,
    indexes: Vec<IndexDefinition>,
    dropped_indexes: Vec<Vec<String>>,
}

impl<'a> TableBlueprint<'a> {
    pub fn new(db: &'a dyn Database, table: impl Into<String>) -> Self {
        Self {
            db,
            table: table.into(),
            columns: Vec::new(),
            indexes: Vec::new(),
            dropped_indexes: Vec::new(),
        }
    }

    pub fn primary(self, name: &str) -> Self {
        self.column(ColumnDefinition::primary(name))
    }

    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.retain(|c| c.name != column.name);
        self.columns.push(column);
        self
    }

    pub fn index(self, columns: &[&str]) -> Self {
        self.with_index(IndexDefinition::new(columns, false))
    }

    pub fn unique(self, columns: &[&str]) -> Self {
        self.with_index(IndexDefinition::new(columns, true))
    }

    pub fn drop_index(mut self, columns: &[&str]) -> Self {
        self.dropped_indexes
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    fn with_index(mut self, index: IndexDefinition) -> Self {
        self.indexes.retain(|i| i.columns != index.columns);
        self.indexes.push(index);
        self
    }

    /// Sync the live table to this blueprint. Returns whether any DDL ran.
    pub fn save(self) -> Result<bool> {
        let schema = self.db.introspect(&self.table)?;
        let statements = if schema.exists {
            self.alter_statements(&schema, false)?
        } else {
            self.create_statements()?
        };
        self.apply(statements)
    }

    pub fn create(self) -> Result<()> {
        if self.db.introspect(&self.table)?.exists {
            return Err(Error::Schema(format!(
                "unable to create table '{}', table already exists",
                self.table
            )));
        }
        let statements = self.create_statements()?;
        self.apply(statements).map(|_| ())
    }

    pub fn update(self) -> Result<()> {
        let schema = self.db.introspect(&self.table)?;
        if !schema.exists {
            return Err(Error::Schema(format!(
                "unable to update table '{}', no table exists",
                self.table
            )));
        }
        let statements = self.alter_statements(&schema, true)?;
        self.apply(statements).map(|_| ())
    }

    pub fn drop_table(self) -> Result<()> {
        if !self.db.introspect(&self.table)?.exists {
            return Err(Error::Schema(format!(
                "unable to drop table '{}', table does not exist",
                self.table
            )));
        }
        let sql = format!("DROP TABLE {}", self.db.quote(&self.table));
        self.apply(vec![sql]).map(|_| ())
    }

    pub fn rename(self, to: &str) -> Result<()> {
        if !self.db.introspect(&self.table)?.exists {
            return Err(Error::Schema(format!(
                "unable to rename table '{}', table does not exist",
                self.table
            )));
        }
        if self.db.introspect(to)?.exists {
            return Err(Error::Schema(format!(
                "unable to rename table '{}', table '{to}' already exists",
                self.table
            )));
        }
        let sql = format!(
            "ALTER TABLE {} RENAME TO {}",
            self.db.quote(&self.table),
            self.db.quote(to)
        );
        self.apply(vec![sql]).map(|_| ())
    }

    fn create_statements(&self) -> Result<Vec<String>> {
        if self.columns.is_empty() {
            return Err(Error::Schema(format!(
                "unable to create table '{}', no columns were added",
                self.table
            )));
        }

        let columns: Vec<String> = self.columns.iter().map(|c| self.db.column_sql(c)).collect();
        let mut statements = vec![format!(
            "CREATE TABLE {} ({})",
            self.db.quote(&self.table),
            columns.join(", ")
        )];
        statements.extend(self.indexes.iter().map(|i| self.create_index_sql(i)));
        Ok(statements)
    }

    /// Statements turning `schema` into this blueprint. In `strict` mode
    /// anything already present is an error instead of being skipped.
    fn alter_statements(&self, schema: &TableSchema, strict: bool) -> Result<Vec<String>> {
        let mut statements = Vec::new();

        for columns in &self.dropped_indexes {
            let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
            match schema.find_index(&columns) {
                Some(index) if index.droppable => {
                    statements.push(format!("DROP INDEX {}", self.db.quote(&index.name)));
                }
                Some(index) => {
                    return Err(Error::Schema(format!(
                        "unable to drop index '{}'.({}), index '{}' backs a constraint",
                        self.table,
                        columns.join(", "),
                        index.name
                    )));
                }
                None if strict => {
                    return Err(Error::Schema(format!(
                        "unable to drop index '{}'.({}), index does not exist",
                        self.table,
                        columns.join(", ")
                    )));
                }
                None => {}
            }
        }

        for column in &self.columns {
            if schema.has_column(&column.name) {
                if strict {
                    return Err(Error::Schema(format!(
                        "unable to create column '{}'.'{}', column already exists",
                        self.table, column.name
                    )));
                }
                continue;
            }
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {}",
                self.db.quote(&self.table),
                self.db.column_sql(column)
            ));
        }

        for index in &self.indexes {
            let columns: Vec<&str> = index.columns.iter().map(String::as_str).collect();
            match schema.find_index(&columns) {
                Some(existing) if strict => {
                    return Err(Error::Schema(format!(
                        "unable to create index '{}'.({}), index already exists",
                        self.table, existing.columns.join(", ")
                    )));
                }
                Some(existing) if existing.unique == index.unique => {}
                Some(existing) => {
                    statements.push(format!("DROP INDEX {}", self.db.quote(&existing.name)));
                    statements.push(self.create_index_sql(index));
                }
                None => statements.push(self.create_index_sql(index)),
            }
        }

        Ok(statements)
    }

    fn create_index_sql(&self, index: &IndexDefinition) -> String {
        let columns: Vec<String> = index.columns.iter().map(|c| self.db.quote(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.db.quote(&index.name_for(&self.table)),
            self.db.quote(&self.table),
            columns.join(", ")
        )
    }

    fn apply(&self, statements: Vec<String>) -> Result<bool> {
        if statements.is_empty() {
            debug!("{}.{}: schema up to date", self.db.name(), self.table);
            return Ok(false);
        }

        for sql in &statements {
            debug!("{}: {sql}", self.db.name());
            self.db.execute(sql, &[]).map_err(|e| {
                Error::Schema(format!("unable to sync table '{}': {e}", self.table))
            })?;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;

    fn db() -> SqliteDatabase {
        SqliteDatabase::in_memory("default").unwrap()
    }

    fn sample(db: &SqliteDatabase) -> TableBlueprint<'_> {
        TableBlueprint::new(db, "sample")
            .primary("id")
            .column(ColumnDefinition::string("column", 255).not_null())
    }

    #[test]
    fn save_creates_then_becomes_noop() {
        let db = db();
        assert!(sample(&db).index(&["column"]).save().unwrap());
        assert!(!sample(&db).index(&["column"]).save().unwrap());

        let schema = db.introspect("sample").unwrap();
        assert!(schema.exists);
        assert!(schema.has_column("id"));
        assert!(schema.has_column("column"));
        assert!(schema.has_index(&["column"]));
        assert!(!schema.find_index(&["column"]).unwrap().unique);
    }

    #[test]
    fn save_adds_missing_columns_and_swaps_index_uniqueness() {
        let db = db();
        sample(&db).index(&["column"]).save().unwrap();

        let changed = sample(&db)
            .column(ColumnDefinition::datetime("created_at"))
            .unique(&["column"])
            .save()
            .unwrap();
        assert!(changed);

        let schema = db.introspect("sample").unwrap();
        assert!(schema.has_column("created_at"));
        assert!(schema.find_index(&["column"]).unwrap().unique);
    }

    #[test]
    fn save_drops_requested_indexes_only_when_present() {
        let db = db();
        sample(&db).index(&["column"]).save().unwrap();

        assert!(sample(&db).drop_index(&["column"]).save().unwrap());
        assert!(!db.introspect("sample").unwrap().has_index(&["column"]));
        assert!(!sample(&db).drop_index(&["column"]).save().unwrap());
    }

    #[test]
    fn create_requires_columns_and_a_free_name() {
        let db = db();
        let err = TableBlueprint::new(&db, "sample").create().unwrap_err();
        assert_eq!(
            err.to_string(),
            "schema error: unable to create table 'sample', no columns were added"
        );

        sample(&db).create().unwrap();
        let err = sample(&db).create().unwrap_err();
        assert!(err.to_string().contains("table already exists"));
    }

    #[test]
    fn update_is_strict_about_existing_objects() {
        let db = db();
        let err = sample(&db).update().unwrap_err();
        assert!(err.to_string().contains("unable to update table 'sample', no table exists"));

        sample(&db).create().unwrap();
        let err = TableBlueprint::new(&db, "sample")
            .column(ColumnDefinition::string("column", 255))
            .update()
            .unwrap_err();
        assert!(err.to_string().contains("column already exists"));

        let err = TableBlueprint::new(&db, "sample")
            .drop_index(&["column"])
            .update()
            .unwrap_err();
        assert!(err.to_string().contains("index does not exist"));

        TableBlueprint::new(&db, "sample")
            .index(&["column"])
            .update()
            .unwrap();
        let err = TableBlueprint::new(&db, "sample")
            .index(&["column"])
            .update()
            .unwrap_err();
        assert!(err.to_string().contains("index already exists"));
    }

    #[test]
    fn drop_and_rename_check_existence() {
        let db = db();
        let err = TableBlueprint::new(&db, "sample").drop_table().unwrap_err();
        assert!(err.to_string().contains("table does not exist"));
        let err = TableBlueprint::new(&db, "sample").rename("renamed").unwrap_err();
        assert!(err.to_string().contains("unable to rename table 'sample', table does not exist"));

        sample(&db).create().unwrap();
        TableBlueprint::new(&db, "busy").primary("id").create().unwrap();
        let err = TableBlueprint::new(&db, "sample").rename("busy").unwrap_err();
        assert!(err.to_string().contains("table 'busy' already exists"));

        TableBlueprint::new(&db, "sample").rename("renamed").unwrap();
        assert!(db.introspect("renamed").unwrap().exists);
        TableBlueprint::new(&db, "renamed").drop_table().unwrap();
        assert!(!db.introspect("renamed").unwrap().exists);
    }
}
