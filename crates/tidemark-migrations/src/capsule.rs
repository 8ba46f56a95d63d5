use std::sync::Arc;

use tidemark_common::Result;
use tidemark_db::{Database, Row, Table, TableBlueprint, TableSchema, Value};

/// Binds a migration to one database for a single run.
#[derive(Clone)]
pub struct Capsule {
    database: Arc<dyn Database>,
}

impl Capsule {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &dyn Database {
        self.database.as_ref()
    }

    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        self.database.execute(sql, params)
    }

    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.database.execute_batch(sql)
    }

    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.database.query(sql, params)
    }

    /// Row access to `name`.
    pub fn table(&self, name: &str) -> Table<'_> {
        Table::new(self.database(), name)
    }

    /// Schema blueprint for `name`; finish it with `create`, `update`,
    /// `drop_table`, `rename` or `save`.
    pub fn schema(&self, name: &str) -> TableBlueprint<'_> {
        TableBlueprint::new(self.database(), name)
    }

    pub fn describe(&self, name: &str) -> Result<TableSchema> {
        self.database.introspect(name)
    }
}

impl std::fmt::Debug for Capsule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capsule")
            .field("database", &self.database.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use tidemark_db::{ColumnDefinition, SqliteDatabase};

    use super::*;

    #[test]
    fn capsule_operates_on_bound_database() {
        let db: Arc<dyn Database> = Arc::new(SqliteDatabase::in_memory("default").unwrap());
        let capsule = Capsule::new(db.clone());

        capsule
            .schema("users")
            .primary("id")
            .column(ColumnDefinition::string("email", 255).not_null())
            .unique(&["email"])
            .create()
            .unwrap();
        capsule
            .table("users")
            .insert(&[("email", "ada@example.com".into())])
            .unwrap();

        let rows = capsule.query("SELECT email FROM users", &[]).unwrap();
        assert_eq!(rows[0].get_str("email"), Some("ada@example.com"));
        assert!(capsule.describe("users").unwrap().has_index(&["email"]));
        assert_eq!(capsule.database().name(), "default");
        assert_eq!(format!("{capsule:?}"), "Capsule { database: \"default\" }");
    }
}
