use tidemark_common::Result;

use crate::database::Database;
use crate::schema::TableSchema;
use crate::value::{Row, Value};

/// Row-level access to one table. Conditions are ANDed; a `Value::Null`
/// condition matches with `IS NULL`.
pub struct Table<'a> {
    db: &'a dyn Database,
    name: String,
}

impl<'a> Table<'a> {
    pub fn new(db: &'a dyn Database, name: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Result<TableSchema> {
        self.db.introspect(&self.name)
    }

    pub fn select(&self, columns: &[&str]) -> Select<'a> {
        Select {
            db: self.db,
            table: self.name.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            conditions: Vec::new(),
        }
    }

    pub fn insert(&self, values: &[(&str, Value)]) -> Result<usize> {
        let columns: Vec<String> = values.iter().map(|(c, _)| self.db.quote(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.db.quote(&self.name),
            columns.join(", ")
        );
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        self.db.execute(&sql, &params)
    }

    pub fn update(&self, values: &[(&str, Value)], conditions: &[(&str, Value)]) -> Result<usize> {
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, _)| format!("{} = ?", self.db.quote(c)))
            .collect();
        let mut params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        let (clause, condition_params) = where_clause(self.db, conditions);
        params.extend(condition_params);

        let sql = format!(
            "UPDATE {} SET {}{clause}",
            self.db.quote(&self.name),
            assignments.join(", ")
        );
        self.db.execute(&sql, &params)
    }

    pub fn delete(&self, conditions: &[(&str, Value)]) -> Result<usize> {
        let (clause, params) = where_clause(self.db, conditions);
        let sql = format!("DELETE FROM {}{clause}", self.db.quote(&self.name));
        self.db.execute(&sql, &params)
    }
}

/// A pending `SELECT` against one table.
pub struct Select<'a> {
    db: &'a dyn Database,
    table: String,
    columns: Vec<String>,
    conditions: Vec<(String, Value)>,
}

impl Select<'_> {
    pub fn where_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((column.to_string(), value.into()));
        self
    }

    pub fn where_null(self, column: &str) -> Self {
        self.where_eq(column, Value::Null)
    }

    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        let (sql, params) = self.sql(None);
        self.db.query(&sql, &params)
    }

    pub fn fetch_one(&self) -> Result<Option<Row>> {
        let (sql, params) = self.sql(Some(1));
        Ok(self.db.query(&sql, &params)?.into_iter().next())
    }

    pub fn count(&self) -> Result<i64> {
        let conditions = self.borrowed_conditions();
        let (clause, params) = where_clause(self.db, &conditions);
        let sql = format!(
            "SELECT count(*) AS aggregate FROM {}{clause}",
            self.db.quote(&self.table)
        );
        let rows = self.db.query(&sql, &params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get_i64("aggregate"))
            .unwrap_or(0))
    }

    fn sql(&self, limit: Option<usize>) -> (String, Vec<Value>) {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            let quoted: Vec<String> = self.columns.iter().map(|c| self.db.quote(c)).collect();
            quoted.join(", ")
        };
        let conditions = self.borrowed_conditions();
        let (clause, params) = where_clause(self.db, &conditions);
        let mut sql = format!(
            "SELECT {columns} FROM {}{clause}",
            self.db.quote(&self.table)
        );
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        (sql, params)
    }

    fn borrowed_conditions(&self) -> Vec<(&str, Value)> {
        self.conditions
            .iter()
            .map(|(c, v)| (c.as_str(), v.clone()))
            .collect()
    }
}

fn where_clause(db: &dyn Database, conditions: &[(&str, Value)]) -> (String, Vec<Value>) {
    if conditions.is_empty() {
        return (String::new(), Vec::new());
    }

    let mut parts = Vec::with_capacity(conditions.len());
    let mut params = Vec::new();
    for (column, value) in conditions {
        if value.is_null() {
            parts.push(format!("{} IS NULL", db.quote(column)));
        } else {
            parts.push(format!("{} = ?", db.quote(column)));
            params.push(value.clone());
        }
    }
    (format!(" WHERE {}", parts.join(" AND ")), params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteDatabase;

    fn db() -> SqliteDatabase {
        let db = SqliteDatabase::in_memory("default").unwrap();
        db.execute_batch(
            "CREATE TABLE migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                migration VARCHAR(191) NOT NULL,
                time_executed DATETIME,
                created_at DATETIME
            );",
        )
        .unwrap();
        db
    }

    #[test]
    fn insert_then_select_by_condition() {
        let db = db();
        let table = Table::new(&db, "migrations");
        table
            .insert(&[
                ("migration", "create_users".into()),
                ("time_executed", "2024-01-01 10:00:00".into()),
                ("created_at", "2023-12-31 09:00:00".into()),
            ])
            .unwrap();

        let row = table
            .select(&["id", "time_executed"])
            .where_eq("migration", "create_users")
            .where_eq("created_at", "2023-12-31 09:00:00")
            .fetch_one()
            .unwrap()
            .unwrap();
        assert_eq!(row.get_i64("id"), Some(1));
        assert_eq!(row.get_str("time_executed"), Some("2024-01-01 10:00:00"));
        assert!(row.get("migration").is_none());

        let missing = table
            .select(&["id"])
            .where_eq("migration", "create_users")
            .where_eq("created_at", "2020-01-01 00:00:00")
            .fetch_one()
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn null_conditions_render_is_null() {
        let db = db();
        let table = Table::new(&db, "migrations");
        table
            .insert(&[("migration", "legacy".into()), ("created_at", Value::Null)])
            .unwrap();
        table
            .insert(&[("migration", "fresh".into()), ("created_at", "2024-01-01 00:00:00".into())])
            .unwrap();

        assert_eq!(table.select(&["id"]).where_null("created_at").count().unwrap(), 1);
        assert_eq!(table.select(&[]).count().unwrap(), 2);
        assert_eq!(table.select(&[]).fetch_all().unwrap().len(), 2);

        let updated = table
            .update(
                &[("created_at", "2020-01-01 00:00:00".into())],
                &[("migration", "legacy".into()), ("created_at", Value::Null)],
            )
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(table.select(&["id"]).where_null("created_at").count().unwrap(), 0);
    }

    #[test]
    fn delete_removes_matching_rows_only() {
        let db = db();
        let table = Table::new(&db, "migrations");
        table.insert(&[("migration", "a".into())]).unwrap();
        table.insert(&[("migration", "b".into())]).unwrap();

        assert_eq!(table.delete(&[("id", 1_i64.into())]).unwrap(), 1);
        assert_eq!(table.delete(&[("id", 1_i64.into())]).unwrap(), 0);

        let rest = table.select(&["migration"]).fetch_all().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].get_str("migration"), Some("b"));
        assert!(table.schema().unwrap().exists);
    }
}
