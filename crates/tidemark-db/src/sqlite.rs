use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono_tz::Tz;
use rusqlite::types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::{Connection, params, params_from_iter};
use tidemark_common::{Error, Result};
use tidemark_config::DatabaseConfig;
use tracing::{debug, info};

use crate::database::Database;
use crate::schema::{ColumnDefinition, ColumnInfo, ColumnType, IndexInfo, TableSchema};
use crate::value::{Row, Value};

/// SQLite driver. One connection per handle, guarded by a mutex; nested
/// transactions map to savepoints.
pub struct SqliteDatabase {
    name: String,
    readonly: bool,
    timezone: Tz,
    inner: Mutex<Inner>,
}

struct Inner {
    conn: Connection,
    depth: u32,
}

impl SqliteDatabase {
    pub fn open(name: &str, path: &Path) -> Result<Self> {
        info!("opening database '{name}' at {}", path.display());
        let conn = Connection::open(path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self::from_connection(name, conn))
    }

    pub fn in_memory(name: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        Ok(Self::from_connection(name, conn))
    }

    pub fn from_config(name: &str, config: &DatabaseConfig) -> Result<Self> {
        let db = if config.is_in_memory() {
            Self::in_memory(name)?
        } else {
            Self::open(name, Path::new(&config.path))?
        };

        let db = db.with_timezone(config.timezone()?);
        if config.readonly {
            db.into_readonly()
        } else {
            Ok(db)
        }
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Flag the handle read-only. The connection rejects every write from
    /// here on.
    pub fn into_readonly(mut self) -> Result<Self> {
        self.connection()?
            .conn
            .execute_batch("PRAGMA query_only = ON;")
            .map_err(|e| Error::Database(format!("failed to enable query_only: {e}")))?;
        self.readonly = true;
        Ok(self)
    }

    fn from_connection(name: &str, conn: Connection) -> Self {
        Self {
            name: name.to_string(),
            readonly: false,
            timezone: Tz::UTC,
            inner: Mutex::new(Inner { conn, depth: 0 }),
        }
    }

    fn connection(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| Error::Database(format!("database '{}' lock poisoned", self.name)))
    }
}

impl Database for SqliteDatabase {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_readonly(&self) -> bool {
        self.readonly
    }

    fn timezone(&self) -> Tz {
        self.timezone
    }

    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        let inner = self.connection()?;
        inner
            .conn
            .execute(sql, params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("failed to execute statement: {e}")))
    }

    fn execute_batch(&self, sql: &str) -> Result<()> {
        let inner = self.connection()?;
        inner
            .conn
            .execute_batch(sql)
            .map_err(|e| Error::Database(format!("failed to execute batch: {e}")))
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let inner = self.connection()?;
        let mut stmt = inner
            .conn
            .prepare(sql)
            .map_err(|e| Error::Database(format!("failed to prepare query: {e}")))?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| Error::Database(format!("failed to run query: {e}")))?;

        let mut result = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|e| Error::Database(format!("failed to read row: {e}")))?
        {
            let mut values = BTreeMap::new();
            for (idx, column) in columns.iter().enumerate() {
                let value = row
                    .get_ref(idx)
                    .map_err(|e| Error::Database(format!("failed to read column {column}: {e}")))?;
                values.insert(column.clone(), from_value_ref(value));
            }
            result.push(Row::new(values));
        }
        Ok(result)
    }

    fn begin(&self) -> Result<()> {
        let mut inner = self.connection()?;
        let sql = match inner.depth {
            0 => "BEGIN".to_string(),
            depth => format!("SAVEPOINT tidemark_{depth}"),
        };
        inner
            .conn
            .execute_batch(&sql)
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        inner.depth += 1;
        debug!("{}: begin (depth {})", self.name, inner.depth);
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut inner = self.connection()?;
        let level = inner
            .depth
            .checked_sub(1)
            .ok_or_else(|| Error::Database("no active transaction to commit".into()))?;
        let sql = match level {
            0 => "COMMIT".to_string(),
            level => format!("RELEASE SAVEPOINT tidemark_{level}"),
        };
        inner
            .conn
            .execute_batch(&sql)
            .map_err(|e| Error::Database(format!("failed to commit transaction: {e}")))?;
        inner.depth = level;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut inner = self.connection()?;
        let level = inner
            .depth
            .checked_sub(1)
            .ok_or_else(|| Error::Database("no active transaction to roll back".into()))?;
        let sql = match level {
            0 => "ROLLBACK".to_string(),
            level => {
                format!("ROLLBACK TO SAVEPOINT tidemark_{level}; RELEASE SAVEPOINT tidemark_{level}")
            }
        };
        inner.depth = level;
        debug!("{}: rollback (depth {level})", self.name);
        inner
            .conn
            .execute_batch(&sql)
            .map_err(|e| Error::Database(format!("failed to roll back transaction: {e}")))
    }

    fn introspect(&self, table: &str) -> Result<TableSchema> {
        let inner = self.connection()?;
        let conn = &inner.conn;

        let exists: bool = conn
            .query_row(
                "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
                params![table],
                |row| row.get(0),
            )
            .map_err(|e| Error::Database(format!("failed to check table {table}: {e}")))?;

        if !exists {
            return Ok(TableSchema::missing(table));
        }

        let mut stmt = conn
            .prepare("SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid")
            .map_err(|e| Error::Database(format!("failed to prepare column query: {e}")))?;
        let columns = stmt
            .query_map(params![table], |row| {
                Ok(ColumnInfo {
                    name: row.get(0)?,
                    data_type: row.get(1)?,
                    nullable: row.get::<_, i64>(2)? == 0,
                    primary: row.get::<_, i64>(3)? > 0,
                })
            })
            .map_err(|e| Error::Database(format!("failed to list columns of {table}: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read column row: {e}")))?;

        let mut stmt = conn
            .prepare("SELECT name, \"unique\", origin FROM pragma_index_list(?1)")
            .map_err(|e| Error::Database(format!("failed to prepare index query: {e}")))?;
        let listed = stmt
            .query_map(params![table], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)? != 0,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to list indexes of {table}: {e}")))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read index row: {e}")))?;

        let mut stmt = conn
            .prepare("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .map_err(|e| Error::Database(format!("failed to prepare index info query: {e}")))?;
        let mut indexes = Vec::with_capacity(listed.len());
        for (name, unique, origin) in listed {
            let columns = stmt
                .query_map(params![name], |row| row.get::<_, Option<String>>(0))
                .map_err(|e| Error::Database(format!("failed to describe index {name}: {e}")))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| Error::Database(format!("failed to read index column: {e}")))?
                .into_iter()
                .flatten()
                .collect();
            indexes.push(IndexInfo {
                name,
                columns,
                unique,
                droppable: origin == "c",
            });
        }

        Ok(TableSchema {
            name: table.to_string(),
            exists,
            columns,
            indexes,
        })
    }

    fn column_sql(&self, column: &ColumnDefinition) -> String {
        let kind = match column.kind {
            ColumnType::Primary => {
                return format!(
                    "{} INTEGER PRIMARY KEY AUTOINCREMENT",
                    self.quote(&column.name)
                );
            }
            ColumnType::Integer => "INTEGER".to_string(),
            ColumnType::String(length) => format!("VARCHAR({length})"),
            ColumnType::Text => "TEXT".to_string(),
            ColumnType::DateTime => "DATETIME".to_string(),
        };
        let null = if column.nullable { "" } else { " NOT NULL" };
        format!("{} {kind}{null}", self.quote(&column.name))
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(SqlValue::Null),
            Value::Integer(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Value::Real(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Value::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Value::Blob(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
        })
    }
}

fn from_value_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(v) => Value::Integer(v),
        ValueRef::Real(v) => Value::Real(v),
        ValueRef::Text(v) => Value::Text(String::from_utf8_lossy(v).into_owned()),
        ValueRef::Blob(v) => Value::Blob(v.to_vec()),
    }
}
