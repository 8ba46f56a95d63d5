use chrono_tz::Tz;
use tidemark_common::Result;
use tracing::warn;

use crate::schema::{ColumnDefinition, TableSchema};
use crate::value::{Row, Value};

/// A single named database connection.
///
/// Implementations serialize statements internally so a handle can be shared
/// behind an `Arc`. Everything above this trait (bookkeeping, schema engine,
/// migrations) is driver-agnostic.
pub trait Database: Send + Sync {
    /// Name under which the database is registered in the manager.
    fn name(&self) -> &str;

    /// Read-only connections never receive bookkeeping tables.
    fn is_readonly(&self) -> bool;

    /// Timezone the driver stores and reads timestamps in.
    fn timezone(&self) -> Tz;

    /// Quote an identifier for use in generated SQL.
    fn quote(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    /// Execute one statement, returning the number of affected rows.
    fn execute(&self, sql: &str, params: &[Value]) -> Result<usize>;

    /// Execute several `;`-separated statements without parameters.
    fn execute_batch(&self, sql: &str) -> Result<()>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;

    fn begin(&self) -> Result<()>;

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    /// Describe a table; a missing table yields `exists == false`.
    fn introspect(&self, table: &str) -> Result<TableSchema>;

    /// Dialect-specific column clause used by the schema engine.
    fn column_sql(&self, column: &ColumnDefinition) -> String;

    /// Run `work` inside a transaction. Commits on `Ok`, rolls back on `Err`
    /// and hands the error back unchanged.
    fn transaction(&self, work: &mut dyn FnMut() -> Result<()>) -> Result<()> {
        self.begin()?;

        if let Err(e) = work() {
            if let Err(rollback_err) = self.rollback() {
                warn!("{}: rollback after failed transaction failed: {rollback_err}", self.name());
            }
            return Err(e);
        }

        if let Err(e) = self.commit() {
            if let Err(rollback_err) = self.rollback() {
                warn!("{}: rollback after failed commit failed: {rollback_err}", self.name());
            }
            return Err(e);
        }

        Ok(())
    }
}
