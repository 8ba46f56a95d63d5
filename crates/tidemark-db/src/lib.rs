pub mod database;
pub mod manager;
pub mod schema;
pub mod sqlite;
pub mod table;
pub mod value;

pub use database::Database;
pub use manager::DatabaseManager;
pub use schema::{
    ColumnDefinition, ColumnInfo, ColumnType, IndexDefinition, IndexInfo, TableBlueprint,
    TableSchema,
};
pub use sqlite::SqliteDatabase;
pub use table::{Select, Table};
pub use value::{Row, Value};
