//! Ordered, reversible migrations with per-database bookkeeping.
//!
//! A [`Migrator`] reconciles the migrations declared by a [`Repository`]
//! with the rows of a bookkeeping table kept in every writable database,
//! then applies ([`Migrator::run`]) or reverts ([`Migrator::rollback`]) one
//! unit per call inside a database transaction.

pub mod capsule;
pub mod file_repository;
pub mod migration;
pub mod migrations_table;
pub mod migrator;
pub mod repository;
pub mod state;

pub use capsule::Capsule;
pub use file_repository::{FileRepository, SqlMigration, SqlSource};
pub use migration::{Migration, MigrationDefinition};
pub use migrations_table::MigrationsTable;
pub use migrator::Migrator;
pub use repository::{MigrationIdentity, Repository, StaticRepository};
pub use state::{State, Status};

/// Native datetime text form used for bookkeeping columns.
pub const DB_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
