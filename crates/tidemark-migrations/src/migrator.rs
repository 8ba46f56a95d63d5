use chrono::{DateTime, NaiveDateTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use tidemark_common::{Error, Result};
use tidemark_config::MigrationConfig;
use tidemark_db::{Database, DatabaseManager, Row, Table, Value};
use tracing::{debug, info, warn};

use crate::DB_DATE_FORMAT;
use crate::capsule::Capsule;
use crate::migration::MigrationDefinition;
use crate::migrations_table::MigrationsTable;
use crate::repository::Repository;
use crate::state::{State, Status};

/// Applies and reverts declared migrations one unit at a time, keeping a
/// bookkeeping row per applied migration in its target database.
pub struct Migrator<R: Repository> {
    config: MigrationConfig,
    dbal: DatabaseManager,
    repository: R,
}

impl<R: Repository> Migrator<R> {
    pub fn new(config: MigrationConfig, dbal: DatabaseManager, repository: R) -> Self {
        Self {
            config,
            dbal,
            repository,
        }
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn dbal(&self) -> &DatabaseManager {
        &self.dbal
    }

    /// True when every writable database has an up-to-date bookkeeping
    /// table and no row is waiting for its `created_at` backfill.
    pub fn is_configured(&self) -> Result<bool> {
        for db in self.dbal.databases() {
            if db.is_readonly() {
                continue;
            }
            if !self.table(db.as_ref()).is_present()? {
                debug!("{}: bookkeeping table missing or outdated", db.name());
                return Ok(false);
            }
        }

        Ok(!self.needs_repair()?)
    }

    /// Create or repair bookkeeping tables, then backfill legacy rows.
    pub fn configure(&self) -> Result<()> {
        if self.is_configured()? {
            return Ok(());
        }

        for db in self.dbal.databases() {
            if db.is_readonly() {
                debug!("{}: read-only, skipping bookkeeping table", db.name());
                continue;
            }
            self.table(db.as_ref()).actualize()?;
        }

        self.restore()
    }

    /// Declared migrations, each annotated with its current state.
    pub fn migrations(&self) -> Result<Vec<MigrationDefinition>> {
        self.repository
            .migrations()?
            .into_iter()
            .map(|migration| {
                let state = self.resolve_state(&migration)?;
                Ok(migration.with_state(state))
            })
            .collect()
    }

    /// Apply the first pending migration. `Ok(None)` when nothing is pending.
    pub fn run(&self, capsule: Option<&Capsule>) -> Result<Option<MigrationDefinition>> {
        self.ensure_configured("run")?;

        for migration in self.migrations()? {
            if migration.state()?.status() != Status::Pending {
                continue;
            }

            let target = self.dbal.database(migration.database())?;
            let capsule = match capsule {
                Some(capsule) => capsule.clone(),
                None => Capsule::new(target.clone()),
            };
            let migration = migration.with_capsule(capsule.clone());

            capsule
                .database()
                .transaction(&mut || {
                    migration.up()?;
                    self.insert_row(target.as_ref(), &migration)
                })
                .map_err(|e| Error::execution(migration.identity(), e))?;

            info!("{}: executed migration {}", target.name(), migration.identity());
            let state = self.resolve_state(&migration)?;
            return Ok(Some(migration.with_state(state)));
        }

        debug!("no pending migrations");
        Ok(None)
    }

    /// Revert the last executed migration, in declared order. `Ok(None)` when
    /// nothing is executed.
    pub fn rollback(&self, capsule: Option<&Capsule>) -> Result<Option<MigrationDefinition>> {
        self.ensure_configured("rollback")?;

        for migration in self.migrations()?.into_iter().rev() {
            if migration.state()?.status() != Status::Executed {
                continue;
            }

            let target = self.dbal.database(migration.database())?;
            let capsule = match capsule {
                Some(capsule) => capsule.clone(),
                None => Capsule::new(target.clone()),
            };
            let migration = migration.with_capsule(capsule.clone());

            capsule
                .database()
                .transaction(&mut || {
                    migration.down()?;
                    self.delete_row(target.as_ref(), &migration)
                })
                .map_err(|e| Error::execution(migration.identity(), e))?;

            info!("{}: rolled back migration {}", target.name(), migration.identity());
            let state = self.resolve_state(&migration)?;
            return Ok(Some(migration.with_state(state)));
        }

        debug!("no executed migrations");
        Ok(None)
    }

    fn ensure_configured(&self, action: &str) -> Result<()> {
        if self.is_configured()? {
            return Ok(());
        }
        Err(Error::NotConfigured(format!(
            "unable to {action} migrations, bookkeeping tables are missing or outdated"
        )))
    }

    fn table<'a>(&'a self, db: &'a dyn Database) -> MigrationsTable<'a> {
        MigrationsTable::new(db, &self.config.table)
    }

    fn rows<'a>(&'a self, db: &'a dyn Database) -> Table<'a> {
        Table::new(db, self.config.table.as_str())
    }

    /// Any row with a NULL `created_at` that a declared migration can claim.
    fn needs_repair(&self) -> Result<bool> {
        for migration in self.repository.migrations()? {
            let db = self.dbal.database(migration.database())?;
            if db.is_readonly() {
                continue;
            }

            if self.claimable_row(db.as_ref(), &migration)?.is_some() {
                debug!("{}: migration {} awaits created_at backfill", db.name(), migration.name());
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Id of a NULL-`created_at` row `migration` can claim. Once a row with
    /// its `(migration, created_at)` pair exists, the others are orphans.
    fn claimable_row(&self, db: &dyn Database, migration: &MigrationDefinition) -> Result<Option<i64>> {
        let Some(row) = self
            .rows(db)
            .select(&["id"])
            .where_eq("migration", migration.name())
            .where_null("created_at")
            .fetch_one()?
        else {
            return Ok(None);
        };

        if self.fetch_row(db, migration, &["id"])?.is_some() {
            return Ok(None);
        }

        let id = row.get_i64("id");
        if id.is_none() {
            warn!("{}: bookkeeping row without id for {}", db.name(), migration.name());
        }
        Ok(id)
    }

    /// Backfill `created_at` of legacy rows by migration name. Rows nobody
    /// declares stay untouched.
    fn restore(&self) -> Result<()> {
        for migration in self.repository.migrations()? {
            let db = self.dbal.database(migration.database())?;
            if db.is_readonly() {
                continue;
            }

            let Some(id) = self.claimable_row(db.as_ref(), &migration)? else {
                continue;
            };

            let rows = self.rows(db.as_ref());
            rows.update(
                &[(
                    "created_at",
                    native_datetime(migration.time_created()).into(),
                )],
                &[("id", id.into())],
            )?;
            info!("{}: restored created_at of migration {}", db.name(), migration.identity());
        }

        for db in self.dbal.databases() {
            if db.is_readonly() {
                continue;
            }
            let orphans = self
                .rows(db.as_ref())
                .select(&["id"])
                .where_null("created_at")
                .count()?;
            if orphans > 0 {
                warn!(
                    "{}: {orphans} bookkeeping row(s) without created_at could not be claimed and were left untouched",
                    db.name()
                );
            }
        }
        Ok(())
    }

    fn resolve_state(&self, migration: &MigrationDefinition) -> Result<State> {
        let state = State::new(migration.name(), migration.time_created());
        let db = self.dbal.database(migration.database())?;

        if db.is_readonly() && !self.table(db.as_ref()).is_present()? {
            return Ok(state.pending());
        }

        let Some(row) = self.fetch_row(db.as_ref(), migration, &["id", "time_executed"])? else {
            return Ok(state.pending());
        };

        match row.get_str("time_executed").filter(|value| !value.is_empty()) {
            Some(value) => Ok(state.executed(parse_time_executed(db.timezone(), value)?)),
            None => Ok(state.pending()),
        }
    }

    fn fetch_row(
        &self,
        db: &dyn Database,
        migration: &MigrationDefinition,
        columns: &[&str],
    ) -> Result<Option<Row>> {
        self.rows(db)
            .select(columns)
            .where_eq("migration", migration.name())
            .where_eq("created_at", native_datetime(migration.time_created()))
            .fetch_one()
    }

    fn insert_row(&self, db: &dyn Database, migration: &MigrationDefinition) -> Result<()> {
        let executed_at = Utc::now().with_timezone(&db.timezone());
        self.rows(db).insert(&[
            ("migration", migration.name().into()),
            ("time_executed", executed_at.format(DB_DATE_FORMAT).to_string().into()),
            ("created_at", native_datetime(migration.time_created()).into()),
        ])?;
        Ok(())
    }

    fn delete_row(&self, db: &dyn Database, migration: &MigrationDefinition) -> Result<()> {
        let id = self
            .fetch_row(db, migration, &["id"])?
            .and_then(|row| row.get_i64("id"));

        match id {
            Some(id) => {
                self.rows(db).delete(&[("id", Value::Integer(id))])?;
            }
            None => debug!("{}: no bookkeeping row for {}", db.name(), migration.identity()),
        }
        Ok(())
    }
}

/// Native text form of a wall-clock time. Declared creation times are
/// wall-clock times in the database timezone and are stored unshifted.
fn native_datetime(time: NaiveDateTime) -> String {
    time.format(DB_DATE_FORMAT).to_string()
}

/// Attach `tz` to a wall-clock time. Times inside a DST gap move forward by
/// an hour.
fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
}

fn parse_time_executed(tz: Tz, value: &str) -> Result<DateTime<Tz>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, DB_DATE_FORMAT) {
        return Ok(localize(tz, naive));
    }

    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&tz))
        .map_err(|e| Error::Database(format!("failed to parse time_executed '{value}': {e}")))
}
