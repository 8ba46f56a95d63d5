use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use tidemark_common::{Error, Result};

use crate::DB_DATE_FORMAT;
use crate::capsule::Capsule;
use crate::state::State;

/// One reversible schema change.
///
/// Implementations only touch the database through the capsule they are
/// handed, which is bound to the migration's target database.
pub trait Migration: Send + Sync {
    /// Target database, `None` for the default one. A migration targets a
    /// single database for its whole lifetime.
    fn database(&self) -> Option<&str> {
        None
    }

    fn up(&self, capsule: &Capsule) -> Result<()>;

    fn down(&self, capsule: &Capsule) -> Result<()>;
}

/// A declared migration: identity, behaviour, and optionally the state and
/// capsule bound to it. `with_*` methods return annotated copies.
#[derive(Clone)]
pub struct MigrationDefinition {
    name: String,
    time_created: NaiveDateTime,
    migration: Arc<dyn Migration>,
    state: Option<State>,
    capsule: Option<Capsule>,
}

impl MigrationDefinition {
    pub fn new(
        name: impl Into<String>,
        time_created: NaiveDateTime,
        migration: Arc<dyn Migration>,
    ) -> Self {
        Self {
            name: name.into(),
            time_created,
            migration,
            state: None,
            capsule: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn time_created(&self) -> NaiveDateTime {
        self.time_created
    }

    pub fn database(&self) -> Option<&str> {
        self.migration.database()
    }

    /// `name (Y-m-d H:M:S)`, as used in error messages.
    pub fn identity(&self) -> String {
        format!("{} ({})", self.name, self.time_created.format(DB_DATE_FORMAT))
    }

    pub fn with_state(&self, state: State) -> Self {
        Self {
            state: Some(state),
            ..self.clone()
        }
    }

    pub fn with_capsule(&self, capsule: Capsule) -> Self {
        Self {
            capsule: Some(capsule),
            ..self.clone()
        }
    }

    pub fn state(&self) -> Result<&State> {
        self.state.as_ref().ok_or_else(|| {
            Error::NoStateBound(format!(
                "unable to get state of migration {}, no state is set",
                self.identity()
            ))
        })
    }

    pub fn up(&self) -> Result<()> {
        self.migration.up(self.capsule()?)
    }

    pub fn down(&self) -> Result<()> {
        self.migration.down(self.capsule()?)
    }

    fn capsule(&self) -> Result<&Capsule> {
        self.capsule.as_ref().ok_or_else(|| {
            Error::Migration(format!(
                "unable to get database of migration {}, no capsule is set",
                self.identity()
            ))
        })
    }
}

impl fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("name", &self.name)
            .field("time_created", &self.time_created)
            .field("database", &self.database())
            .field("state", &self.state)
            .finish()
    }
}
