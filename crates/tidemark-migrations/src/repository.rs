use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock, RwLock};

use chrono::{NaiveDateTime, SubsecRound, Utc};
use regex::Regex;
use tidemark_common::{Error, Result};
use tracing::debug;

use crate::migration::{Migration, MigrationDefinition};
use crate::state::State;

/// Timestamp part of a migration identity.
pub const IDENTITY_TIME_FORMAT: &str = "%Y%m%d.%H%M%S";

static IDENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{8}\.\d{6})_(\d+)_([A-Za-z0-9_-]+)$").expect("identity regex is valid")
});

static NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("name regex is valid"));

/// Source of declared migrations, in declared order.
pub trait Repository {
    /// What `register` needs to materialize a new migration.
    type Source;

    /// Every declared migration sorted by creation time, chunk and name.
    /// Each one carries an `Undefined` state.
    fn migrations(&self) -> Result<Vec<MigrationDefinition>>;

    /// Register a new migration stamped with the current time. Returns the
    /// identity it was stored under.
    fn register(&self, name: &str, source: Self::Source) -> Result<String>;
}

/// `<YYYYMMDD.HHMMSS>_<chunk>_<name>`, e.g. `20200909.024119_333_333_migration_1`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MigrationIdentity {
    pub time_created: NaiveDateTime,
    pub chunk: u64,
    pub name: String,
}

impl MigrationIdentity {
    pub fn new(time_created: NaiveDateTime, chunk: u64, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if !NAME.is_match(&name) {
            return Err(Error::Repository(format!(
                "invalid migration name '{name}', only letters, digits, '_' and '-' are allowed"
            )));
        }
        Ok(Self {
            time_created: time_created.trunc_subsecs(0),
            chunk,
            name,
        })
    }

    pub fn parse(identity: &str) -> Result<Self> {
        let captures = IDENTITY.captures(identity).ok_or_else(|| {
            Error::Repository(format!("invalid migration identity '{identity}'"))
        })?;

        let time_created = NaiveDateTime::parse_from_str(&captures[1], IDENTITY_TIME_FORMAT)
            .map_err(|e| {
                Error::Repository(format!(
                    "unable to parse timestamp of migration '{identity}': {e}"
                ))
            })?;
        let chunk = captures[2].parse::<u64>().map_err(|e| {
            Error::Repository(format!("invalid chunk in migration '{identity}': {e}"))
        })?;

        Ok(Self {
            time_created,
            chunk,
            name: captures[3].to_string(),
        })
    }

    /// Collision key: case-insensitive, `-` and `_` equivalent.
    fn normalized_name(&self) -> String {
        normalize(&self.name)
    }
}

impl fmt::Display for MigrationIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.time_created.format(IDENTITY_TIME_FORMAT),
            self.chunk,
            self.name
        )
    }
}

impl FromStr for MigrationIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase().replace('-', "_")
}

/// Fail when `candidate` collides with one of `existing` by exact or
/// normalized name.
pub(crate) fn ensure_unique<'a>(
    candidate: &MigrationIdentity,
    existing: impl IntoIterator<Item = &'a MigrationIdentity>,
) -> Result<()> {
    let normalized = candidate.normalized_name();
    for other in existing {
        if other.name == candidate.name || other.normalized_name() == normalized {
            return Err(Error::Repository(format!(
                "unable to register migration '{}', a migration with the same name already exists ({other})",
                candidate.name
            )));
        }
    }
    Ok(())
}

/// Identity for a fresh registration: now, chunk one past the highest seen.
pub(crate) fn next_identity<'a>(
    name: &str,
    existing: impl IntoIterator<Item = &'a MigrationIdentity> + Clone,
) -> Result<MigrationIdentity> {
    let chunk = existing
        .clone()
        .into_iter()
        .map(|identity| identity.chunk)
        .max()
        .map_or(1, |chunk| chunk + 1);
    let identity = MigrationIdentity::new(Utc::now().naive_utc(), chunk, name)?;
    ensure_unique(&identity, existing)?;
    Ok(identity)
}

pub(crate) fn declare(identity: &MigrationIdentity, migration: Arc<dyn Migration>) -> MigrationDefinition {
    MigrationDefinition::new(identity.name.clone(), identity.time_created, migration)
        .with_state(State::new(identity.name.clone(), identity.time_created))
}

/// In-process repository of compiled migrations.
#[derive(Default)]
pub struct StaticRepository {
    entries: RwLock<Vec<(MigrationIdentity, Arc<dyn Migration>)>>,
}

impl StaticRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a migration under an explicit identity string.
    pub fn insert(&self, identity: &str, migration: Arc<dyn Migration>) -> Result<()> {
        let identity = MigrationIdentity::parse(identity)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Repository(format!("repository lock poisoned: {e}")))?;
        ensure_unique(&identity, entries.iter().map(|(id, _)| id))?;

        debug!("registered migration {identity}");
        entries.push((identity, migration));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Repository for StaticRepository {
    type Source = Arc<dyn Migration>;

    fn migrations(&self) -> Result<Vec<MigrationDefinition>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| Error::Repository(format!("repository lock poisoned: {e}")))?;

        let mut sorted: Vec<&(MigrationIdentity, Arc<dyn Migration>)> = entries.iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));

        Ok(sorted
            .into_iter()
            .map(|(identity, migration)| declare(identity, migration.clone()))
            .collect())
    }

    fn register(&self, name: &str, source: Self::Source) -> Result<String> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| Error::Repository(format!("repository lock poisoned: {e}")))?;
        let identity = next_identity(name, entries.iter().map(|(id, _)| id))?;

        debug!("registered migration {identity}");
        let rendered = identity.to_string();
        entries.push((identity, source));
        Ok(rendered)
    }
}
