use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("repository error: {0}")]
    Repository(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("migrator not configured: {0}")]
    NotConfigured(String),

    #[error("no state bound: {0}")]
    NoStateBound(String),

    /// Failure inside the transaction of a single migration unit. `migration`
    /// reads `name (Y-m-d H:M:S)`.
    #[error("Error in the migration ({migration}) occurred: {source}")]
    Execution {
        migration: String,
        #[source]
        source: Box<Error>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap `source` with the identity of the migration that produced it.
    pub fn execution(migration: impl Into<String>, source: Error) -> Self {
        Error::Execution {
            migration: migration.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, unwrapping any number of `Execution` layers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Execution { source, .. } => source.root(),
            other => other,
        }
    }
}
