//! Migration-specific error types

use crate::connection::ConnectionError;
use crate::database::DbError;
use std::path::PathBuf;

/// Migration-specific errors
///
/// Every error raised while a batch is being applied carries the version of
/// the script involved. After any of them the database should be treated as
/// being in a partially migrated state that needs manual inspection.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Requested engine is unknown or its adapter was not compiled in
    #[error("unsupported database engine: {0}")]
    UnsupportedEngine(String),

    /// The history table could not be created or verified
    #[error("failed to initialize schema history table: {0}")]
    SchemaInit(#[source] DbError),

    /// Migration file name does not follow `V<major>_<minor>__<description>.sql`
    #[error(
        "migration file name '{0}' does not match expected pattern: \
         V{{major}}_{{minor}}__{{description}}.sql"
    )]
    InvalidScriptName(String),

    /// A migration file or the migrations directory could not be read
    #[error("failed to read migration script {}: {source}", path.display())]
    ScriptRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Two scripts in one batch share a version
    #[error("duplicate migration version {version}: '{first}' and '{second}'")]
    DuplicateVersion {
        version: String,
        first: String,
        second: String,
    },

    /// Installed ranks of a batch are not positive and strictly increasing
    #[error(
        "migration '{script}' has installed rank {rank}, expected a rank greater than {previous}"
    )]
    InvalidScriptOrder {
        script: String,
        rank: i32,
        previous: i32,
    },

    /// The migration lock could not be acquired
    #[error(
        "failed to acquire migration lock: {0}\n\
         Another process may be running migrations; retry once it has finished."
    )]
    LockUnavailable(#[source] DbError),

    /// The history lookup for a version failed mid-batch
    #[error("error checking schema version {version}: {source}")]
    VersionCheck {
        version: String,
        #[source]
        source: DbError,
    },

    /// The history table could not be listed
    #[error("failed to read schema history: {0}")]
    HistoryRead(#[source] DbError),

    /// A script's SQL failed; later scripts in the batch were not attempted
    #[error("error executing migration script for version {version}: {source}")]
    ScriptExecution {
        version: String,
        #[source]
        source: DbError,
    },

    /// The script was applied but its history row was not written
    #[error(
        "migration version {version} was applied but could not be recorded: {source}\n\
         The schema and the history table now disagree; inspect before retrying."
    )]
    Record {
        version: String,
        #[source]
        source: DbError,
    },

    /// The migration lock could not be released
    ///
    /// The engine only logs this; adapters and callers driving a lock by hand
    /// may still see it.
    #[error("failed to release migration lock: {0}")]
    LockRelease(#[source] DbError),

    /// Database connection could not be established
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ::config::ConfigError),
}

impl MigrationError {
    /// Version of the script the error is about, if any
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            MigrationError::DuplicateVersion { version, .. }
            | MigrationError::VersionCheck { version, .. }
            | MigrationError::ScriptExecution { version, .. }
            | MigrationError::Record { version, .. } => Some(version),
            _ => None,
        }
    }
}
