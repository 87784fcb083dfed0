//! Database capability interface and dialect adapters
//!
//! The migration engine never talks to a driver directly. Everything it needs
//! from the target database goes through the [`Database`] trait: the history
//! table operations, script execution, and the process-external lock.
//!
//! One adapter exists per supported engine, selected by the closed [`DbType`]
//! enumeration. Adapters are feature-gated so that an application only links
//! the drivers it uses:
//!
//! | `DbType`   | Feature    | Driver         | Lock primitive              |
//! |------------|------------|----------------|-----------------------------|
//! | `Postgres` | `postgres` | `may_postgres` | `pg_try_advisory_lock`      |
//! | `MySql`    | `mysql`    | `mysql`        | `GET_LOCK` / `RELEASE_LOCK` |
//! | `Sqlite`   | `sqlite`   | `rusqlite`     | none (single process)       |

use crate::migration::MigrationRecord;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(any(test, feature = "test-helpers"))]
pub use memory::{MemoryDatabase, MemoryServer};
#[cfg(feature = "mysql")]
pub use self::mysql::MysqlDatabase;
#[cfg(feature = "postgres")]
pub use self::postgres::PostgresDatabase;
#[cfg(feature = "sqlite")]
pub use self::sqlite::SqliteDatabase;

/// Engine-wide lock name used by adapters with named locks
pub const LOCK_NAME: &str = "lockstep_migration_lock";

/// Supported database engines
///
/// The string forms match the driver names used in connection configuration:
/// `postgres`, `mysql` and `sqlite3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbType {
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
    #[serde(rename = "sqlite3", alias = "sqlite")]
    Sqlite,
}

impl DbType {
    /// Canonical name of the engine
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DbType::Postgres => "postgres",
            DbType::MySql => "mysql",
            DbType::Sqlite => "sqlite3",
        }
    }

    /// Whether an adapter for this engine was compiled in
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        match self {
            DbType::Postgres => cfg!(feature = "postgres"),
            DbType::MySql => cfg!(feature = "mysql"),
            DbType::Sqlite => cfg!(feature = "sqlite"),
        }
    }
}

impl fmt::Display for DbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an engine name is not one of the supported set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported database engine: {0}")]
pub struct UnknownDbType(pub String);

impl FromStr for DbType {
    type Err = UnknownDbType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(DbType::Postgres),
            "mysql" => Ok(DbType::MySql),
            "sqlite3" | "sqlite" => Ok(DbType::Sqlite),
            other => Err(UnknownDbType(other.to_string())),
        }
    }
}

/// Driver-level error produced by a [`Database`] adapter
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `PostgreSQL` error from `may_postgres`
    #[cfg(feature = "postgres")]
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] may_postgres::Error),
    /// `SQLite` error from `rusqlite`
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `MySQL` error from the `mysql` driver
    #[cfg(feature = "mysql")]
    #[error("MySQL error: {0}")]
    MySql(#[from] ::mysql::Error),
    /// A statement affected a different number of rows than required
    #[error("unexpected number of rows affected: expected {expected}, got {actual}")]
    UnexpectedRowCount { expected: u64, actual: u64 },
    /// The lock primitive answered but refused the request
    #[error("lock not granted: {0}")]
    LockNotGranted(String),
    /// Row parsing/conversion error
    #[error("parse error: {0}")]
    Parse(String),
    /// Other execution errors
    #[error("execution error: {0}")]
    Other(String),
}

/// A completed migration about to be appended to the history table
///
/// `type`, `installed_on` and `success` are not carried: the adapter writes
/// the constant `"SQL"`, lets the server assign the timestamp, and only
/// successful applications are ever recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMigrationRecord<'a> {
    pub installed_rank: i32,
    pub version: &'a str,
    pub description: &'a str,
    pub script: &'a str,
    pub checksum: i32,
    pub installed_by: &'a str,
    pub execution_time: i32,
}

/// Capability set the migration engine requires from a database
///
/// Implementations hold exactly one session/connection to the target database.
/// Locks taken through [`Database::acquire_lock`] are scoped to that session,
/// so the same value must be used for the whole apply loop.
pub trait Database {
    /// Engine this adapter talks to
    fn db_type(&self) -> DbType;

    /// Create the history table if it does not exist
    ///
    /// Must be idempotent: it runs on every engine construction.
    fn create_history_table(&mut self) -> Result<(), DbError>;

    /// Whether a row for `version` exists in the history table
    fn is_version_applied(&mut self, version: &str) -> Result<bool, DbError>;

    /// Execute a migration script body as one batch of statements
    fn execute_script(&mut self, sql: &str) -> Result<(), DbError>;

    /// Append one row to the history table and return the affected row count
    fn record_migration(&mut self, record: &NewMigrationRecord<'_>) -> Result<u64, DbError>;

    /// All history rows ordered by `installed_rank`
    fn applied_migrations(&mut self) -> Result<Vec<MigrationRecord>, DbError>;

    /// Acquire the engine-wide migration lock, waiting at most `timeout`
    fn acquire_lock(&mut self, timeout: Duration) -> Result<(), DbError>;

    /// Release the migration lock taken by [`Database::acquire_lock`]
    fn release_lock(&mut self) -> Result<(), DbError>;
}
