//! # Lockstep
//!
//! Lock-protected, forward-only SQL migrations with a Flyway-compatible
//! `flyway_schema_history` table.
//!
//! Scripts named `V<major>_<minor>__<description>.sql` are applied in order,
//! each exactly once, while a database-wide lock keeps concurrent deployers
//! from racing each other. Supported engines are PostgreSQL (`may_postgres`),
//! SQLite (`rusqlite`) and MySQL (`mysql`, behind the `mysql` feature).
//!
//! ```rust,no_run
//! use lockstep::config::MigratorConfig;
//! use lockstep::migration::startup_migrations;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = MigratorConfig::load()?;
//! let report = startup_migrations(&config)?;
//! println!("{} migration(s) applied", report.applied.len());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod database;
pub mod metrics;
pub mod migration;

pub use crate::config::MigratorConfig;
pub use crate::connection::{open, ConnectionError};
pub use crate::database::{Database, DbError, DbType};
pub use crate::migration::{MigrateReport, MigrationError, MigrationScript, Migrator};
