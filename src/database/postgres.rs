//! PostgreSQL adapter over `may_postgres`
//!
//! The migration lock is a session-level advisory lock, so it is released by
//! the server if the connection drops while a migration is running.

use super::{Database, DbError, DbType, NewMigrationRecord};
use crate::migration::history::{
    count_version_sql, history_table_ddl, insert_history_sql, select_history_sql,
};
use crate::migration::{parse_installed_on, MigrationRecord};
use may_postgres::{Client, Row};
use std::time::{Duration, Instant};

/// Advisory lock key: the ASCII bytes of `Flyway` packed into an `i64`
pub const ADVISORY_LOCK_KEY: i64 =
    (0x46 << 40) | (0x6C << 32) | (0x79 << 24) | (0x77 << 16) | (0x61 << 8) | 0x79;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One PostgreSQL session
pub struct PostgresDatabase {
    client: Client,
}

impl PostgresDatabase {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connect with a `postgresql://` URI or key-value connection string
    pub fn connect(connection_string: &str) -> Result<Self, DbError> {
        Ok(Self::new(may_postgres::connect(connection_string)?))
    }

    /// Get a reference to the underlying client
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn try_advisory_lock(&self) -> Result<bool, DbError> {
        let row = self
            .client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&ADVISORY_LOCK_KEY])?;
        Ok(row.get(0))
    }
}

fn record_from_row(row: &Row) -> Result<MigrationRecord, DbError> {
    let installed_on: String = row.try_get(7)?;
    Ok(MigrationRecord {
        installed_rank: row.try_get(0)?,
        version: row.try_get(1)?,
        description: row.try_get(2)?,
        migration_type: row.try_get(3)?,
        script: row.try_get(4)?,
        checksum: row.try_get(5)?,
        installed_by: row.try_get(6)?,
        installed_on: parse_installed_on(&installed_on).map_err(DbError::Parse)?,
        execution_time: row.try_get(8)?,
        success: row.try_get(9)?,
    })
}

impl Database for PostgresDatabase {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    fn create_history_table(&mut self) -> Result<(), DbError> {
        for statement in history_table_ddl(DbType::Postgres) {
            self.client.execute(statement.as_str(), &[])?;
        }
        Ok(())
    }

    fn is_version_applied(&mut self, version: &str) -> Result<bool, DbError> {
        let row = self
            .client
            .query_one(count_version_sql(DbType::Postgres).as_str(), &[&version])?;
        let count: i64 = row.try_get(0)?;
        Ok(count > 0)
    }

    fn execute_script(&mut self, sql: &str) -> Result<(), DbError> {
        self.client.batch_execute(sql)?;
        Ok(())
    }

    fn record_migration(&mut self, record: &NewMigrationRecord<'_>) -> Result<u64, DbError> {
        let rows = self.client.execute(
            insert_history_sql(DbType::Postgres).as_str(),
            &[
                &record.installed_rank,
                &record.version,
                &record.description,
                &record.script,
                &record.checksum,
                &record.installed_by,
                &record.execution_time,
            ],
        )?;
        Ok(rows)
    }

    fn applied_migrations(&mut self) -> Result<Vec<MigrationRecord>, DbError> {
        let rows = self
            .client
            .query(select_history_sql(DbType::Postgres).as_str(), &[])?;
        rows.iter().map(record_from_row).collect()
    }

    fn acquire_lock(&mut self, timeout: Duration) -> Result<(), DbError> {
        let start = Instant::now();
        loop {
            if self.try_advisory_lock()? {
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(DbError::LockNotGranted(format!(
                    "advisory lock {ADVISORY_LOCK_KEY} is held by another session; \
                     gave up after {} seconds",
                    timeout.as_secs_f64()
                )));
            }
            std::thread::sleep(LOCK_POLL_INTERVAL);
        }
    }

    fn release_lock(&mut self) -> Result<(), DbError> {
        let row = self
            .client
            .query_one("SELECT pg_advisory_unlock($1)", &[&ADVISORY_LOCK_KEY])?;
        let released: bool = row.try_get(0)?;
        if released {
            Ok(())
        } else {
            Err(DbError::LockNotGranted(format!(
                "advisory lock {ADVISORY_LOCK_KEY} was not held by this session"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advisory_lock_key_spells_flyway() {
        let bytes = ADVISORY_LOCK_KEY.to_be_bytes();
        assert_eq!(&bytes[2..], b"Flyway");
        assert_eq!(ADVISORY_LOCK_KEY, 0x466C_7977_6179);
    }
}
