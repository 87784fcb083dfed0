//! SQLite adapter over `rusqlite`
//!
//! SQLite has no server-side session lock. Writers are already serialized by
//! the database file lock, so `acquire_lock` and `release_lock` are no-ops and
//! concurrent migrators against one file are not supported.

use super::{Database, DbError, DbType, NewMigrationRecord};
use crate::migration::history::{
    count_version_sql, history_table_ddl, insert_history_sql, select_history_sql,
};
use crate::migration::{parse_installed_on, MigrationRecord};
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::time::Duration;

/// One SQLite connection
pub struct SqliteDatabase {
    conn: Connection,
}

impl SqliteDatabase {
    /// Open (or create) the database file at `path`
    ///
    /// `:memory:` opens a private in-memory database.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = if path == Path::new(":memory:") {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Ok(Self::from_connection(conn))
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self, DbError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    /// Wrap an existing connection
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Get a reference to the underlying connection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<MigrationRecord> {
    let installed_on: String = row.get(7)?;
    let installed_on = parse_installed_on(&installed_on).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(MigrationRecord {
        installed_rank: row.get(0)?,
        version: row.get(1)?,
        description: row.get(2)?,
        migration_type: row.get(3)?,
        script: row.get(4)?,
        checksum: row.get(5)?,
        installed_by: row.get(6)?,
        installed_on,
        execution_time: row.get(8)?,
        success: row.get(9)?,
    })
}

impl Database for SqliteDatabase {
    fn db_type(&self) -> DbType {
        DbType::Sqlite
    }

    fn create_history_table(&mut self) -> Result<(), DbError> {
        for statement in history_table_ddl(DbType::Sqlite) {
            self.conn.execute(&statement, [])?;
        }
        Ok(())
    }

    fn is_version_applied(&mut self, version: &str) -> Result<bool, DbError> {
        let count: i64 = self.conn.query_row(
            &count_version_sql(DbType::Sqlite),
            params![version],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn execute_script(&mut self, sql: &str) -> Result<(), DbError> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn record_migration(&mut self, record: &NewMigrationRecord<'_>) -> Result<u64, DbError> {
        let rows = self.conn.execute(
            &insert_history_sql(DbType::Sqlite),
            params![
                record.installed_rank,
                record.version,
                record.description,
                record.script,
                record.checksum,
                record.installed_by,
                record.execution_time,
            ],
        )?;
        Ok(rows as u64)
    }

    fn applied_migrations(&mut self) -> Result<Vec<MigrationRecord>, DbError> {
        let mut stmt = self.conn.prepare(&select_history_sql(DbType::Sqlite))?;
        let records = stmt
            .query_map([], record_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn acquire_lock(&mut self, _timeout: Duration) -> Result<(), DbError> {
        Ok(())
    }

    fn release_lock(&mut self) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn database() -> SqliteDatabase {
        let mut db = SqliteDatabase::open_in_memory().unwrap();
        db.create_history_table().unwrap();
        db
    }

    fn record<'a>(rank: i32, version: &'a str, script: &'a str) -> NewMigrationRecord<'a> {
        NewMigrationRecord {
            installed_rank: rank,
            version,
            description: "create_users",
            script,
            checksum: -42,
            installed_by: "tester",
            execution_time: 7,
        }
    }

    #[test]
    fn test_create_history_table_is_idempotent() {
        let mut db = database();
        db.create_history_table().unwrap();
        assert!(db.applied_migrations().unwrap().is_empty());
    }

    #[test]
    fn test_record_and_read_back() {
        let mut db = database();
        assert!(!db.is_version_applied("1.0").unwrap());

        let rows = db.record_migration(&record(1, "1.0", "V1_0__create_users.sql")).unwrap();
        assert_eq!(rows, 1);
        assert!(db.is_version_applied("1.0").unwrap());
        assert!(!db.is_version_applied("1.1").unwrap());

        let history = db.applied_migrations().unwrap();
        assert_eq!(history.len(), 1);
        let row = &history[0];
        assert_eq!(row.installed_rank, 1);
        assert_eq!(row.version.as_deref(), Some("1.0"));
        assert_eq!(row.migration_type, "SQL");
        assert_eq!(row.checksum, Some(-42));
        assert_eq!(row.execution_time, 7);
        assert!(row.success);
    }

    #[test]
    fn test_duplicate_rank_is_rejected() {
        let mut db = database();
        db.record_migration(&record(1, "1.0", "V1_0__a.sql")).unwrap();
        assert!(db.record_migration(&record(1, "2.0", "V2_0__b.sql")).is_err());
    }

    #[test]
    fn test_execute_script_runs_multiple_statements() {
        let mut db = database();
        db.execute_script(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT);\n\
             INSERT INTO users (name) VALUES ('alice');\n\
             INSERT INTO users (name) VALUES ('bob');",
        )
        .unwrap();

        let count: i64 = db
            .connection()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_execute_script_surfaces_syntax_errors() {
        let mut db = database();
        match db.execute_script("CREATE TABLE broken (") {
            Err(DbError::Sqlite(_)) => {}
            other => panic!("expected SQLite error, got {other:?}"),
        }
    }

    #[test]
    fn test_locks_are_noops() {
        let mut db = database();
        db.acquire_lock(Duration::ZERO).unwrap();
        db.release_lock().unwrap();
    }
}
