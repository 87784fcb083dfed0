//! In-memory [`Database`] adapter for tests
//!
//! A [`MemoryServer`] plays the role of one database instance: it owns the
//! history rows, the executed scripts, and a session lock that blocks other
//! sessions the way a server-side advisory lock does. Each [`MemoryDatabase`]
//! is one session against that server, so several of them on different
//! threads reproduce concurrent migrators.
//!
//! Every call is appended to an event log (`"<session>:<operation>"`) so tests
//! can assert on the exact interleaving.

use super::{Database, DbError, DbType, NewMigrationRecord};
use crate::migration::{MigrationRecord, MIGRATION_TYPE_SQL};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
struct State {
    table_created: bool,
    lock_holder: Option<String>,
    history: Vec<MigrationRecord>,
    executed: Vec<String>,
    events: Vec<String>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    lock_released: Condvar,
}

/// Shared state of one simulated database instance
#[derive(Debug, Clone, Default)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Create an empty server
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// History rows ordered by installed rank
    #[must_use]
    pub fn history(&self) -> Vec<MigrationRecord> {
        let mut rows = self.state().history.clone();
        rows.sort_by_key(|r| r.installed_rank);
        rows
    }

    /// Script bodies in the order they were executed
    #[must_use]
    pub fn executed(&self) -> Vec<String> {
        self.state().executed.clone()
    }

    /// Event log across all sessions
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.state().events.clone()
    }

    /// Whether any session currently holds the migration lock
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.state().lock_holder.is_some()
    }

    /// Whether the history table has been created
    #[must_use]
    pub fn has_history_table(&self) -> bool {
        self.state().table_created
    }
}

/// One session against a [`MemoryServer`], with failure injection
#[derive(Debug)]
pub struct MemoryDatabase {
    server: MemoryServer,
    session: String,
    fail_create_table: bool,
    fail_check: bool,
    fail_scripts_containing: Option<String>,
    fail_record: bool,
    record_rows: Option<u64>,
    fail_release: bool,
    execution_delay: Duration,
}

impl MemoryDatabase {
    /// Open a session named `session` on `server`
    pub fn new(server: &MemoryServer, session: impl Into<String>) -> Self {
        Self {
            server: server.clone(),
            session: session.into(),
            fail_create_table: false,
            fail_check: false,
            fail_scripts_containing: None,
            fail_record: false,
            record_rows: None,
            fail_release: false,
            execution_delay: Duration::ZERO,
        }
    }

    /// Fail history table creation
    pub fn fail_create_table(&mut self) {
        self.fail_create_table = true;
    }

    /// Fail every version lookup
    pub fn fail_check(&mut self) {
        self.fail_check = true;
    }

    /// Fail execution of any script whose SQL contains `needle`
    pub fn fail_scripts_containing(&mut self, needle: impl Into<String>) {
        self.fail_scripts_containing = Some(needle.into());
    }

    /// Fail every history insert with a driver error
    pub fn fail_record(&mut self) {
        self.fail_record = true;
    }

    /// Report `rows` affected for history inserts without writing anything
    pub fn record_rows(&mut self, rows: u64) {
        self.record_rows = Some(rows);
    }

    /// Fail lock release
    pub fn fail_release(&mut self) {
        self.fail_release = true;
    }

    /// Sleep for `delay` inside every script execution
    pub fn execution_delay(&mut self, delay: Duration) {
        self.execution_delay = delay;
    }

    fn event(&self, state: &mut State, operation: &str) {
        state.events.push(format!("{}:{}", self.session, operation));
    }

    fn require_table(state: &State) -> Result<(), DbError> {
        if state.table_created {
            Ok(())
        } else {
            Err(DbError::Other(
                "relation \"flyway_schema_history\" does not exist".to_string(),
            ))
        }
    }
}

impl Database for MemoryDatabase {
    fn db_type(&self) -> DbType {
        DbType::Postgres
    }

    fn create_history_table(&mut self) -> Result<(), DbError> {
        if self.fail_create_table {
            return Err(DbError::Other("permission denied for schema public".to_string()));
        }
        let mut state = self.server.state();
        state.table_created = true;
        Ok(())
    }

    fn is_version_applied(&mut self, version: &str) -> Result<bool, DbError> {
        let mut state = self.server.state();
        self.event(&mut state, &format!("check:{version}"));
        if self.fail_check {
            return Err(DbError::Other("connection reset by peer".to_string()));
        }
        Self::require_table(&state)?;
        Ok(state
            .history
            .iter()
            .any(|r| r.version.as_deref() == Some(version)))
    }

    fn execute_script(&mut self, sql: &str) -> Result<(), DbError> {
        if !self.execution_delay.is_zero() {
            std::thread::sleep(self.execution_delay);
        }
        let mut state = self.server.state();
        self.event(&mut state, "execute");
        if let Some(needle) = &self.fail_scripts_containing {
            if sql.contains(needle.as_str()) {
                return Err(DbError::Other(format!("syntax error near \"{needle}\"")));
            }
        }
        state.executed.push(sql.to_string());
        Ok(())
    }

    fn record_migration(&mut self, record: &NewMigrationRecord<'_>) -> Result<u64, DbError> {
        let mut state = self.server.state();
        self.event(&mut state, &format!("record:{}", record.version));
        if self.fail_record {
            return Err(DbError::Other("disk full".to_string()));
        }
        if let Some(rows) = self.record_rows {
            return Ok(rows);
        }
        Self::require_table(&state)?;
        if state
            .history
            .iter()
            .any(|r| r.installed_rank == record.installed_rank)
        {
            return Err(DbError::Other(format!(
                "duplicate key value violates unique constraint: installed_rank={}",
                record.installed_rank
            )));
        }

        state.history.push(MigrationRecord {
            installed_rank: record.installed_rank,
            version: Some(record.version.to_string()),
            description: record.description.to_string(),
            migration_type: MIGRATION_TYPE_SQL.to_string(),
            script: record.script.to_string(),
            checksum: Some(record.checksum),
            installed_by: record.installed_by.to_string(),
            installed_on: chrono::Utc::now().naive_utc(),
            execution_time: record.execution_time,
            success: true,
        });
        Ok(1)
    }

    fn applied_migrations(&mut self) -> Result<Vec<MigrationRecord>, DbError> {
        Self::require_table(&self.server.state())?;
        Ok(self.server.history())
    }

    fn acquire_lock(&mut self, timeout: Duration) -> Result<(), DbError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.server.state();
        loop {
            match &state.lock_holder {
                None => break,
                Some(holder) if *holder == self.session => break,
                Some(_) => {}
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::LockNotGranted(format!(
                    "lock held by another session after waiting {timeout:?}"
                )));
            }
            state = self
                .server
                .shared
                .lock_released
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        state.lock_holder = Some(self.session.clone());
        self.event(&mut state, "lock");
        Ok(())
    }

    fn release_lock(&mut self) -> Result<(), DbError> {
        if self.fail_release {
            return Err(DbError::Other("server closed the connection".to_string()));
        }
        let mut state = self.server.state();
        if state.lock_holder.as_deref() != Some(self.session.as_str()) {
            return Err(DbError::LockNotGranted(
                "lock is not held by this session".to_string(),
            ));
        }
        state.lock_holder = None;
        self.event(&mut state, "unlock");
        drop(state);
        self.server.shared.lock_released.notify_all();
        Ok(())
    }
}
