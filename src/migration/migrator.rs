//! Migrator - Core migration execution engine

use crate::config::MigratorConfig;
use crate::database::{Database, NewMigrationRecord};
use crate::migration::file::discover_scripts;
use crate::migration::lock::{MigrationLockGuard, DEFAULT_LOCK_TIMEOUT};
use crate::migration::{
    calculate_checksum, checksum_matches, ChecksumDrift, DiscoveryOrder, MigrateReport,
    MigrationError, MigrationRecord, MigrationScript,
};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[cfg(feature = "metrics")]
use crate::metrics::METRICS;
#[cfg(feature = "tracing")]
use crate::metrics::tracing_helpers;

/// Directory `migrate()` reads scripts from, relative to the working directory
pub const DEFAULT_MIGRATIONS_DIR: &str = "db/migration";

/// Core migration execution engine
///
/// A `Migrator` owns one database session and the identity recorded as
/// `installed_by`. It holds no process-wide state: concurrent migrators,
/// in this process or others, coordinate only through the database lock and
/// the history table.
pub struct Migrator {
    database: Box<dyn Database>,
    installed_by: String,
    lock_timeout: Duration,
    order: DiscoveryOrder,
}

impl Migrator {
    /// Create a new Migrator over an open database session
    ///
    /// Creates the history table if it does not exist yet. Creation happens
    /// under the migration lock, so replicas starting together against a
    /// fresh database wait for each other instead of racing on the DDL.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockUnavailable` if the lock is not granted
    /// within [`DEFAULT_LOCK_TIMEOUT`], and `MigrationError::SchemaInit` if
    /// the history table cannot be created.
    pub fn new(
        database: Box<dyn Database>,
        installed_by: impl Into<String>,
    ) -> Result<Self, MigrationError> {
        Self::init(database, installed_by.into(), DEFAULT_LOCK_TIMEOUT)
    }

    /// Connect to the configured database and create a Migrator
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedEngine` if the configured engine was not compiled
    /// in, `Connection` if the database cannot be reached, and the errors of
    /// [`Migrator::new`].
    pub fn connect(config: &MigratorConfig) -> Result<Self, MigrationError> {
        let database = crate::connection::open(config.db_type, &config.url)?;
        Ok(
            Self::init(database, config.installed_by.clone(), config.lock_timeout())?
                .with_discovery_order(config.order),
        )
    }

    fn init(
        mut database: Box<dyn Database>,
        installed_by: String,
        lock_timeout: Duration,
    ) -> Result<Self, MigrationError> {
        {
            let mut guard = MigrationLockGuard::acquire(database.as_mut(), lock_timeout)?;
            guard
                .database()
                .create_history_table()
                .map_err(MigrationError::SchemaInit)?;
        }

        Ok(Self {
            database,
            installed_by,
            lock_timeout,
            order: DiscoveryOrder::default(),
        })
    }

    /// Set how long to wait for the migration lock
    #[must_use]
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the order in which discovered files are ranked
    #[must_use]
    pub fn with_discovery_order(mut self, order: DiscoveryOrder) -> Self {
        self.order = order;
        self
    }

    /// Identity recorded as `installed_by`
    #[must_use]
    pub fn installed_by(&self) -> &str {
        &self.installed_by
    }

    /// Apply the scripts in `db/migration` under the current directory
    ///
    /// # Errors
    ///
    /// See [`Migrator::migrate_from_dir`].
    pub fn migrate(&mut self) -> Result<MigrateReport, MigrationError> {
        let cwd = std::env::current_dir().map_err(|source| MigrationError::ScriptRead {
            path: PathBuf::from("."),
            source,
        })?;
        self.migrate_from_dir(cwd.join(DEFAULT_MIGRATIONS_DIR))
    }

    /// Discover the scripts in `dir` and apply the pending ones
    ///
    /// Discovery finishes before the lock is taken, so a malformed file name
    /// aborts the run without touching the database.
    ///
    /// # Errors
    ///
    /// Discovery errors (`ScriptRead`, `InvalidScriptName`,
    /// `DuplicateVersion`) and everything [`Migrator::migrate_scripts`]
    /// returns.
    pub fn migrate_from_dir(
        &mut self,
        dir: impl AsRef<Path>,
    ) -> Result<MigrateReport, MigrationError> {
        let scripts = discover_scripts(dir.as_ref(), self.order)?;
        self.migrate_scripts(&scripts)
    }

    /// Apply a batch of scripts
    ///
    /// Scripts are processed in the order given, which must be ascending
    /// installed rank; the engine does not re-sort by version. Under the
    /// migration lock each script is checked against the history table and
    /// skipped if its version was already applied, otherwise it is executed,
    /// timed, checksummed and recorded. A pending script whose rank is
    /// already taken in the history table is rejected before it runs. The
    /// first failure aborts the batch; scripts after it are never attempted.
    /// The lock is released on every exit path.
    ///
    /// # Errors
    ///
    /// - `InvalidScriptOrder` / `DuplicateVersion`: the batch is malformed
    ///   (checked before locking), or a pending script's rank is already
    ///   recorded for another version (checked before it runs)
    /// - `HistoryRead`: the history table could not be listed
    /// - `LockUnavailable`: another migrator holds the lock
    /// - `VersionCheck`: the history lookup failed
    /// - `ScriptExecution`: a script's SQL failed; nothing is recorded for it
    /// - `Record`: the script ran but its history row was not written exactly
    ///   once
    pub fn migrate_scripts(
        &mut self,
        scripts: &[MigrationScript],
    ) -> Result<MigrateReport, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = tracing_helpers::migrate_span(scripts.len()).entered();

        validate_batch(scripts)?;

        let started = Instant::now();
        let mut guard = MigrationLockGuard::acquire(self.database.as_mut(), self.lock_timeout)?;
        let mut report = MigrateReport::default();

        let taken_ranks: HashSet<i32> = guard
            .database()
            .applied_migrations()
            .map_err(MigrationError::HistoryRead)?
            .iter()
            .map(|r| r.installed_rank)
            .collect();
        let highest_rank = taken_ranks.iter().copied().max().unwrap_or(0);

        for script in scripts {
            let database = guard.database();

            let applied = database
                .is_version_applied(&script.version)
                .map_err(|source| MigrationError::VersionCheck {
                    version: script.version.clone(),
                    source,
                })?;

            if applied {
                log::info!(
                    "Skipping already applied migration: Version {} - {}",
                    script.version,
                    script.description
                );
                #[cfg(feature = "metrics")]
                METRICS.record_skipped();
                report.skipped.push(script.version.clone());
                continue;
            }

            if taken_ranks.contains(&script.installed_rank) {
                return Err(MigrationError::InvalidScriptOrder {
                    script: script.script.clone(),
                    rank: script.installed_rank,
                    previous: highest_rank,
                });
            }

            apply_script(database, script, &self.installed_by)?;
            report.applied.push(script.version.clone());
        }

        drop(guard);
        report.elapsed = started.elapsed();

        log::info!(
            "Migrations completed successfully: {} applied, {} skipped",
            report.applied.len(),
            report.skipped.len()
        );

        Ok(report)
    }

    /// All rows of the history table, ordered by installed rank
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::HistoryRead` if the table cannot be read.
    pub fn history(&mut self) -> Result<Vec<MigrationRecord>, MigrationError> {
        self.database
            .applied_migrations()
            .map_err(MigrationError::HistoryRead)
    }

    /// Compare the checksums of applied scripts with their current content
    ///
    /// This is an explicit audit step; `migrate_scripts` never calls it and
    /// skips applied versions without looking at their content. Scripts that
    /// were never applied, and history rows without a checksum, are ignored.
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::HistoryRead` if the history cannot be read.
    pub fn validate(
        &mut self,
        scripts: &[MigrationScript],
    ) -> Result<Vec<ChecksumDrift>, MigrationError> {
        let history = self.history()?;
        let stored: HashMap<&str, &MigrationRecord> = history
            .iter()
            .filter_map(|r| r.version.as_deref().map(|v| (v, r)))
            .collect();

        let drifts: Vec<ChecksumDrift> = scripts
            .iter()
            .filter_map(|script| {
                let record = stored.get(script.version.as_str())?;
                let stored_checksum = record.checksum?;
                (!checksum_matches(Some(stored_checksum), &script.sql)).then(|| ChecksumDrift {
                    version: script.version.clone(),
                    script: script.script.clone(),
                    stored: stored_checksum,
                    current: calculate_checksum(&script.sql),
                })
            })
            .collect();

        for drift in &drifts {
            log::warn!("{drift}");
        }

        Ok(drifts)
    }

    /// Discover the scripts in `dir` and validate their checksums
    ///
    /// # Errors
    ///
    /// Discovery errors and those of [`Migrator::validate`].
    pub fn validate_dir(
        &mut self,
        dir: impl AsRef<Path>,
    ) -> Result<Vec<ChecksumDrift>, MigrationError> {
        let scripts = discover_scripts(dir.as_ref(), self.order)?;
        self.validate(&scripts)
    }
}

/// Ranks must be positive and strictly increasing, versions unique
fn validate_batch(scripts: &[MigrationScript]) -> Result<(), MigrationError> {
    let mut previous = 0;
    let mut seen: HashMap<&str, &str> = HashMap::new();

    for script in scripts {
        if script.installed_rank <= previous {
            return Err(MigrationError::InvalidScriptOrder {
                script: script.script.clone(),
                rank: script.installed_rank,
                previous,
            });
        }
        previous = script.installed_rank;

        if let Some(first) = seen.insert(&script.version, &script.script) {
            return Err(MigrationError::DuplicateVersion {
                version: script.version.clone(),
                first: first.to_string(),
                second: script.script.clone(),
            });
        }
    }

    Ok(())
}

/// Execute one pending script and record it
fn apply_script(
    database: &mut dyn Database,
    script: &MigrationScript,
    installed_by: &str,
) -> Result<(), MigrationError> {
    #[cfg(feature = "tracing")]
    let _span = tracing_helpers::apply_script_span(&script.version).entered();

    log::info!(
        "Applying migration: Version {} - {}",
        script.version,
        script.description
    );

    let start = Instant::now();
    database
        .execute_script(&script.sql)
        .map_err(|source| MigrationError::ScriptExecution {
            version: script.version.clone(),
            source,
        })?;
    let elapsed = start.elapsed();

    #[cfg(feature = "metrics")]
    METRICS.record_applied(elapsed);

    let record = NewMigrationRecord {
        installed_rank: script.installed_rank,
        version: &script.version,
        description: &script.description,
        script: &script.script,
        checksum: calculate_checksum(&script.sql),
        installed_by,
        execution_time: i32::try_from(elapsed.as_millis()).unwrap_or(i32::MAX),
    };

    let rows_affected = database
        .record_migration(&record)
        .map_err(|source| MigrationError::Record {
            version: script.version.clone(),
            source,
        })?;

    if rows_affected != 1 {
        return Err(MigrationError::Record {
            version: script.version.clone(),
            source: crate::database::DbError::UnexpectedRowCount {
                expected: 1,
                actual: rows_affected,
            },
        });
    }

    log::debug!(
        "Recorded migration {} ({}ms, checksum {})",
        script.version,
        record.execution_time,
        record.checksum
    );

    Ok(())
}
