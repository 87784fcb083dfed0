//! Scoped acquisition of the process-external migration lock

use crate::database::Database;
use crate::migration::MigrationError;
use std::time::{Duration, Instant};

/// Default time to wait for the migration lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Lock guard that automatically releases the lock when dropped
///
/// This ensures that locks are always released, even if an error occurs or
/// the apply loop unwinds. A failed release is logged rather than returned:
/// by the time the guard drops, the outcome of the migration is already
/// decided and must not be masked.
pub struct MigrationLockGuard<'a> {
    database: &'a mut dyn Database,
}

impl<'a> MigrationLockGuard<'a> {
    /// Acquire the migration lock and create a guard
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::LockUnavailable` if the adapter could not take
    /// the lock within `timeout`.
    pub fn acquire(
        database: &'a mut dyn Database,
        timeout: Duration,
    ) -> Result<Self, MigrationError> {
        #[cfg(feature = "tracing")]
        let _span = crate::metrics::tracing_helpers::acquire_lock_span().entered();

        let start = Instant::now();
        log::debug!(
            "Acquiring migration lock on {} (timeout {:?})",
            database.db_type(),
            timeout
        );

        database
            .acquire_lock(timeout)
            .map_err(MigrationError::LockUnavailable)?;

        let waited = start.elapsed();
        #[cfg(feature = "metrics")]
        crate::metrics::METRICS.observe_lock_wait(waited);
        log::debug!("Migration lock acquired after {}ms", waited.as_millis());

        Ok(Self { database })
    }

    /// Get the database the lock is held on
    pub fn database(&mut self) -> &mut dyn Database {
        &mut *self.database
    }
}

impl Drop for MigrationLockGuard<'_> {
    fn drop(&mut self) {
        match self.database.release_lock() {
            Ok(()) => log::debug!("Migration lock released"),
            Err(e) => log::warn!("{}", MigrationError::LockRelease(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DbError, MemoryDatabase, MemoryServer};

    #[test]
    fn test_guard_releases_on_drop() {
        let server = MemoryServer::new();
        let mut db = MemoryDatabase::new(&server, "a");

        {
            let _guard = MigrationLockGuard::acquire(&mut db, DEFAULT_LOCK_TIMEOUT).unwrap();
            assert!(server.is_locked());
        }

        assert!(!server.is_locked());
        assert_eq!(server.events(), vec!["a:lock", "a:unlock"]);
    }

    #[test]
    fn test_second_guard_times_out_while_held() {
        let server = MemoryServer::new();
        let mut first = MemoryDatabase::new(&server, "a");
        let mut second = MemoryDatabase::new(&server, "b");

        let _guard = MigrationLockGuard::acquire(&mut first, DEFAULT_LOCK_TIMEOUT).unwrap();
        match MigrationLockGuard::acquire(&mut second, Duration::from_millis(50)) {
            Err(MigrationError::LockUnavailable(DbError::LockNotGranted(_))) => {}
            Err(other) => panic!("expected LockUnavailable, got {other:?}"),
            Ok(_) => panic!("lock must not be granted twice"),
        };
    }

    #[test]
    fn test_release_failure_is_swallowed() {
        let server = MemoryServer::new();
        let mut db = MemoryDatabase::new(&server, "a");
        db.fail_release();

        {
            let _guard = MigrationLockGuard::acquire(&mut db, DEFAULT_LOCK_TIMEOUT).unwrap();
        }

        assert_eq!(server.events(), vec!["a:lock"]);
    }
}
