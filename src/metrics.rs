//! Migration metrics and tracing spans
//!
//! Instruments are created on the global OpenTelemetry meter named
//! `lockstep`; the application decides where they are exported by installing
//! a meter provider before the first migration runs.

#[cfg(feature = "metrics")]
use once_cell::sync::Lazy;
#[cfg(feature = "metrics")]
use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};
#[cfg(feature = "metrics")]
use std::time::Duration;

#[cfg(feature = "metrics")]
pub static METRICS: Lazy<LockstepMetrics> = Lazy::new(LockstepMetrics::init);

#[cfg(feature = "metrics")]
pub struct LockstepMetrics {
    pub migrations_applied: Counter<u64>,
    pub migrations_skipped: Counter<u64>,
    pub migration_duration: Histogram<f64>,
    pub lock_wait_duration: Histogram<f64>,
}

#[cfg(feature = "metrics")]
impl LockstepMetrics {
    pub fn init() -> Self {
        let meter = global::meter("lockstep");

        let migrations_applied = meter
            .u64_counter("lockstep_migrations_applied_total")
            .with_description("Migration scripts executed and recorded")
            .build();

        let migrations_skipped = meter
            .u64_counter("lockstep_migrations_skipped_total")
            .with_description("Migration scripts skipped because they were already applied")
            .build();

        let migration_duration = meter
            .f64_histogram("lockstep_migration_duration_seconds")
            .with_description("Execution time of a single migration script")
            .build();

        let lock_wait_duration = meter
            .f64_histogram("lockstep_lock_wait_seconds")
            .with_description("Time spent waiting for the migration lock")
            .build();

        Self {
            migrations_applied,
            migrations_skipped,
            migration_duration,
            lock_wait_duration,
        }
    }

    pub fn record_applied(&self, elapsed: Duration) {
        self.migrations_applied.add(1, &[]);
        self.migration_duration.record(elapsed.as_secs_f64(), &[]);
    }

    pub fn record_skipped(&self) {
        self.migrations_skipped.add(1, &[]);
    }

    pub fn observe_lock_wait(&self, waited: Duration) {
        self.lock_wait_duration.record(waited.as_secs_f64(), &[]);
    }
}

/// Spans around the migration engine's units of work
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::Span;

    /// Span covering one `migrate` call
    pub fn migrate_span(scripts: usize) -> Span {
        tracing::info_span!("lockstep.migrate", scripts = scripts)
    }

    /// Span covering execution and recording of one script
    pub fn apply_script_span(version: &str) -> Span {
        tracing::info_span!("lockstep.apply_script", version = %version)
    }

    /// Span covering the wait for the migration lock
    pub fn acquire_lock_span() -> Span {
        tracing::debug_span!("lockstep.acquire_lock")
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_provider_is_a_noop() {
        METRICS.record_applied(Duration::from_millis(3));
        METRICS.record_skipped();
        METRICS.observe_lock_wait(Duration::ZERO);
    }
}
