//! Outcome types of a migration run

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Result of a successful `migrate` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrateReport {
    /// Versions executed and recorded by this call, in order
    pub applied: Vec<String>,

    /// Versions found in the history table and left untouched
    pub skipped: Vec<String>,

    /// Wall-clock time spent holding the migration lock
    pub elapsed: Duration,
}

impl MigrateReport {
    /// Whether the call found nothing to apply
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.applied.is_empty()
    }

    /// Last version applied by this call
    #[must_use]
    pub fn latest_applied_version(&self) -> Option<&str> {
        self.applied.last().map(String::as_str)
    }
}

/// An applied script whose content no longer matches its recorded checksum
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChecksumDrift {
    pub version: String,
    pub script: String,
    pub stored: i32,
    pub current: i32,
}

impl fmt::Display for ChecksumDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Migration '{}' (version {}) has been modified after being applied \
             (stored checksum {}, current checksum {})",
            self.script, self.version, self.stored, self.current
        )
    }
}
