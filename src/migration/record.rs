//! `MigrationRecord` - Represents rows of the `flyway_schema_history` table

use chrono::NaiveDateTime;
use serde::Serialize;

/// Value written to the `type` column for every applied script
pub const MIGRATION_TYPE_SQL: &str = "SQL";

/// Represents a migration record in the schema history table
///
/// Rows are append-only: the engine inserts one per successfully applied
/// script and never updates or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    /// Engine-assigned application order (primary key)
    pub installed_rank: i32,

    /// Dotted migration version, e.g. `1.0`
    pub version: Option<String>,

    /// Human-readable description parsed from the file name
    pub description: String,

    /// Migration type, always `SQL`
    #[serde(rename = "type")]
    pub migration_type: String,

    /// Original script file name
    pub script: String,

    /// CRC-32 of the script content
    pub checksum: Option<i32>,

    /// Identity configured as `installed_by`
    pub installed_by: String,

    /// Server-assigned application timestamp
    pub installed_on: NaiveDateTime,

    /// Execution time in milliseconds
    pub execution_time: i32,

    /// Whether the migration completed successfully
    pub success: bool,
}

/// Parse a timestamp as returned by the history table's `installed_on` column
///
/// Drivers hand timestamps back in slightly different textual forms (space or
/// `T` separator, with or without fractional seconds, occasionally with a
/// trailing UTC offset), so all of them are accepted.
///
/// # Errors
///
/// Returns a description of the value if no known format matches.
pub fn parse_installed_on(value: &str) -> Result<NaiveDateTime, String> {
    let trimmed = value.trim();
    let trimmed = trimmed
        .strip_suffix("+00")
        .or_else(|| trimmed.strip_suffix('Z'))
        .unwrap_or(trimmed);

    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
    ];

    FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .ok_or_else(|| format!("Failed to parse timestamp '{value}': unrecognized format"))
}
