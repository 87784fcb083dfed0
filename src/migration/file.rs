//! Migration file discovery and parsing

use crate::migration::MigrationError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Pattern: `V{major}_{minor}__{description}.sql`
static FILE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^V(\d+)_(\d+)__([A-Za-z0-9_]+)\.sql$")
        .expect("migration file name pattern is valid")
});

/// A versioned SQL script ready to be applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationScript {
    /// Position in the batch, starting at 1
    pub installed_rank: i32,

    /// Dotted version, e.g. `1.0`
    pub version: String,

    /// Description parsed from the file name
    pub description: String,

    /// Original file name, stored in the history table
    pub script: String,

    /// Script body, executed verbatim as one batch
    pub sql: String,
}

impl MigrationScript {
    /// Create a new `MigrationScript`
    pub fn new(
        installed_rank: i32,
        version: impl Into<String>,
        description: impl Into<String>,
        script: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            installed_rank,
            version: version.into(),
            description: description.into(),
            script: script.into(),
            sql: sql.into(),
        }
    }

    /// Build a script from a file name and its content
    ///
    /// # Errors
    ///
    /// Returns `MigrationError::InvalidScriptName` if the name does not match
    /// `V{major}_{minor}__{description}.sql`.
    pub fn from_file_name(
        file_name: &str,
        sql: impl Into<String>,
        installed_rank: i32,
    ) -> Result<Self, MigrationError> {
        let (version, description) = parse_file_name(file_name)?;
        Ok(Self::new(installed_rank, version, description, file_name, sql))
    }

    /// Read and parse a migration file
    ///
    /// # Errors
    ///
    /// Returns `InvalidScriptName` for a malformed name and `ScriptRead` if the
    /// file cannot be read. The name is validated before the file is opened.
    pub fn from_path(path: &Path, installed_rank: i32) -> Result<Self, MigrationError> {
        let file_name = file_name_of(path)?;
        let (version, description) = parse_file_name(file_name)?;
        let sql = fs::read_to_string(path).map_err(|source| MigrationError::ScriptRead {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(installed_rank, version, description, file_name, sql))
    }
}

/// Parse a migration file name to extract version and description
///
/// The two numeric groups are joined with a period.
///
/// # Example
/// - `V1_0__create_users.sql` → version: `1.0`, description: `create_users`
///
/// # Errors
///
/// Returns `MigrationError::InvalidScriptName` if the pattern does not match.
pub fn parse_file_name(file_name: &str) -> Result<(String, String), MigrationError> {
    let caps = FILE_NAME_PATTERN
        .captures(file_name)
        .ok_or_else(|| MigrationError::InvalidScriptName(file_name.to_string()))?;
    let version = format!("{}.{}", &caps[1], &caps[2]);
    Ok((version, caps[3].to_string()))
}

/// Order in which discovered files receive their installed rank
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryOrder {
    /// Numeric order of the parsed version: `V2_0` before `V10_0`
    #[default]
    Version,
    /// Lexicographic order of the file name: `V10_0` before `V2_0`
    FileName,
}

/// Compare two dotted versions numerically, component by component
///
/// Components are compared as digit strings with leading zeros ignored, so
/// arbitrarily long version numbers never overflow.
#[must_use]
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    fn normalize(component: &str) -> &str {
        let trimmed = component.trim_start_matches('0');
        if trimmed.is_empty() {
            "0"
        } else {
            trimmed
        }
    }

    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (Some(_), None) => return Ordering::Greater,
            (None, Some(_)) => return Ordering::Less,
            (Some(l), Some(r)) => {
                let (l, r) = (normalize(l), normalize(r));
                let ord = l.len().cmp(&r.len()).then_with(|| l.cmp(r));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Discover all migration scripts in a directory
///
/// Scans `migrations_dir` (non-recursively) for `*.sql` files, orders them
/// according to `order`, assigns installed ranks starting at 1, and reads
/// each file. Other files are ignored.
///
/// # Errors
///
/// Returns errors if:
/// - The directory doesn't exist or can't be read (`ScriptRead`)
/// - A `.sql` file has an invalid name (`InvalidScriptName`); discovery stops
/// - Two files resolve to the same version (`DuplicateVersion`)
pub fn discover_scripts(
    migrations_dir: &Path,
    order: DiscoveryOrder,
) -> Result<Vec<MigrationScript>, MigrationError> {
    let read_error = |source| MigrationError::ScriptRead {
        path: migrations_dir.to_path_buf(),
        source,
    };

    let mut candidates: Vec<(PathBuf, String, String)> = Vec::new();
    for entry in fs::read_dir(migrations_dir).map_err(read_error)? {
        let path = entry.map_err(read_error)?.path();

        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("sql") {
            continue;
        }

        let file_name = file_name_of(&path)?.to_string();
        let (version, _) = parse_file_name(&file_name)?;
        candidates.push((path, file_name, version));
    }

    match order {
        DiscoveryOrder::Version => candidates.sort_by(|a, b| {
            compare_versions(&a.2, &b.2).then_with(|| a.1.cmp(&b.1))
        }),
        DiscoveryOrder::FileName => candidates.sort_by(|a, b| a.1.cmp(&b.1)),
    }

    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (_, file_name, version) in &candidates {
        if let Some(first) = seen.insert(version, file_name) {
            return Err(MigrationError::DuplicateVersion {
                version: version.clone(),
                first: first.to_string(),
                second: file_name.clone(),
            });
        }
    }

    let mut scripts = Vec::with_capacity(candidates.len());
    for (index, (path, _, _)) in candidates.iter().enumerate() {
        let rank = i32::try_from(index + 1).unwrap_or(i32::MAX);
        scripts.push(MigrationScript::from_path(path, rank)?);
    }

    log::debug!(
        "Discovered {} migration script(s) in {}",
        scripts.len(),
        migrations_dir.display()
    );

    Ok(scripts)
}

fn file_name_of(path: &Path) -> Result<&str, MigrationError> {
    path.file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| MigrationError::InvalidScriptName(path.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, body: &str) {
        fs::write(dir.path().join(name), body).unwrap();
    }

    #[test]
    fn test_parse_file_name() {
        let (version, description) = parse_file_name("V1_0__create_users.sql").unwrap();
        assert_eq!(version, "1.0");
        assert_eq!(description, "create_users");

        let (version, description) = parse_file_name("V20_13__Add_Email2.sql").unwrap();
        assert_eq!(version, "20.13");
        assert_eq!(description, "Add_Email2");
    }

    #[test]
    fn test_parse_file_name_rejects_invalid() {
        for name in [
            "bad_name.sql",
            "V1__create_users.sql",
            "V1_0_create_users.sql",
            "v1_0__create_users.sql",
            "V1_0__create-users.sql",
            "V1_0__create_users.SQL",
            "V1_0__.sql",
            "VA_0__create_users.sql",
        ] {
            match parse_file_name(name) {
                Err(MigrationError::InvalidScriptName(n)) => assert_eq!(n, name),
                other => panic!("expected InvalidScriptName for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_from_file_name() {
        let script =
            MigrationScript::from_file_name("V2_0__add_email.sql", "ALTER TABLE users;", 2)
                .unwrap();
        assert_eq!(script.installed_rank, 2);
        assert_eq!(script.version, "2.0");
        assert_eq!(script.description, "add_email");
        assert_eq!(script.script, "V2_0__add_email.sql");
        assert_eq!(script.sql, "ALTER TABLE users;");
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0", "2.0"), Ordering::Less);
        assert_eq!(compare_versions("2.0", "10.0"), Ordering::Less);
        assert_eq!(compare_versions("1.5", "1.10"), Ordering::Less);
        assert_eq!(compare_versions("01.0", "1.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.0.1", "1.0"), Ordering::Greater);
        assert_eq!(
            compare_versions("99999999999999999999999.0", "100000000000000000000000.0"),
            Ordering::Less
        );
    }

    #[test]
    fn test_discover_single_script() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1_0__mysql_flyway.sql", "CREATE TABLE t (id INT);");

        let scripts = discover_scripts(dir.path(), DiscoveryOrder::Version).unwrap();
        assert_eq!(scripts.len(), 1);
        let script = &scripts[0];
        assert_eq!(script.installed_rank, 1);
        assert_eq!(script.version, "1.0");
        assert_eq!(script.description, "mysql_flyway");
        assert_eq!(script.script, "V1_0__mysql_flyway.sql");
        assert_eq!(script.sql, "CREATE TABLE t (id INT);");
    }

    #[test]
    fn test_discover_ignores_other_files_and_subdirectories() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1_0__init.sql", "SELECT 1;");
        write(&dir, "README.md", "not a migration");
        write(&dir, "notes.txt", "neither");
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("V2_0__nested.sql"), "SELECT 2;").unwrap();

        let scripts = discover_scripts(dir.path(), DiscoveryOrder::Version).unwrap();
        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].version, "1.0");
    }

    #[test]
    fn test_discover_orders_by_version() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V10_0__ten.sql", "SELECT 10;");
        write(&dir, "V2_0__two.sql", "SELECT 2;");
        write(&dir, "V1_5__one_five.sql", "SELECT 15;");

        let scripts = discover_scripts(dir.path(), DiscoveryOrder::Version).unwrap();
        let versions: Vec<_> = scripts.iter().map(|s| s.version.as_str()).collect();
        let ranks: Vec<_> = scripts.iter().map(|s| s.installed_rank).collect();
        assert_eq!(versions, vec!["1.5", "2.0", "10.0"]);
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_discover_orders_by_file_name() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V10_0__ten.sql", "SELECT 10;");
        write(&dir, "V2_0__two.sql", "SELECT 2;");
        write(&dir, "V1_5__one_five.sql", "SELECT 15;");

        let scripts = discover_scripts(dir.path(), DiscoveryOrder::FileName).unwrap();
        let versions: Vec<_> = scripts.iter().map(|s| s.version.as_str()).collect();
        assert_eq!(versions, vec!["10.0", "1.5", "2.0"]);
        assert_eq!(scripts[0].installed_rank, 1);
    }

    #[test]
    fn test_discover_fails_fast_on_invalid_name() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1_0__init.sql", "SELECT 1;");
        write(&dir, "bad_name.sql", "SELECT 2;");

        match discover_scripts(dir.path(), DiscoveryOrder::Version) {
            Err(MigrationError::InvalidScriptName(name)) => assert_eq!(name, "bad_name.sql"),
            other => panic!("expected InvalidScriptName, got {other:?}"),
        }
    }

    #[test]
    fn test_discover_rejects_duplicate_versions() {
        let dir = TempDir::new().unwrap();
        write(&dir, "V1_0__first.sql", "SELECT 1;");
        write(&dir, "V2_0__second.sql", "SELECT 2;");
        write(&dir, "V1_0__third.sql", "SELECT 3;");

        match discover_scripts(dir.path(), DiscoveryOrder::FileName) {
            Err(MigrationError::DuplicateVersion { version, first, second }) => {
                assert_eq!(version, "1.0");
                assert_eq!(first, "V1_0__first.sql");
                assert_eq!(second, "V1_0__third.sql");
            }
            other => panic!("expected DuplicateVersion, got {other:?}"),
        }
    }

    #[test]
    fn test_discover_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("does_not_exist");

        match discover_scripts(&missing, DiscoveryOrder::Version) {
            Err(MigrationError::ScriptRead { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected ScriptRead, got {other:?}"),
        }
    }

    #[test]
    fn test_discover_empty_directory() {
        let dir = TempDir::new().unwrap();
        let scripts = discover_scripts(dir.path(), DiscoveryOrder::Version).unwrap();
        assert!(scripts.is_empty());
    }
}
