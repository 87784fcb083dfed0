//! Integration tests for the migration engine against MySQL
//!
//! Each test starts a throwaway MySQL container, so Docker must be
//! available. They are ignored by default:
//!
//! ```bash
//! cargo test -p lockstep-integration-tests -- --ignored
//! ```

use lockstep::database::{Database, DbError, MysqlDatabase};
use lockstep::migration::{MigrationError, Migrator};
use std::fs;
use std::path::Path;
use std::time::Duration;
use testcontainers::clients::Cli;
use testcontainers_modules::mysql::Mysql;

fn connection_string(port: u16) -> String {
    format!("mysql://root@127.0.0.1:{port}/test")
}

fn write_scripts(dir: &Path) {
    fs::write(
        dir.join("V1_0__create_accounts.sql"),
        "CREATE TABLE accounts (id INT AUTO_INCREMENT PRIMARY KEY, name TEXT NOT NULL)",
    )
    .unwrap();
    fs::write(
        dir.join("V2_0__seed_accounts.sql"),
        "INSERT INTO accounts (name) VALUES ('alice'), ('bob')",
    )
    .unwrap();
}

fn migrator(url: &str, user: &str) -> Migrator {
    let database = MysqlDatabase::connect(url).unwrap();
    Migrator::new(Box::new(database), user).unwrap()
}

#[test]
#[ignore = "requires Docker"]
fn migrate_applies_once_and_records_history() {
    let docker = Cli::default();
    let node = docker.run(Mysql::default());
    let url = connection_string(node.get_host_port_ipv4(3306));

    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());

    let report = migrator(&url, "it").migrate_from_dir(dir.path()).unwrap();
    assert_eq!(report.applied, vec!["1.0", "2.0"]);

    let report = migrator(&url, "it").migrate_from_dir(dir.path()).unwrap();
    assert!(report.is_up_to_date());
    assert_eq!(report.skipped, vec!["1.0", "2.0"]);

    let history = migrator(&url, "it").history().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].script, "V1_0__create_accounts.sql");
    assert!(history
        .iter()
        .all(|r| r.success && r.migration_type == "SQL" && r.installed_by == "it"));
}

#[test]
#[ignore = "requires Docker"]
fn named_lock_excludes_other_sessions() {
    let docker = Cli::default();
    let node = docker.run(Mysql::default());
    let url = connection_string(node.get_host_port_ipv4(3306));

    let mut holder = MysqlDatabase::connect(&url).unwrap();
    let mut contender = MysqlDatabase::connect(&url).unwrap();

    holder.acquire_lock(Duration::from_secs(1)).unwrap();
    match contender.acquire_lock(Duration::from_secs(1)) {
        Err(DbError::LockNotGranted(_)) => {}
        other => panic!("expected LockNotGranted, got {other:?}"),
    }

    // Held by the other session, so this one cannot release it
    assert!(matches!(contender.release_lock(), Err(DbError::LockNotGranted(_))));

    holder.release_lock().unwrap();
    contender.acquire_lock(Duration::from_secs(1)).unwrap();
    contender.release_lock().unwrap();
}

#[test]
#[ignore = "requires Docker"]
fn migrate_fails_fast_with_lock_unavailable() {
    let docker = Cli::default();
    let node = docker.run(Mysql::default());
    let url = connection_string(node.get_host_port_ipv4(3306));

    let dir = tempfile::tempdir().unwrap();
    write_scripts(dir.path());

    let mut blocked = migrator(&url, "it").with_lock_timeout(Duration::from_secs(1));

    let mut holder = MysqlDatabase::connect(&url).unwrap();
    holder.acquire_lock(Duration::from_secs(1)).unwrap();

    match blocked.migrate_from_dir(dir.path()) {
        Err(MigrationError::LockUnavailable(_)) => {}
        other => panic!("expected LockUnavailable, got {other:?}"),
    }
    holder.release_lock().unwrap();
    assert!(migrator(&url, "it").history().unwrap().is_empty());
}
