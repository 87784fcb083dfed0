//! Schema history table definition
//!
//! The table layout is the Flyway `flyway_schema_history` layout, so existing
//! tooling that inspects that table keeps working. Column names are part of
//! the contract; types are chosen per backend.

use crate::database::DbType;
use sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};

/// Name of the schema history table
pub const HISTORY_TABLE: &str = "flyway_schema_history";

/// Columns of the history table, in declaration order
pub const HISTORY_COLUMNS: [&str; 10] = [
    "installed_rank",
    "version",
    "description",
    "type",
    "script",
    "checksum",
    "installed_by",
    "installed_on",
    "execution_time",
    "success",
];

/// Build the `CREATE TABLE IF NOT EXISTS` statement for the history table
///
/// `installed_on` is filled by the server at insert time. `SQLite` keeps
/// millisecond precision by formatting `now` itself, `MySQL` uses
/// `TIMESTAMP(3)` for the same reason.
#[must_use]
pub fn create_history_table(db_type: DbType) -> TableCreateStatement {
    let mut installed_on = ColumnDef::new("installed_on");
    match db_type {
        DbType::Postgres => {
            installed_on.timestamp().not_null().extra("DEFAULT now()");
        }
        DbType::MySql => {
            installed_on
                .custom("TIMESTAMP(3)")
                .not_null()
                .extra("DEFAULT CURRENT_TIMESTAMP(3)");
        }
        DbType::Sqlite => {
            installed_on
                .text()
                .not_null()
                .extra("DEFAULT (strftime('%Y-%m-%d %H:%M:%f', 'now'))");
        }
    }

    Table::create()
        .table(HISTORY_TABLE)
        .if_not_exists()
        .col(
            ColumnDef::new("installed_rank")
                .integer()
                .not_null()
                .primary_key()
        )
        .col(ColumnDef::new("version").string_len(50).null())
        .col(ColumnDef::new("description").string_len(200).not_null())
        .col(ColumnDef::new("type").string_len(20).not_null())
        .col(ColumnDef::new("script").string_len(1000).not_null())
        .col(ColumnDef::new("checksum").integer().null())
        .col(ColumnDef::new("installed_by").string_len(100).not_null())
        .col(installed_on)
        .col(ColumnDef::new("execution_time").integer().not_null())
        .col(ColumnDef::new("success").boolean().not_null())
        .to_owned()
}

/// Index on `success`, used by tooling listing failed rows
#[must_use]
pub fn create_history_table_index() -> IndexCreateStatement {
    Index::create()
        .name("flyway_schema_history_s_idx")
        .table(HISTORY_TABLE)
        .col("success")
        .if_not_exists()
        .to_owned()
}

/// Render the history table DDL for a backend
///
/// Returns the `CREATE TABLE` statement followed by the `CREATE INDEX`
/// statement. `MySQL` has no `CREATE INDEX IF NOT EXISTS`, so only the table
/// statement is returned for it.
#[must_use]
pub fn history_table_ddl(db_type: DbType) -> Vec<String> {
    let table = create_history_table(db_type);
    let index = create_history_table_index();
    match db_type {
        DbType::Postgres => vec![
            table.build(sea_query::PostgresQueryBuilder),
            index.build(sea_query::PostgresQueryBuilder),
        ],
        DbType::MySql => vec![table.build(sea_query::MysqlQueryBuilder)],
        DbType::Sqlite => vec![
            table.build(sea_query::SqliteQueryBuilder),
            index.build(sea_query::SqliteQueryBuilder),
        ],
    }
}

/// `SELECT` list returning every history column with `installed_on` as text
///
/// Reading the timestamp as text keeps row decoding identical across drivers.
#[must_use]
pub fn select_history_sql(db_type: DbType) -> String {
    let installed_on = match db_type {
        DbType::Postgres => "installed_on::text",
        DbType::MySql => "CAST(installed_on AS CHAR)",
        DbType::Sqlite => "installed_on",
    };
    format!(
        "SELECT installed_rank, version, description, type, script, checksum, \
         installed_by, {installed_on}, execution_time, success \
         FROM {HISTORY_TABLE} ORDER BY installed_rank ASC"
    )
}

/// `INSERT` for one successful migration row
///
/// Binds, in order: `installed_rank`, `version`, `description`, `script`,
/// `checksum`, `installed_by`, `execution_time`. `type` and `success` are
/// constant and `installed_on` is left to the column default.
#[must_use]
pub fn insert_history_sql(db_type: DbType) -> String {
    let placeholders = match db_type {
        DbType::Postgres => "$1, $2, $3, 'SQL', $4, $5, $6, $7, TRUE",
        DbType::MySql => "?, ?, ?, 'SQL', ?, ?, ?, ?, TRUE",
        DbType::Sqlite => "?1, ?2, ?3, 'SQL', ?4, ?5, ?6, ?7, 1",
    };
    format!(
        "INSERT INTO {HISTORY_TABLE} (installed_rank, version, description, type, script, \
         checksum, installed_by, execution_time, success) VALUES ({placeholders})"
    )
}

/// `SELECT COUNT(*)` of rows for one version
#[must_use]
pub fn count_version_sql(db_type: DbType) -> String {
    let placeholder = match db_type {
        DbType::Postgres => "$1",
        DbType::MySql | DbType::Sqlite => "?",
    };
    format!("SELECT COUNT(*) FROM {HISTORY_TABLE} WHERE version = {placeholder}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_ddl_contains_every_column() {
        for db_type in [DbType::Postgres, DbType::MySql, DbType::Sqlite] {
            let ddl = history_table_ddl(db_type);
            let table = &ddl[0];
            assert!(table.contains(HISTORY_TABLE), "{db_type}: {table}");
            assert!(table.to_uppercase().contains("IF NOT EXISTS"), "{db_type}: {table}");
            for column in HISTORY_COLUMNS {
                assert!(table.contains(column), "{db_type} DDL missing {column}: {table}");
            }
        }
    }

    #[test]
    fn test_history_ddl_installed_on_default() {
        assert!(history_table_ddl(DbType::Postgres)[0].contains("DEFAULT now()"));
        assert!(history_table_ddl(DbType::MySql)[0].contains("CURRENT_TIMESTAMP(3)"));
        assert!(history_table_ddl(DbType::Sqlite)[0].contains("strftime"));
    }

    #[test]
    fn test_history_ddl_index_per_backend() {
        assert_eq!(history_table_ddl(DbType::Postgres).len(), 2);
        assert_eq!(history_table_ddl(DbType::Sqlite).len(), 2);
        assert_eq!(history_table_ddl(DbType::MySql).len(), 1);
        assert!(history_table_ddl(DbType::Sqlite)[1].contains("flyway_schema_history_s_idx"));
    }

    #[test]
    fn test_history_index_targets_success_column() {
        let sqlite = &history_table_ddl(DbType::Sqlite)[1];
        assert!(sqlite.contains(r#"("success")"#), "{sqlite}");
        assert!(sqlite.to_uppercase().contains("IF NOT EXISTS"), "{sqlite}");

        let postgres = &history_table_ddl(DbType::Postgres)[1];
        assert!(postgres.contains(r#"("success")"#), "{postgres}");
    }

    #[test]
    fn test_select_history_sql() {
        let sql = select_history_sql(DbType::Postgres);
        assert!(sql.contains("installed_on::text"));
        assert!(sql.ends_with("ORDER BY installed_rank ASC"));
        assert!(select_history_sql(DbType::MySql).contains("CAST(installed_on AS CHAR)"));
    }

    #[test]
    fn test_insert_history_sql_placeholders() {
        let postgres = insert_history_sql(DbType::Postgres);
        assert!(postgres.contains("$7"));
        assert!(!postgres.contains('?'));
        assert_eq!(insert_history_sql(DbType::MySql).matches('?').count(), 7);
        assert!(insert_history_sql(DbType::Sqlite).contains("?7"));
        assert!(!postgres.contains("installed_on"));
    }

    #[test]
    fn test_count_version_sql() {
        assert!(count_version_sql(DbType::Postgres).ends_with("version = $1"));
        assert!(count_version_sql(DbType::Sqlite).ends_with("version = ?"));
    }
}
