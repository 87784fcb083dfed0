//! Lockstep Migration CLI Tool
//!
//! Command-line interface for applying and inspecting Lockstep migrations.
//! Suitable for CI/CD pipelines: every failure exits with status 1.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use lockstep::config::MigratorConfig;
use lockstep::database::DbType;
use lockstep::migration::{
    compare_versions, discover_scripts, parse_file_name, DiscoveryOrder, MigrateReport,
    MigrationRecord, Migrator,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

#[derive(Parser)]
#[command(name = "lockstep")]
#[command(about = "Lock-protected, forward-only SQL migrations")]
#[command(version)]
struct Cli {
    /// Database connection URL
    ///
    /// Falls back to LOCKSTEP_DATABASE_URL, DATABASE_URL, then config/lockstep.toml
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Database engine: postgres, mysql or sqlite3
    #[arg(long, global = true)]
    db_type: Option<DbType>,

    /// Identity recorded as installed_by
    #[arg(long, global = true)]
    user: Option<String>,

    /// Migrations directory path
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Seconds to wait for the migration lock
    #[arg(long, global = true)]
    lock_timeout: Option<u64>,

    /// Order in which discovered files are ranked
    #[arg(long, global = true, value_enum)]
    order: Option<OrderArg>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Migrate,

    /// Show the schema history table
    History {
        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compare checksums of applied migrations with the files on disk
    Validate,

    /// Create an empty migration file with the next major version
    New {
        /// Migration description (e.g., "create_users_table")
        description: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OrderArg {
    Version,
    FileName,
}

impl From<OrderArg> for DiscoveryOrder {
    fn from(order: OrderArg) -> Self {
        match order {
            OrderArg::Version => DiscoveryOrder::Version,
            OrderArg::FileName => DiscoveryOrder::FileName,
        }
    }
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    // Initialize logging
    let default_filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let result = match &cli.command {
        Commands::Migrate => resolve_config(&cli).and_then(|config| handle_migrate(&config)),
        Commands::History { json } => {
            resolve_config(&cli).and_then(|config| handle_history(&config, *json))
        }
        Commands::Validate => resolve_config(&cli).and_then(|config| handle_validate(&config)),
        Commands::New { description } => {
            let dir = cli
                .migrations_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(lockstep::migration::DEFAULT_MIGRATIONS_DIR));
            handle_new(&dir, description)
        }
    };

    match result {
        Ok(()) => process::exit(0),
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            process::exit(1);
        }
    }
}

/// Build the migrator configuration from flags, env vars and `config/lockstep.toml`
fn resolve_config(cli: &Cli) -> Result<MigratorConfig> {
    let url = cli
        .database_url
        .clone()
        .or_else(|| std::env::var("LOCKSTEP_DATABASE_URL").ok())
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let mut config = match url {
        Some(url) => MigratorConfig::new(
            cli.db_type.unwrap_or(DbType::Postgres),
            url,
            "lockstep",
        ),
        None => MigratorConfig::load().context(
            "Database URL not provided. Use --database-url, \
             set LOCKSTEP_DATABASE_URL or DATABASE_URL, \
             or configure [migrator] in config/lockstep.toml",
        )?,
    };

    if let Some(db_type) = cli.db_type {
        config.db_type = db_type;
    }
    if let Some(user) = &cli.user {
        config.installed_by = user.clone();
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }
    if let Some(seconds) = cli.lock_timeout {
        config.lock_timeout_seconds = seconds;
    }
    if let Some(order) = cli.order {
        config.order = order.into();
    }

    Ok(config)
}

fn handle_migrate(config: &MigratorConfig) -> Result<()> {
    let mut migrator = Migrator::connect(config)?;
    let report = migrator.migrate_from_dir(&config.migrations_dir)?;

    println!("{}", migrate_summary(&report));
    Ok(())
}

fn migrate_summary(report: &MigrateReport) -> String {
    let Some(latest) = report.latest_applied_version() else {
        return format!(
            "{} Schema is up to date ({} applied before)",
            "✓".green(),
            report.skipped.len()
        );
    };

    let mut lines: Vec<String> = report
        .applied
        .iter()
        .map(|version| format!("  {} {}", "applied".green(), version))
        .collect();
    lines.push(format!(
        "{} Successfully applied {} migration(s) in {}ms, schema now at version {}",
        "✓".green(),
        report.applied.len(),
        report.elapsed.as_millis(),
        latest
    ));
    lines.join("\n")
}

fn handle_history(config: &MigratorConfig, json: bool) -> Result<()> {
    let mut migrator = Migrator::connect(config)?;
    let history = migrator.history()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(());
    }

    if history.is_empty() {
        println!("No migrations applied");
        return Ok(());
    }

    println!("{}", format!("Schema history ({} rows)", history.len()).bold());
    for record in &history {
        println!("  {}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &MigrationRecord) -> String {
    let status = if record.success { "✓".green() } else { "✗".red() };
    format!(
        "{} {:>4}  {:<8} {:<40} {}  {}ms  by {}",
        status,
        record.installed_rank,
        record.version.as_deref().unwrap_or("-"),
        record.description,
        format_installed_on(&record.installed_on),
        record.execution_time,
        record.installed_by
    )
}

fn format_installed_on(installed_on: &chrono::NaiveDateTime) -> String {
    installed_on.format("%Y-%m-%d %H:%M:%S").to_string()
}

fn handle_validate(config: &MigratorConfig) -> Result<()> {
    let mut migrator = Migrator::connect(config)?;
    let drifts = migrator.validate_dir(&config.migrations_dir)?;

    if drifts.is_empty() {
        println!("{} All checksums valid", "✓".green());
        return Ok(());
    }

    for drift in &drifts {
        println!("  {} {}", "modified".yellow(), drift);
    }
    bail!("{} applied migration(s) changed on disk", drifts.len())
}

fn handle_new(migrations_dir: &Path, description: &str) -> Result<()> {
    fs::create_dir_all(migrations_dir).with_context(|| {
        format!("Failed to create migrations directory {}", migrations_dir.display())
    })?;

    let file_name = next_file_name(migrations_dir, description)?;
    let path = migrations_dir.join(&file_name);
    let generated = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
    fs::write(&path, format!("-- {description}\n-- Generated: {generated}\n\n"))
        .with_context(|| format!("Failed to write migration file {}", path.display()))?;

    println!("{} Generated migration: {}", "✓".green(), path.display());
    Ok(())
}

/// `V<major + 1>_0__<description>.sql`, where major is the highest in `dir`
fn next_file_name(dir: &Path, description: &str) -> Result<String> {
    let scripts = discover_scripts(dir, DiscoveryOrder::Version)?;
    let latest = scripts
        .iter()
        .map(|s| s.version.as_str())
        .max_by(|a, b| compare_versions(a, b));

    let major: u64 = match latest {
        Some(version) => {
            let major = version.split('.').next().unwrap_or("0");
            major
                .parse::<u64>()
                .with_context(|| format!("Version {version} is too large to increment"))?
                + 1
        }
        None => 1,
    };

    let file_name = format!("V{major}_0__{description}.sql");
    // Reject descriptions discovery would not accept
    parse_file_name(&file_name)?;
    Ok(file_name)
}
