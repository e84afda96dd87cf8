//! schemaledger: the migration CLI
//!
//! # Usage
//!
//! ```bash
//! # Apply everything pending
//! schemaledger up --database-url postgres://localhost/app
//!
//! # Inspect without changing anything
//! schemaledger status --format json
//!
//! # Start a new migration file
//! schemaledger create "add users"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use schemaledger::definition::create_definition_file;
use schemaledger::prelude::*;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "schemaledger")]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "📒 Ledger-tracked SQL migrations", long_about = None)]
#[command(after_help = "EXAMPLES:
    schemaledger up                      # Apply pending migrations
    schemaledger up --format json        # Same, tally as JSON
    schemaledger status --format json    # Show applied/pending
    schemaledger create add_users        # New empty migration file")]
struct Cli {
    /// Database connection URL
    #[arg(long, env = "DATABASE_URL", global = true)]
    database_url: Option<String>,

    /// Directory holding migration files
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Ledger table name
    #[arg(long, global = true)]
    table: Option<String>,

    /// Config file (default: ./schemaledger.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Apply every pending migration in order
    Up {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Show applied and pending migrations
    Status {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Create a new empty migration file
    Create {
        /// Migration name, e.g. "add users"
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print().ok();
            std::process::exit(parse_exit_code(&e));
        }
    };

    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if e.downcast_ref::<MigrateError>().is_some_and(|e| e.is_usage()) {
            eprintln!("Try: schemaledger --help");
        }
        std::process::exit(1);
    }
}

/// `--help` and `--version` exit 0; real usage errors exit 1.
fn parse_exit_code(e: &clap::Error) -> i32 {
    if e.use_stderr() { 1 } else { 0 }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "schemaledger=debug" } else { "schemaledger=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(url) = &cli.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(dir) = &cli.dir {
        config.migrations_dir = dir.clone();
    }
    if let Some(table) = &cli.table {
        config.ledger_table = table.clone();
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;

    match &cli.command {
        Commands::Create { name } => create(&config, name.as_deref()),
        Commands::Up { format } => {
            let mut migrator = connect(&config).await?;
            let result = migrator.run().await?;
            print_run(&result, format)?;
            close(migrator).await;
            Ok(())
        }
        Commands::Status { format } => {
            let mut migrator = connect(&config).await?;
            let status = migrator.status().await?;
            print_status(&status, format)?;
            close(migrator).await;
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<Migrator<PgStore, DirSource>> {
    let ledger = Ledger::new(&config.ledger_table)?;
    let url = config.require_database_url()?;
    tracing::debug!(dir = %config.migrations_dir.display(), "connecting");

    let store = PgStore::connect(url).await.map_err(MigrateError::from)?;
    let source = DirSource::with_extension(&config.migrations_dir, &config.extension);

    Ok(Migrator::new(store, source)
        .with_ledger(ledger)
        .with_ledger_read(config.ledger_read))
}

async fn close(migrator: Migrator<PgStore, DirSource>) {
    if let Err(e) = migrator.into_storage().close().await {
        tracing::warn!(error = %e, "failed to close connection");
    }
}

fn create(config: &Config, name: Option<&str>) -> Result<()> {
    let name = name
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| MigrateError::usage("create requires a migration <name>"))?;

    let path = create_definition_file(
        &config.migrations_dir,
        name,
        &config.extension,
        chrono::Utc::now(),
    )?;

    println!("{}", "📝 Creating Migration".cyan().bold());
    println!();
    println!("  {} {}", "✓ Created:".green(), path.display());
    println!();
    println!("  Next steps:");
    println!("    1. Add your SQL to {}", path.display().to_string().yellow());
    println!("    2. Run: {}", "schemaledger up".cyan());
    Ok(())
}

fn print_run(result: &RunResult, format: &OutputFormat) -> Result<()> {
    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    println!("{}", "🚀 Migration Run".cyan().bold());
    println!();

    for id in &result.applied {
        println!("  {} {}", "✓".green(), id);
    }
    for failure in &result.failed {
        println!(
            "  {} {} [{}]: {}",
            "✗".red(),
            failure.identifier.yellow(),
            failure.step,
            failure.error.red()
        );
    }

    if !result.applied.is_empty() || !result.failed.is_empty() {
        println!();
    }
    println!(
        "  Applied: {}   Failed: {}",
        result.applied_count().to_string().green(),
        if result.is_clean() {
            result.failed_count().to_string().normal()
        } else {
            result.failed_count().to_string().red().bold()
        }
    );
    Ok(())
}

fn print_status(status: &Status, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(status)?);
        }
        OutputFormat::Table => {
            println!("{}", "📋 Migration Status".cyan().bold());
            println!();
            println!("  Total:   {}", status.total);
            println!("  Applied: {}", status.applied.to_string().green());
            println!("  Pending: {}", status.pending.len().to_string().yellow());

            if !status.ledger_available {
                println!();
                println!(
                    "  {} Ledger not readable, nothing reported as applied",
                    "⚠".yellow()
                );
            }

            if !status.migrations.is_empty() {
                println!();
                let width = status
                    .migrations
                    .iter()
                    .map(|m| m.identifier.len())
                    .max()
                    .unwrap_or(0);
                for m in &status.migrations {
                    match m.state {
                        MigrationState::Applied => println!(
                            "  {} {:width$}  {}",
                            "✓".green(),
                            m.identifier,
                            m.applied_at.as_deref().unwrap_or("").dimmed(),
                            width = width
                        ),
                        MigrationState::Pending => println!(
                            "  {} {:width$}  {}",
                            "○".yellow(),
                            m.identifier,
                            "pending".yellow(),
                            width = width
                        ),
                    }
                }
            }

            if !status.orphaned.is_empty() {
                println!();
                println!("  {} In ledger but missing from source:", "⚠".yellow());
                for id in &status.orphaned {
                    println!("    • {}", id.dimmed());
                }
            }

            if !status.pending.is_empty() {
                println!();
                println!("  Run {} to apply pending migrations", "schemaledger up".cyan());
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_author_comes_from_manifest() {
        assert_eq!(Cli::command().get_author(), Some(env!("CARGO_PKG_AUTHORS")));
    }

    #[test]
    fn test_up_accepts_json_format() {
        let cli = Cli::try_parse_from(["schemaledger", "up", "--format", "json"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Up {
                format: OutputFormat::Json
            }
        ));
    }

    #[test]
    fn test_parse_exit_codes() {
        let help = Cli::try_parse_from(["schemaledger", "--help"]).unwrap_err();
        assert_eq!(parse_exit_code(&help), 0);

        let bogus = Cli::try_parse_from(["schemaledger", "bogus"]).unwrap_err();
        assert_eq!(parse_exit_code(&bogus), 1);
    }
}
