//! tidemark migration CLI
//!
//! Thin command-line front end over the tidemark library: scaffolds a project,
//! generates migrations from schema files and applies them to PostgreSQL.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tidemark::config::{TidemarkConfig, DEFAULT_CONFIG_FILE};
use tidemark::migration::{GenerateError, MigrationGenerator, MigrationState, Migrator};
use tidemark::{connect, MayPostgresExecutor, Schema};

#[derive(Parser)]
#[command(name = "tidemark-migrate")]
#[command(about = "Snapshot-based schema migration tool")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Database connection URL (overrides the configuration)
    #[arg(long)]
    database_url: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the migration directories and a default configuration file
    Init,

    /// Generate the next migration from a schema file
    Generate {
        /// What the migration does, e.g. "add age to users"
        description: String,

        /// Canonical schema as JSON
        #[arg(long)]
        schema: PathBuf,
    },

    /// Apply pending migrations
    Migrate {
        /// Show what would be applied without running anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show applied, pending and drifted migrations
    Status,
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    if let Err(e) = run(cli) {
        eprintln!("{} {e:#}", "Error:".red().bold());
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Commands::Init = cli.command {
        return handle_init(&cli.config);
    }

    let mut config = TidemarkConfig::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(url) = cli.database_url {
        config.database.url = Some(url);
    }

    match cli.command {
        Commands::Init => Ok(()),
        Commands::Generate {
            description,
            schema,
        } => handle_generate(&config, &description, &schema),
        Commands::Migrate { dry_run } => handle_migrate(&config, dry_run),
        Commands::Status => handle_status(&config),
    }
}

fn handle_init(config_path: &Path) -> Result<()> {
    let config = TidemarkConfig::default();
    for dir in [&config.paths.migrations_dir, &config.paths.snapshots_dir] {
        fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    }

    if config_path.exists() {
        println!("{} already exists, leaving it alone", config_path.display());
    } else {
        fs::write(config_path, config.to_toml_template())
            .with_context(|| format!("writing {}", config_path.display()))?;
        println!("{} Created {}", "✓".green(), config_path.display());
    }
    println!(
        "{} Migrations go in {}",
        "✓".green(),
        config.paths.migrations_dir.display()
    );
    Ok(())
}

fn handle_generate(config: &TidemarkConfig, description: &str, schema_path: &Path) -> Result<()> {
    let content = fs::read_to_string(schema_path)
        .with_context(|| format!("reading schema {}", schema_path.display()))?;
    let schema: Schema = serde_json::from_str(&content)
        .with_context(|| format!("parsing schema {}", schema_path.display()))?;

    let generator = MigrationGenerator::from_config(config);
    let generated = match generator.generate(&schema, description) {
        Ok(generated) => generated,
        Err(GenerateError::EmptyDiff) => {
            println!("No changes since the latest snapshot; nothing generated");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for warning in &generated.warnings {
        println!("{} {warning}", "warning:".yellow().bold());
    }
    for section in generated.script.sections.iter().filter(|s| s.destructive) {
        println!(
            "{} {} discards data",
            "warning:".yellow().bold(),
            section.description
        );
    }
    println!(
        "{} Generated {} ({} statement(s))",
        "✓".green(),
        generated.path.display(),
        generated.script.statements().count()
    );
    Ok(())
}

fn executor(config: &TidemarkConfig) -> Result<MayPostgresExecutor> {
    let client = connect(config.database_url()?).context("connecting to database")?;
    Ok(MayPostgresExecutor::new(client))
}

fn handle_migrate(config: &TidemarkConfig, dry_run: bool) -> Result<()> {
    let executor = executor(config)?;
    let migrator = Migrator::from_config(config);

    if dry_run {
        let pending = migrator.plan(&executor)?;
        if pending.is_empty() {
            println!("No pending migrations to apply");
            return Ok(());
        }
        println!("Would apply {} migration(s):", pending.len());
        for (i, migration) in pending.iter().enumerate() {
            println!("  {}. {}", i + 1, migration.name);
        }
        return Ok(());
    }

    let applied = migrator.migrate(&executor)?;
    if applied.is_empty() {
        println!("{} No migrations to apply", "✓".green());
    } else {
        for record in &applied {
            println!(
                "{} {} ({}ms)",
                "✓".green(),
                record.name,
                record.execution_time_ms.unwrap_or_default()
            );
        }
        println!("Applied {} migration(s)", applied.len());
    }
    Ok(())
}

fn handle_status(config: &TidemarkConfig) -> Result<()> {
    let executor = executor(config)?;
    let status = Migrator::from_config(config).status(&executor)?;

    println!("\nMigration Status\n");
    for entry in &status.entries {
        let line = format!("{:>6}  {}", entry.state, entry.name);
        match &entry.state {
            MigrationState::Applied { applied_at } => {
                println!("{}  {}", line.green(), applied_at.format("%Y-%m-%d %H:%M:%S"));
            }
            MigrationState::Pending => println!("{}", line.yellow()),
            MigrationState::Drifted { recorded } => {
                println!("{}  recorded checksum {recorded}", line.red().bold());
            }
        }
    }
    for record in &status.orphaned {
        println!(
            "{}",
            format!("orphan  {} (in the ledger, not found locally)", record.name).red()
        );
    }

    println!(
        "\nSummary: {} applied, {} pending, {} drifted, {} orphaned",
        status.applied_count,
        status.pending_count,
        status.drifted_count,
        status.orphaned.len()
    );

    if status.drifted_count > 0 || !status.orphaned.is_empty() {
        bail!("the ledger does not match the local migration history");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_generate() {
        let cli = Cli::try_parse_from([
            "tidemark-migrate",
            "generate",
            "add age to users",
            "--schema",
            "schema.json",
        ])
        .unwrap();
        match cli.command {
            Commands::Generate {
                description,
                schema,
            } => {
                assert_eq!(description, "add age to users");
                assert_eq!(schema, PathBuf::from("schema.json"));
            }
            _ => panic!("expected generate"),
        }
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn test_parse_migrate_dry_run() {
        let cli = Cli::try_parse_from(["tidemark-migrate", "-v", "migrate", "--dry-run"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Migrate { dry_run: true }));
    }

    #[test]
    fn test_generate_requires_schema() {
        assert!(Cli::try_parse_from(["tidemark-migrate", "generate", "x"]).is_err());
    }

    #[test]
    fn test_generate_from_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TidemarkConfig::default();
        config.paths.migrations_dir = dir.path().join("migrations");
        config.paths.snapshots_dir = dir.path().join("migrations/snapshots");

        let schema = Schema::new().table(
            tidemark::schema::Table::new("users").column(tidemark::schema::Column::new(
                "id",
                tidemark::schema::ColumnType::Integer,
            )),
        );
        let schema_path = dir.path().join("schema.json");
        fs::write(&schema_path, serde_json::to_string(&schema).unwrap()).unwrap();

        handle_generate(&config, "create users", &schema_path).unwrap();
        assert!(config.paths.migrations_dir.join("0000_create_users.sql").exists());
        assert!(config.paths.snapshots_dir.join("0000.snapshot.json").exists());

        // Unchanged schema is not an error.
        handle_generate(&config, "again", &schema_path).unwrap();
        assert!(!config.paths.migrations_dir.join("0001_again.sql").exists());
    }
}
