mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use strata_core::{init_logging, AppConfig, AppConfigTrait};
use strata_orm::{ManagedPool, MigrationRunner};

use commands::*;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Versioned SQL migrations for PostgreSQL")]
struct Cli {
    /// Directory holding NNN-slug.sql migration files (overrides MIGRATIONS_DIR)
    #[arg(long, global = true)]
    migrations_dir: Option<PathBuf>,

    /// Directory holding seed scripts (overrides SEEDS_DIR)
    #[arg(long, global = true)]
    seeds_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply all pending migrations
    Migrate,

    /// Revert the most recently applied migrations
    Rollback {
        /// Number of migrations to revert
        #[arg(default_value_t = 1)]
        steps: usize,
    },

    /// Revert every applied migration
    Reset,

    /// Show applied and pending migrations and checksum drift
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Reset, migrate and seed
    Fresh,

    /// Run seed scripts
    Seed,

    /// Create the next migration file
    Make {
        /// Short description, e.g. add-refresh-tokens
        slug: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    if let Some(dir) = cli.migrations_dir {
        config.migrations.dir = dir;
    }
    if let Some(dir) = cli.seeds_dir {
        config.migrations.seeds_dir = dir;
    }
    config.validate().context("Invalid configuration")?;

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("Warning: logging not initialized: {}", e);
    }

    // The pool only connects for commands that need it; closing is a no-op otherwise.
    let pool = Arc::new(ManagedPool::new());
    let result = dispatch(cli.command, &config, &pool).await;
    pool.close().await;
    result
}

async fn dispatch(
    command: Commands,
    config: &AppConfig,
    pool: &Arc<ManagedPool>,
) -> anyhow::Result<()> {
    match command {
        Commands::Make { slug } => migrate::make(&config.migrations, &slug),
        Commands::Migrate => migrate::migrate(&connected_runner(pool, config).await?).await,
        Commands::Rollback { steps } => {
            migrate::rollback(&connected_runner(pool, config).await?, steps).await
        }
        Commands::Reset => migrate::reset(&connected_runner(pool, config).await?).await,
        Commands::Status { json } => {
            migrate::status(&connected_runner(pool, config).await?, json).await
        }
        Commands::Fresh => {
            let runner = connected_runner(pool, config).await?;
            migrate::reset(&runner).await?;
            migrate::migrate(&runner).await?;
            database::seed(pool, &config.migrations.seeds_dir).await
        }
        Commands::Seed => {
            database::connect(pool, &config.database).await?;
            database::seed(pool, &config.migrations.seeds_dir).await
        }
    }
}

async fn connected_runner(
    pool: &Arc<ManagedPool>,
    config: &AppConfig,
) -> anyhow::Result<MigrationRunner> {
    database::connect(pool, &config.database).await?;
    migrate::runner(pool, &config.migrations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use strata_core::config::{DatabaseConfig, LoggingConfig, MigrationsConfig};

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_rollback_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["strata", "rollback"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 1 }));

        let cli = Cli::try_parse_from(["strata", "rollback", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 3 }));
    }

    #[test]
    fn test_global_directory_flags() {
        let cli = Cli::try_parse_from([
            "strata",
            "status",
            "--json",
            "--migrations-dir",
            "db/migrations",
            "--seeds-dir",
            "db/seeds",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Status { json: true }));
        assert_eq!(cli.migrations_dir, Some(PathBuf::from("db/migrations")));
        assert_eq!(cli.seeds_dir, Some(PathBuf::from("db/seeds")));
    }

    #[tokio::test]
    async fn test_make_dispatches_without_database() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig {
            // Unreachable on purpose; make must never try to connect.
            database: DatabaseConfig {
                port: 1,
                ..Default::default()
            },
            migrations: MigrationsConfig {
                dir: dir.path().join("migrations"),
                ..Default::default()
            },
            logging: LoggingConfig::default(),
        };
        let pool = Arc::new(ManagedPool::new());

        let command = Commands::Make {
            slug: "create users".to_string(),
        };
        dispatch(command, &config, &pool).await.unwrap();

        assert!(dir.path().join("migrations/001-create-users.sql").exists());
        assert!(!pool.is_initialized());
    }

    #[test]
    fn test_make_requires_slug() {
        assert!(Cli::try_parse_from(["strata", "make"]).is_err());
        let cli = Cli::try_parse_from(["strata", "make", "add-refresh-tokens"]).unwrap();
        assert!(matches!(cli.command, Commands::Make { ref slug } if slug == "add-refresh-tokens"));
    }
}
