//! kbvec CLI
//!
//! Main entry point for the kbvec command-line tool.
//! Loads the knowledge base from SQLite into the vector index and runs
//! one-shot searches, statistics and health checks against it.

mod commands;

use clap::{Parser, Subcommand};
use commands::{HealthCommand, SearchCommand, StatsCommand};
use kbvec_core::{config::AppConfig, logging, AppResult};
use std::path::PathBuf;

/// kbvec - similarity search over a support knowledge base
#[derive(Parser, Debug)]
#[command(name = "kbvec")]
#[command(about = "Similarity search over a support knowledge base", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "KBVEC_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the SQLite knowledge base
    #[arg(long, global = true, env = "KBVEC_DB_PATH")]
    db: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, env = "RUST_LOG")]
    log_level: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    no_color: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true, env = "KBVEC_LOG_JSON")]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Find the best matching record for a query
    Search(SearchCommand),

    /// Show index and cache statistics
    Stats(StatsCommand),

    /// Check index, embedding provider and database health
    Health(HealthCommand),
}

#[tokio::main]
async fn main() -> AppResult<()> {
    // Parse command-line arguments first (needed for logging config)
    let cli = Cli::parse();

    // Load base configuration from file and environment
    let config = AppConfig::load_from(cli.config)?;

    // Apply CLI overrides
    let config = config.with_overrides(
        cli.db,
        cli.log_level,
        cli.verbose,
        cli.no_color,
        cli.json_logs,
    );

    // Initialize logging with final configuration
    logging::init_logging(config.log_level.as_deref(), config.no_color, config.json_logs)?;

    tracing::info!("kbvec starting");
    tracing::debug!("Database: {:?}", config.db_path);
    tracing::debug!("Provider: {} ({})", config.provider, config.model);
    tracing::debug!(
        "Index: {} (distance metric: {})",
        config.index_type,
        config.uses_distance_metric()
    );

    config.validate()?;

    let command_name = match &cli.command {
        Commands::Search(_) => "search",
        Commands::Stats(_) => "stats",
        Commands::Health(_) => "health",
    };
    let _span = tracing::info_span!("command", name = command_name).entered();

    // Route to command handlers
    let result = match cli.command {
        Commands::Search(cmd) => cmd.execute(&config).await,
        Commands::Stats(cmd) => cmd.execute(&config).await,
        Commands::Health(cmd) => cmd.execute(&config).await,
    };

    // Log completion
    match &result {
        Ok(_) => tracing::info!("Command completed successfully"),
        Err(e) => tracing::error!("Command failed: {}", e),
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_with_globals() {
        let cli = Cli::try_parse_from([
            "kbvec",
            "--db",
            "/tmp/kb.db",
            "search",
            "how do I reset my password",
            "--json",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("/tmp/kb.db")));
        match cli.command {
            Commands::Search(cmd) => {
                assert_eq!(cmd.query, "how do I reset my password");
                assert!(cmd.json);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_search_requires_query() {
        assert!(Cli::try_parse_from(["kbvec", "search"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["kbvec", "health", "--verbose", "--json-logs"]).unwrap();
        assert!(cli.verbose);
        assert!(cli.json_logs);
        assert!(matches!(cli.command, Commands::Health(_)));
    }
}
