mod commands;
mod prompt;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tidemark")]
#[command(version, about = "tidemark - ordered, reversible schema migrations", long_about = None)]
struct Cli {
    /// Config file (defaults to tidemark.yml / .yaml / .toml in the working directory)
    #[arg(short, long, global = true, env = "TIDEMARK_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or repair the bookkeeping tables
    Init,

    /// Apply pending migrations
    Migrate {
        /// Apply only the next pending migration
        #[arg(long)]
        one: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Revert the last executed migration
    Rollback {
        /// Revert every executed migration
        #[arg(long)]
        all: bool,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        force: bool,
    },

    /// Show the state of every declared migration
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Create an empty SQL migration
    New {
        /// Migration name (letters, digits, '_' and '-')
        name: String,

        /// Target database, when not the default one
        #[arg(short, long)]
        database: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => commands::init(&config),
        Commands::Migrate { one, force } => commands::migrate(&config, one, force),
        Commands::Rollback { all, force } => commands::rollback(&config, all, force),
        Commands::Status { json } => commands::status(&config, json),
        Commands::New { name, database } => commands::new_migration(&config, &name, database),
    }
}
