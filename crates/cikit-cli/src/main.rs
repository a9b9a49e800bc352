mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{ArchiveArgs, RestoreArgs};

/// cikit - CI toolkit for warehouse datasets
#[derive(Parser)]
#[command(name = "cikit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML task file
    #[arg(short, long, global = true)]
    task_file: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Archive BigQuery datasets to object storage
    ArchiveBigquery(ArchiveArgs),

    /// Restore archived datasets into BigQuery
    RestoreBigquery(RestoreArgs),

    /// Run shell commands in order, stopping at the first failure
    RunShell {
        /// Commands to run, e.g. "dbt deps" "dbt build"
        #[arg(required = true, value_name = "COMMAND")]
        lines: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Credentials such as GOOGLE_APPLICATION_CREDENTIALS may live in .env
    dotenvy::dotenv().ok();
    logging::init(cli.verbose);

    match cli.command {
        Commands::ArchiveBigquery(args) => {
            commands::archive::execute(cli.task_file.as_deref(), &args).await
        }
        Commands::RestoreBigquery(args) => {
            commands::restore::execute(cli.task_file.as_deref(), &args).await
        }
        Commands::RunShell { lines } => commands::shell::execute(&lines).await,
    }
}
