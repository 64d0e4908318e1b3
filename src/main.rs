use clap::{Parser, Subcommand};
use sql_drive_backup::cli;
use sql_drive_backup::config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sql-drive-backup",
    version,
    about = "Dump a MySQL/MariaDB database and upload it to Google Drive"
)]
struct Cli {
    /// Configuration file (defaults to ~/.sql_drive_backup/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Dump the database, upload it and clean up (default)
    Run,
    /// Grant Google Drive access and store the OAuth token
    Authorize,
    /// Check database connectivity, the dump utility and upload settings
    Check,
    /// Interactively create or edit the configuration file
    Setup,
}

#[tokio::main]
async fn main() {
    let args = Cli::parse();
    let config_path = args.config.unwrap_or_else(config::config_path);

    let code = match args.command.unwrap_or(Commands::Run) {
        Commands::Run => cli::run_backup(&config_path).await,
        Commands::Authorize => cli::authorize(&config_path).await,
        Commands::Check => cli::check(&config_path).await,
        Commands::Setup => match cli::run_setup(&config_path).await {
            Ok(()) => 0,
            Err(e) => {
                eprintln!("Error: {}", e);
                1
            }
        },
    };

    std::process::exit(code);
}
