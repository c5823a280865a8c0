//! DLT Test Robot - runs scripted test suites against DLT speaking ECUs
//!
//! Loads a test definition file, drives the robot endpoint over TCP, marks
//! the trace with DLT log messages and writes a report per run.

use clap::Parser;
use dlt_test_robot::common::{config::Config, logging};
use dlt_test_robot::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "dlt-test-robot", about = "Scripted test runs against DLT ECUs")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(path) => Config::load_from(&path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    // Keep the file writer alive until exit
    let _guard = match &config.logging.file {
        Some(path) => match logging::init_with_file(path) {
            Ok(guard) => Some(guard),
            Err(e) => {
                eprintln!("Error: cannot open log file {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => {
            logging::init_cli();
            None
        }
    };

    let result = match cli.command {
        Some(command) => cli::dispatch(command, &config).await,
        None => cli::autostart(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
