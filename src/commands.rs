//! CLI command definitions
//!
//! Defines the clap commands for the test robot CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run tests from a test definition file
    Run {
        /// Test definition file (default: autoload file from config)
        tests: Option<PathBuf>,

        /// Run only the test with this id
        #[arg(long, short)]
        test: Option<String>,

        /// How often each test runs in a row
        #[arg(long, short)]
        repeat: Option<u32>,

        /// How often the whole selection runs
        #[arg(long)]
        suite_repeat: Option<u32>,

        /// Settings document for the transport and capture relay
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Directory for reports and capture files
        #[arg(long)]
        reports_dir: Option<PathBuf>,

        /// Execute against an in-memory robot instead of the network
        #[arg(long)]
        dry_run: bool,

        /// Print progress events as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// List the tests of a definition file
    #[command(alias = "ls")]
    List {
        /// Test definition file (default: autoload file from config)
        tests: Option<PathBuf>,
    },

    /// Validate a definition file and report every problem
    Check {
        /// Test definition file
        tests: PathBuf,
    },

    /// Write a settings document
    Settings {
        /// Target file (default: stdout)
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Start from this settings document instead of the defaults
        #[arg(long)]
        from: Option<PathBuf>,
    },
}
