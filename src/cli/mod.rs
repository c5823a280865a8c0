//! CLI command handling
//!
//! Wires the definition store, the collaborators, the sequencer and the
//! report writer together for one invocation and formats output.

mod output;

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use colored::Colorize;

use crate::capture::{CaptureRelay, RecordingCapture, TcpCaptureRelay};
use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::definition::{join_errors, TestStore};
use crate::engine::{ProgressKind, RunRequest, Sequencer, SequencerOptions};
use crate::report::ReportWriter;
use crate::settings::{read_settings, write_settings, Settings};
use crate::transport::{ScriptedTransport, TcpTransport, Targets, Transport};

use output::{print_suite, ProgressPrinter};

/// Options of the `run` command, with config defaults still unresolved
#[derive(Debug, Default)]
pub struct RunOptions {
    pub tests: Option<PathBuf>,
    pub test: Option<String>,
    pub repeat: Option<u32>,
    pub suite_repeat: Option<u32>,
    pub settings: Option<PathBuf>,
    pub reports_dir: Option<PathBuf>,
    pub dry_run: bool,
    pub json: bool,
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run {
            tests,
            test,
            repeat,
            suite_repeat,
            settings,
            reports_dir,
            dry_run,
            json,
        } => {
            run(
                RunOptions {
                    tests,
                    test,
                    repeat,
                    suite_repeat,
                    settings,
                    reports_dir,
                    dry_run,
                    json,
                },
                config,
            )
            .await
        }

        Commands::List { tests } => {
            let path = tests_path(tests, config)?;
            let store = load_store(&path)?;
            print_suite(&store.snapshot());
            Ok(())
        }

        Commands::Check { tests } => {
            let store = TestStore::new();
            let errors = store.load(&tests);
            if !errors.is_empty() {
                return Err(Error::Definition(join_errors(&errors)));
            }
            println!(
                "{} {} tests OK in {}",
                "✓".green(),
                store.count(),
                tests.display()
            );
            Ok(())
        }

        Commands::Settings { output, from } => {
            let settings = match from {
                Some(path) => read_settings(&path)?,
                None => Settings::default(),
            };
            match output {
                Some(path) => {
                    let mut file = File::create(&path)?;
                    write_settings(&settings, &mut file)?;
                    println!("Settings written to {}", path.display());
                }
                None => write_settings(&settings, &mut std::io::stdout().lock())?,
            }
            Ok(())
        }
    }
}

/// Run the autoload tests when the config asks for it
pub async fn autostart(config: &Config) -> Result<()> {
    if !config.run.autostart {
        return Err(Error::Config(
            "no command given and run.autostart is not enabled".to_string(),
        ));
    }
    run(RunOptions::default(), config).await
}

fn tests_path(explicit: Option<PathBuf>, config: &Config) -> Result<PathBuf> {
    explicit
        .or_else(|| config.autoload.tests.clone())
        .ok_or_else(|| {
            Error::Config("no test definition file given and none configured for autoload".to_string())
        })
}

/// Load a definition file, reporting per-test problems as warnings
fn load_store(path: &Path) -> Result<TestStore> {
    let store = TestStore::new();
    let errors = store.load(path);

    if errors.iter().any(|e| e.position.is_none()) {
        return Err(Error::Definition(join_errors(&errors)));
    }
    if !errors.is_empty() {
        eprintln!(
            "{} {} test(s) skipped:\n{}",
            "warning:".yellow().bold(),
            errors.len(),
            join_errors(&errors)
        );
    }
    Ok(store)
}

async fn run(options: RunOptions, config: &Config) -> Result<()> {
    let tests = tests_path(options.tests, config)?;
    let store = Arc::new(load_store(&tests)?);

    let settings = match options.settings.or_else(|| config.autoload.settings.clone()) {
        Some(path) => read_settings(&path)?,
        None => Settings::default(),
    };
    let reports_dir =
        paths::ensure_reports_dir(options.reports_dir.as_deref().unwrap_or(&config.reports.dir))?;

    let mut request = match &options.test {
        Some(id) => {
            let index = store.snapshot().index_of(id).ok_or_else(|| {
                Error::InvalidRequest(format!("no test with id '{}' in {}", id, tests.display()))
            })?;
            RunRequest::single(index)
        }
        None => RunRequest::all(),
    };
    request = request
        .with_test_repeat(options.repeat.unwrap_or(config.run.test_repeat))
        .with_suite_repeat(options.suite_repeat.unwrap_or(config.run.suite_repeat));

    let (transport, capture, relay) = connect(&settings, options.dry_run).await;

    let sequencer = Sequencer::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        capture,
        SequencerOptions {
            reports_dir: reports_dir.clone(),
            targets: Targets::from_list(&settings.transport.targets),
        },
    );

    let report_rx = sequencer.subscribe();
    let mut rx = sequencer.subscribe();
    let ticket = sequencer.start(request)?;

    let writer = match ReportWriter::create(&reports_dir, &ticket) {
        Ok(writer) => writer,
        Err(e) => {
            if sequencer.stop().is_ok() {
                sequencer.wait().await;
            }
            return Err(e);
        }
    };
    let report = tokio::task::spawn_blocking(move || writer.run(report_rx));

    let printer = ProgressPrinter::new(options.json);
    let mut stop_requested = false;
    let mut last = None;

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                printer.print(&event);
                let terminal = event.kind.is_terminal();
                last = Some(event);
                if terminal {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if stop_requested {
                    eprintln!("{}", "Interrupted".red());
                    std::process::exit(130);
                }
                stop_requested = true;
                eprintln!(
                    "{}",
                    "Stopping after the current command, press Ctrl+C again to exit".yellow()
                );
                if let Err(e) = sequencer.stop() {
                    tracing::debug!("Stop ignored: {}", e);
                }
            }
        }
    }

    sequencer.wait().await;

    match report.await {
        Ok(Ok(path)) => {
            if !options.json {
                println!("\n{} {}", "Report:".cyan(), path.display());
            }
        }
        Ok(Err(e)) => tracing::error!("Failed to write report: {}", e),
        Err(e) => tracing::error!("Report task failed: {}", e),
    }

    if let Err(e) = transport.close().await {
        tracing::debug!("Closing transport: {}", e);
    }
    if let Some(relay) = relay {
        relay.stop();
    }

    match last {
        Some(event) if event.kind == ProgressKind::Stopped => Err(Error::RunStopped),
        Some(event) if event.counters.failed > 0 => Err(Error::TestsFailed {
            failed: event.counters.failed,
            total: event.counters.failed + event.counters.success,
        }),
        Some(_) => Ok(()),
        None => Err(Error::Internal("run ended without a final event".to_string())),
    }
}

/// Build the collaborators, opening the network links unless dry running
///
/// Link problems are only logged here: tests that need a link fail their
/// preconditions, commands fail on their own.
async fn connect(
    settings: &Settings,
    dry_run: bool,
) -> (
    Arc<dyn Transport>,
    Arc<dyn CaptureRelay>,
    Option<Arc<TcpCaptureRelay>>,
) {
    if dry_run {
        tracing::info!("Dry run, commands are not sent to a robot endpoint");
        let transport: Arc<dyn Transport> = Arc::new(ScriptedTransport::connected());
        let capture: Arc<dyn CaptureRelay> = Arc::new(RecordingCapture::new());
        return (transport, capture, None);
    }

    let relay = Arc::new(TcpCaptureRelay::new(settings.capture.clone()));
    if let Err(e) = relay.start().await {
        tracing::warn!("{}", e);
    }

    let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(settings.transport.clone()));
    if let Err(e) = transport.open().await {
        tracing::warn!(
            host = %settings.transport.host,
            port = settings.transport.port,
            "Robot endpoint not reachable: {}",
            e
        );
    }

    let capture: Arc<dyn CaptureRelay> = relay.clone();
    (transport, capture, Some(relay))
}
