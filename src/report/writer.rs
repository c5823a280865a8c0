//! Plain text test report
//!
//! One report file per run. Every progress event becomes one timestamped
//! line; the run's terminal event appends the summary block.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tokio::sync::mpsc;

use crate::common::Result;
use crate::engine::{Progress, ProgressKind, RunTicket};

use super::naming;

const DATE_FORMAT: &str = "%d.%m.%Y";
const TIME_FORMAT: &str = "%H:%M:%S";

/// Outcome line of the summary block
#[derive(Debug, Clone, PartialEq, Eq)]
struct SummaryLine {
    id: String,
    repeat: u32,
    total: u32,
    passed: bool,
}

/// Writes progress events of one run to a report file
pub struct ReportWriter {
    path: PathBuf,
    out: BufWriter<File>,
    summary: Vec<SummaryLine>,
    closed: bool,
}

impl ReportWriter {
    /// Create the report file for a run and write its header
    pub fn create(dir: &Path, ticket: &RunTicket) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = naming::report_path(dir, &ticket.started_at, &ticket.label);
        let file = File::create(&path)?;

        let mut writer = Self {
            path,
            out: BufWriter::new(file),
            summary: Vec::new(),
            closed: false,
        };

        let source = ticket
            .suite
            .source()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        writer.line(&format!(
            "Starting tests at {}",
            full_stamp(&ticket.started_at)
        ))?;
        writer.line("")?;
        writer.line(&format!("Test File: {}", source))?;
        writer.line("")?;
        writer.line(&format!("Test Version: {}", ticket.suite.version()))?;
        writer.line(&format!(
            "Capture File: {}",
            ticket.capture_file.display()
        ))?;
        writer.flush()?;

        tracing::debug!(path = %writer.path.display(), "Report created");
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a free text note
    pub fn note(&mut self, text: &str) -> Result<()> {
        let line = format!("=> {} {}", Local::now().format(TIME_FORMAT), text);
        self.line(&line)?;
        self.flush()
    }

    /// Append one progress event
    ///
    /// Returns true once the terminal event was written; later events are
    /// ignored.
    pub fn record(&mut self, progress: &Progress) -> Result<bool> {
        if self.closed {
            return Ok(true);
        }

        let now = Local::now();
        let time = now.format(TIME_FORMAT);
        match progress.kind {
            ProgressKind::Started => {
                self.line("")?;
                self.line(&format!(
                    "{} test start {} ({}/{})",
                    time,
                    progress.test_id,
                    progress.test_repeat_idx + 1,
                    progress.test_repeat_total
                ))?;
            }
            ProgressKind::Step => {
                let mut line = format!(
                    "{} test step {} {}",
                    time, progress.command_idx, progress.text
                );
                if progress.failed {
                    line.push_str(" FAILED");
                }
                self.line(&line)?;
            }
            ProgressKind::EndSuccess => {
                self.line(&format!("{} test end SUCCESS", time))?;
                self.summary.push(SummaryLine::from_progress(progress, true));
            }
            ProgressKind::EndFailed => {
                let line = if progress.text.is_empty() {
                    format!("{} test FAILED", time)
                } else {
                    format!("{} test FAILED {}", time, progress.text)
                };
                self.line(&line)?;
                self.summary.push(SummaryLine::from_progress(progress, false));
            }
            ProgressKind::SuiteEnd => {
                self.write_summary(progress, "FINISHED", &now)?;
            }
            ProgressKind::Stopped => {
                let line = format!("{} test STOPPED {}", time, progress.text);
                self.line(line.trim_end())?;
                self.write_summary(progress, "STOPPED", &now)?;
            }
        }

        self.flush()?;
        Ok(self.closed)
    }

    /// Record events until the run ends, returns the report path
    ///
    /// Blocks on file writes and on the receiver, run it on a blocking
    /// thread (`tokio::task::spawn_blocking`).
    pub fn run(mut self, mut rx: mpsc::UnboundedReceiver<Progress>) -> Result<PathBuf> {
        while let Some(progress) = rx.blocking_recv() {
            if self.record(&progress)? {
                return Ok(self.path);
            }
        }

        self.note("report incomplete, run ended without summary")?;
        Ok(self.path)
    }

    fn write_summary(&mut self, last: &Progress, verdict: &str, at: &DateTime<Local>) -> Result<()> {
        self.line("")?;
        self.line("Summary")?;
        let lines: Vec<String> = self.summary.iter().map(SummaryLine::to_string).collect();
        for line in lines {
            self.line(&line)?;
        }
        self.line("")?;
        self.line(&format!("Success tests: {}", last.counters.success))?;
        self.line(&format!("Failed tests: {}", last.counters.failed))?;
        self.line(&format!(
            "Failed test commands: {}",
            last.counters.failed_commands
        ))?;
        self.line("")?;
        self.line(&format!("Tests {} at {}", verdict, full_stamp(at)))?;
        self.closed = true;
        Ok(())
    }

    fn line(&mut self, text: &str) -> Result<()> {
        writeln!(self.out, "{}", text)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl SummaryLine {
    fn from_progress(progress: &Progress, passed: bool) -> Self {
        Self {
            id: progress.test_id.clone(),
            repeat: progress.test_repeat_idx + 1,
            total: progress.test_repeat_total,
            passed,
        }
    }
}

impl std::fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let verdict = if self.passed { "SUCCESS" } else { "FAILED" };
        write!(f, "{} {} ({}/{})", verdict, self.id, self.repeat, self.total)
    }
}

fn full_stamp(at: &DateTime<Local>) -> String {
    format!("{} {}", at.format(DATE_FORMAT), at.format(TIME_FORMAT))
}
