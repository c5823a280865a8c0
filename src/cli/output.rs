//! Console rendering of progress events

use colored::Colorize;

use crate::definition::TestSuite;
use crate::engine::{Progress, ProgressKind};

/// Prints progress events either human readable or as JSON lines
pub struct ProgressPrinter {
    json: bool,
}

impl ProgressPrinter {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    pub fn print(&self, progress: &Progress) {
        if self.json {
            match serde_json::to_string(progress) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!("Failed to serialize progress: {}", e),
            }
            return;
        }

        match progress.kind {
            ProgressKind::Started => {
                let mut header = format!(
                    "{} {} ({}/{})",
                    "▶".cyan(),
                    progress.test_id.bold(),
                    progress.test_repeat_idx + 1,
                    progress.test_repeat_total
                );
                if progress.suite_repeat_total > 1 {
                    header.push_str(&format!(
                        " suite {}/{}",
                        progress.suite_repeat_idx + 1,
                        progress.suite_repeat_total
                    ));
                }
                println!("\n{}", header);
                if !progress.text.is_empty() {
                    println!("  {}", progress.text.dimmed());
                }
            }
            ProgressKind::Step => {
                let position = format!("[{}/{}]", progress.command_idx + 1, progress.command_total);
                if progress.failed {
                    println!("  {} {} {}", "✗".red(), position.dimmed(), progress.text.red());
                } else {
                    println!("  {} {} {}", "✓".green(), position.dimmed(), progress.text);
                }
            }
            ProgressKind::EndSuccess => {
                println!("  {} {}", "✓".green().bold(), "Test Passed".green().bold());
            }
            ProgressKind::EndFailed => {
                println!(
                    "  {} {} {}",
                    "✗".red().bold(),
                    "Test Failed".red().bold(),
                    progress.text.dimmed()
                );
            }
            ProgressKind::SuiteEnd => self.print_summary(progress, "Tests finished".green()),
            ProgressKind::Stopped => self.print_summary(progress, "Tests stopped".yellow()),
        }
    }

    fn print_summary(&self, progress: &Progress, title: colored::ColoredString) {
        let counters = &progress.counters;
        println!("\n{}", title.bold());
        println!("  Success tests:        {}", counters.success.to_string().green());
        let failed = counters.failed.to_string();
        let failed_commands = counters.failed_commands.to_string();
        if counters.failed > 0 || counters.failed_commands > 0 {
            println!("  Failed tests:         {}", failed.red());
            println!("  Failed test commands: {}", failed_commands.red());
        } else {
            println!("  Failed tests:         {}", failed);
            println!("  Failed test commands: {}", failed_commands);
        }
    }
}

/// Print the tests of a suite, one line each
pub fn print_suite(suite: &TestSuite) {
    if let Some(source) = suite.source() {
        println!("{} {}", "Test File:".cyan(), source.display());
    }
    if !suite.version().is_empty() {
        println!("{} {}", "Version:".cyan(), suite.version());
    }

    for (index, test) in suite.tests().iter().enumerate() {
        let mut line = format!("{:>3}  {}  {} commands", index, test.id.bold(), test.size());
        if !test.description.is_empty() {
            line.push_str(&format!(" ({})", test.description.dimmed()));
        }
        if !test.requires.is_empty() {
            let requires: Vec<String> = test.requires.iter().map(|r| r.to_string()).collect();
            line.push_str(&format!(" requires {}", requires.join(", ")));
        }
        println!("{}", line);
    }
}
