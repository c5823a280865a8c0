//! Command lines of a test
//!
//! A command keeps the literal line it was parsed from; reports and the
//! wire protocol use that text unchanged.

use std::fmt;
use std::time::Duration;

use crate::common::{Error, Result};

/// Verbs whose reply from the robot endpoint is a verdict on ECU output
const ASSERTION_VERBS: &[&str] = &["find", "expect", "compare", "check"];

/// What a command line does when executed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    /// Pause the test locally
    Wait(Duration),
    /// Flag a position in the capture stream
    Marker(Option<String>),
    /// Check ECU output through the robot endpoint
    Assertion { verb: String, args: Vec<String> },
    /// Any other protocol action forwarded to the robot endpoint
    Action { verb: String, args: Vec<String> },
}

/// A single instruction line of a test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    text: String,
    kind: CommandKind,
}

impl Command {
    /// Literal text of the command as written in the definition file
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    /// The verb of the command line (`wait`, `marker`, `find`, ...)
    pub fn verb(&self) -> &str {
        match &self.kind {
            CommandKind::Wait(_) => "wait",
            CommandKind::Marker(_) => "marker",
            CommandKind::Assertion { verb, .. } | CommandKind::Action { verb, .. } => verb,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        parse_command(s)
    }
}

/// Parse a command line into a Command
pub fn parse_command(line: &str) -> Result<Command> {
    let text = line.trim();
    let parts: Vec<&str> = text.split_whitespace().collect();
    if parts.is_empty() {
        return Err(Error::invalid_command(line, "empty command"));
    }
    if text.starts_with('#') {
        return Err(Error::invalid_command(line, "comments are not commands"));
    }

    let verb = parts[0].to_lowercase();
    let args = &parts[1..];

    let kind = match verb.as_str() {
        "wait" => {
            if args.len() != 1 {
                return Err(Error::invalid_command(
                    line,
                    "wait requires exactly one duration in milliseconds",
                ));
            }
            let ms: u64 = args[0].parse().map_err(|_| {
                Error::invalid_command(line, format!("invalid wait duration: {}", args[0]))
            })?;
            CommandKind::Wait(Duration::from_millis(ms))
        }

        "marker" => {
            if args.is_empty() {
                CommandKind::Marker(None)
            } else {
                CommandKind::Marker(Some(args.join(" ")))
            }
        }

        v if ASSERTION_VERBS.contains(&v) => {
            if args.is_empty() {
                return Err(Error::invalid_command(
                    line,
                    format!("{} requires arguments", v),
                ));
            }
            CommandKind::Assertion {
                verb,
                args: args.iter().map(|a| a.to_string()).collect(),
            }
        }

        _ => CommandKind::Action {
            verb,
            args: args.iter().map(|a| a.to_string()).collect(),
        },
    };

    Ok(Command {
        text: text.to_string(),
        kind,
    })
}
