//! Link to the test robot endpoint driving the ECUs
//!
//! The sequencer only sees the [`Transport`] trait. Commands are blocking
//! calls without retries on the sequencer side; whatever goes wrong on the
//! link is reported as a failed [`CommandOutcome`], never as an error.

mod codec;
mod scripted;
mod tcp;

pub use codec::{read_line, write_line};
pub use scripted::ScriptedTransport;
pub use tcp::TcpTransport;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::common::Result;
use crate::definition::Command;

/// Link status of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Link not started
    #[default]
    Idle,
    /// Connection attempt in progress
    Connecting,
    Connected,
    /// Link was up and got lost
    Disconnected,
    /// Connection attempt failed
    Error,
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// ECUs addressed by a connect or disconnect request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Targets {
    All,
    Ecus(Vec<String>),
}

impl Targets {
    /// Build targets from a configured ECU list, empty meaning all
    pub fn from_list(ecus: &[String]) -> Self {
        if ecus.is_empty() {
            Self::All
        } else {
            Self::Ecus(ecus.to_vec())
        }
    }

    /// Directives that connect these targets
    pub fn connect_directives(&self) -> Vec<Directive> {
        match self {
            Self::All => vec![Directive::ConnectAllEcu],
            Self::Ecus(ids) => ids.iter().cloned().map(Directive::ConnectEcu).collect(),
        }
    }

    /// Directives that disconnect these targets
    pub fn disconnect_directives(&self) -> Vec<Directive> {
        match self {
            Self::All => vec![Directive::DisconnectAllEcu],
            Self::Ecus(ids) => ids.iter().cloned().map(Directive::DisconnectEcu).collect(),
        }
    }
}

/// Out-of-band instruction for the robot endpoint, not a test command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    /// Start writing a new capture file
    NewFile(PathBuf),
    /// Close the current capture file
    ClearFile,
    ConnectAllEcu,
    DisconnectAllEcu,
    ConnectEcu(String),
    DisconnectEcu(String),
    /// Insert a marker into the capture
    Marker,
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NewFile(path) => write!(f, "newFile {}", path.display()),
            Self::ClearFile => write!(f, "clearFile"),
            Self::ConnectAllEcu => write!(f, "connectAllEcu"),
            Self::DisconnectAllEcu => write!(f, "disconnectAllEcu"),
            Self::ConnectEcu(id) => write!(f, "connectEcu {}", id),
            Self::DisconnectEcu(id) => write!(f, "disconnectEcu {}", id),
            Self::Marker => write!(f, "marker"),
        }
    }
}

/// Result of executing one command on the robot endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Passed { detail: Option<String> },
    Failed { reason: String },
}

impl CommandOutcome {
    pub fn passed() -> Self {
        Self::Passed { detail: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed {
            reason: reason.into(),
        }
    }

    pub fn is_passed(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    /// Interpret a reply line from the robot endpoint
    ///
    /// Replies echo the verb followed by `success` or `failed` and an
    /// optional detail, e.g. `find success 12:01:03 boot complete`.
    pub fn from_reply(verb: &str, reply: &str) -> Self {
        let mut parts = reply.trim().splitn(3, char::is_whitespace);
        let echoed = parts.next().unwrap_or("");
        let verdict = parts.next().unwrap_or("").to_lowercase();
        let detail = parts
            .next()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());

        if !echoed.eq_ignore_ascii_case(verb) {
            return Self::failed(format!("unexpected reply '{}'", reply.trim()));
        }

        match verdict.as_str() {
            "success" | "ok" => Self::Passed { detail },
            "failed" | "fail" | "error" => Self::Failed {
                reason: detail.unwrap_or_else(|| "failed".to_string()),
            },
            _ => Self::failed(format!("unexpected reply '{}'", reply.trim())),
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Passed { detail: Some(d) } => write!(f, "passed ({})", d),
            Self::Passed { detail: None } => write!(f, "passed"),
            Self::Failed { reason } => write!(f, "failed ({})", reason),
        }
    }
}

/// Transport settings, part of the settings document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportSettings {
    /// Robot endpoint host
    #[serde(default = "default_host")]
    pub host: String,

    /// Robot endpoint port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Timeout for the connection attempt
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Timeout for a single command reply
    #[serde(default = "default_command_timeout")]
    pub command_timeout_ms: u64,

    /// Reopen a lost link once before failing a command
    #[serde(default = "default_auto_reconnect")]
    pub auto_reconnect: bool,

    /// ECUs to connect for a run, empty means all
    #[serde(default)]
    pub targets: Vec<String>,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            command_timeout_ms: default_command_timeout(),
            auto_reconnect: default_auto_reconnect(),
            targets: Vec::new(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    4490
}
fn default_connect_timeout() -> u64 {
    5_000
}
fn default_command_timeout() -> u64 {
    30_000
}
fn default_auto_reconnect() -> bool {
    true
}

/// Link to the ECUs as seen by the sequencer
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start the link to the robot endpoint
    async fn open(&self) -> Result<()>;

    /// Stop the link
    async fn close(&self) -> Result<()>;

    /// Connect the given ECUs
    async fn connect(&self, targets: &Targets) -> Result<()> {
        for directive in targets.connect_directives() {
            self.send_directive(&directive).await?;
        }
        Ok(())
    }

    /// Disconnect the given ECUs
    async fn disconnect(&self, targets: &Targets) -> Result<()> {
        for directive in targets.disconnect_directives() {
            self.send_directive(&directive).await?;
        }
        Ok(())
    }

    /// Execute one command and wait for its outcome
    ///
    /// Transport faults are folded into [`CommandOutcome::Failed`].
    async fn send_command(&self, command: &Command) -> CommandOutcome;

    /// Send a directive without waiting for a reply
    async fn send_directive(&self, directive: &Directive) -> Result<()>;

    fn status(&self) -> TransportStatus;

    fn subscribe_status(&self) -> watch::Receiver<TransportStatus>;
}
