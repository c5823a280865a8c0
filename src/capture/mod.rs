//! Capture relay: marker values on the outbound trace channel
//!
//! The sequencer flags suite, test and step boundaries by emitting short
//! DLT log messages. Emission is fire-and-forget; a relay never reports
//! delivery problems back to the sequencer.

mod dlt;
mod recording;
mod server;

pub use dlt::DltEncoder;
pub use recording::{EmittedValue, RecordingCapture};
pub use server::TcpCaptureRelay;

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Log level of an emitted value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    Fatal,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Verbose,
}

impl Severity {
    /// Numeric DLT log level
    pub fn dlt_level(self) -> u8 {
        match self {
            Self::Fatal => 1,
            Self::Error => 2,
            Self::Warn => 3,
            Self::Info => 4,
            Self::Debug => 5,
            Self::Verbose => 6,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal => write!(f, "fatal"),
            Self::Error => write!(f, "error"),
            Self::Warn => write!(f, "warn"),
            Self::Info => write!(f, "info"),
            Self::Debug => write!(f, "debug"),
            Self::Verbose => write!(f, "verbose"),
        }
    }
}

/// Status of a capture relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureStatus {
    #[default]
    Idle,
    /// Waiting for a trace viewer to connect
    Listening,
    /// At least one trace viewer connected
    Connected,
    Error,
}

impl fmt::Display for CaptureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Connected => write!(f, "connected"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Capture relay settings, part of the settings document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    /// Address the relay listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Port the relay listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// ECU id written into every message
    #[serde(default = "default_ecu_id")]
    pub ecu_id: String,

    /// Application id written into every message
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Context id written into every message
    #[serde(default = "default_context_id")]
    pub context_id: String,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            ecu_id: default_ecu_id(),
            app_id: default_app_id(),
            context_id: default_context_id(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    3490
}
fn default_ecu_id() -> String {
    "ROBO".to_string()
}
fn default_app_id() -> String {
    "TROB".to_string()
}
fn default_context_id() -> String {
    "TEST".to_string()
}

/// Outbound trace channel as seen by the sequencer
pub trait CaptureRelay: Send + Sync {
    /// Emit one log message made of the given string arguments
    fn emit(&self, args: &[&str], severity: Severity);

    fn emit_value(&self, text: &str, severity: Severity) {
        self.emit(&[text], severity);
    }

    fn emit_value2(&self, label: &str, detail: &str, severity: Severity) {
        self.emit(&[label, detail], severity);
    }

    fn emit_value3(&self, label: &str, detail: &str, extra: &str, severity: Severity) {
        self.emit(&[label, detail, extra], severity);
    }

    fn status(&self) -> CaptureStatus;

    fn subscribe_status(&self) -> watch::Receiver<CaptureStatus>;
}
