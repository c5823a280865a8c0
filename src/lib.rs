//! DLT Test Robot
//!
//! Sequencing engine for scripted test suites against ECUs speaking the DLT
//! protocol, together with its robot endpoint transport, DLT capture relay
//! and report writer.

pub mod capture;
pub mod cli;
pub mod commands;
pub mod common;
pub mod definition;
pub mod engine;
pub mod report;
pub mod settings;
pub mod transport;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use engine::{Progress, ProgressKind, RunRequest, Sequencer};
