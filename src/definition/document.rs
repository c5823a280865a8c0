//! Test definition document types
//!
//! Defines the data structures for deserializing YAML test definition files.
//! Test entries are kept as raw YAML values at document level so that a
//! malformed entry can be reported without rejecting its neighbours.

use serde::Deserialize;
use std::fmt;

/// A complete test definition document
#[derive(Deserialize, Debug)]
pub struct TestDocument {
    /// Version of the test definitions, copied into report headers
    #[serde(default)]
    pub version: Option<serde_yaml::Value>,
    /// One entry per test, validated individually
    pub tests: Vec<serde_yaml::Value>,
}

impl TestDocument {
    /// Version rendered as text; numbers are accepted as well as strings
    pub fn version_text(&self) -> String {
        match &self.version {
            Some(serde_yaml::Value::String(s)) => s.clone(),
            Some(serde_yaml::Value::Number(n)) => n.to_string(),
            Some(serde_yaml::Value::Bool(b)) => b.to_string(),
            _ => String::new(),
        }
    }
}

/// A single test entry
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct TestEntry {
    /// Stable external identifier
    pub id: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Preconditions checked before the first command
    #[serde(default)]
    pub requires: Vec<Precondition>,
    /// The sequence of command lines to execute
    pub commands: Vec<String>,
    /// Command lines executed after the test, outcome is not counted
    #[serde(default)]
    pub teardown: Vec<String>,
}

/// Link state a test needs before it can run
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Precondition {
    /// The robot endpoint link must be connected
    Transport,
    /// A trace viewer must be connected to the capture relay
    Capture,
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Capture => write!(f, "capture"),
        }
    }
}
