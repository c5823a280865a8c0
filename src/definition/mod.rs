//! Test definitions
//!
//! Parses YAML test definition files into an ordered list of named tests.
//! Parsing is tolerant: a malformed test entry is reported and skipped,
//! the remaining tests still load.

mod command;
mod document;
mod store;

pub use command::{parse_command, Command, CommandKind};
pub use document::Precondition;
pub use store::{join_errors, DefinitionError, Test, TestStore, TestSuite};
