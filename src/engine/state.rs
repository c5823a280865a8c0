//! Run requests and the live state of a run

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};

use crate::common::{Error, Result};
use crate::definition::TestSuite;

use super::progress::{Counters, Progress, ProgressKind};

/// Which tests a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// One test, by index in the loaded suite
    SingleTest(usize),
    AllTests,
}

/// Parameters of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub selection: Selection,
    /// How often the whole selection runs
    pub suite_repeat: u32,
    /// How often each selected test runs in a row
    pub test_repeat: u32,
}

impl RunRequest {
    pub fn all() -> Self {
        Self {
            selection: Selection::AllTests,
            suite_repeat: 1,
            test_repeat: 1,
        }
    }

    pub fn single(index: usize) -> Self {
        Self {
            selection: Selection::SingleTest(index),
            suite_repeat: 1,
            test_repeat: 1,
        }
    }

    pub fn with_suite_repeat(mut self, count: u32) -> Self {
        self.suite_repeat = count;
        self
    }

    pub fn with_test_repeat(mut self, count: u32) -> Self {
        self.test_repeat = count;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.suite_repeat == 0 {
            return Err(Error::InvalidRequest(
                "suite repeat count must be at least 1".to_string(),
            ));
        }
        if self.test_repeat == 0 {
            return Err(Error::InvalidRequest(
                "test repeat count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Indices of the selected tests, empty if nothing can run
    pub(crate) fn resolve(&self, suite: &TestSuite) -> Vec<usize> {
        match self.selection {
            Selection::AllTests => (0..suite.len()).collect(),
            Selection::SingleTest(i) if i < suite.len() => vec![i],
            Selection::SingleTest(_) => Vec::new(),
        }
    }
}

/// Facts about a started run, handed back by `start`
#[derive(Debug, Clone)]
pub struct RunTicket {
    /// Test id for single-test runs, suite base name otherwise
    pub label: String,
    pub started_at: DateTime<Local>,
    /// Capture file requested from the robot endpoint
    pub capture_file: PathBuf,
    /// The test list the run works on
    pub suite: Arc<TestSuite>,
}

/// Mutable state of an in-progress run, owned by the run task
#[derive(Debug)]
pub(crate) struct RunState {
    pub suite_repeat_idx: u32,
    pub suite_repeat_total: u32,
    pub test_index: usize,
    pub test_id: String,
    pub test_repeat_idx: u32,
    pub test_repeat_total: u32,
    pub command_idx: usize,
    pub command_total: usize,
    pub counters: Counters,
}

impl RunState {
    pub fn new(request: &RunRequest) -> Self {
        Self {
            suite_repeat_idx: 0,
            suite_repeat_total: request.suite_repeat,
            test_index: 0,
            test_id: String::new(),
            test_repeat_idx: 0,
            test_repeat_total: request.test_repeat,
            command_idx: 0,
            command_total: 0,
            counters: Counters::default(),
        }
    }

    /// Point the state at a new test iteration
    pub fn begin_test(&mut self, index: usize, id: &str, repeat: u32, command_total: usize) {
        self.test_index = index;
        self.test_id = id.to_string();
        self.test_repeat_idx = repeat;
        self.command_idx = 0;
        self.command_total = command_total;
    }

    pub fn snapshot(&self, kind: ProgressKind, text: &str, failed: bool) -> Progress {
        Progress {
            suite_repeat_idx: self.suite_repeat_idx,
            suite_repeat_total: self.suite_repeat_total,
            test_repeat_idx: self.test_repeat_idx,
            test_repeat_total: self.test_repeat_total,
            test_index: self.test_index,
            test_id: self.test_id.clone(),
            command_idx: self.command_idx,
            command_total: self.command_total,
            kind,
            text: text.to_string(),
            failed,
            counters: self.counters,
        }
    }
}
