//! Progress events and run phases
//!
//! A [`Progress`] is an immutable snapshot produced once per transition of
//! the sequencer. Observers receive their own copy.

use std::fmt;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;

/// Kind of transition a progress event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressKind {
    /// A test iteration entered Prerun
    Started,
    /// A command finished
    Step,
    EndSuccess,
    EndFailed,
    /// All suite repeats are done
    SuiteEnd,
    /// The run was cancelled
    Stopped,
}

impl ProgressKind {
    /// Whether the run is over after this event
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::SuiteEnd | Self::Stopped)
    }
}

impl fmt::Display for ProgressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => write!(f, "started"),
            Self::Step => write!(f, "step"),
            Self::EndSuccess => write!(f, "end success"),
            Self::EndFailed => write!(f, "failed"),
            Self::SuiteEnd => write!(f, "end"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Cumulative counters of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    /// Test iterations that passed
    pub success: u32,
    /// Test iterations that failed
    pub failed: u32,
    /// Individual command failures
    pub failed_commands: u32,
}

/// Snapshot of a run at one transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub suite_repeat_idx: u32,
    pub suite_repeat_total: u32,
    pub test_repeat_idx: u32,
    pub test_repeat_total: u32,
    /// Index of the test within the loaded suite
    pub test_index: usize,
    pub test_id: String,
    pub command_idx: usize,
    pub command_total: usize,
    pub kind: ProgressKind,
    /// Command text for steps, description or reason otherwise
    pub text: String,
    /// Set on failed steps and failed test ends
    pub failed: bool,
    pub counters: Counters,
}

/// Phase of the sequencer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    #[default]
    Idle,
    Prerun,
    Running,
    Postrun,
    Finished,
    Stopped,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Prerun => write!(f, "prerun"),
            Self::Running => write!(f, "running"),
            Self::Postrun => write!(f, "postrun"),
            Self::Finished => write!(f, "finished"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

/// Fan-out of progress events to every subscriber, in emission order
#[derive(Default)]
pub(crate) struct Subscribers {
    senders: Mutex<Vec<mpsc::UnboundedSender<Progress>>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Progress> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().push(tx);
        rx
    }

    /// Deliver to all live subscribers, forgetting the ones that went away
    pub(crate) fn publish(&self, progress: &Progress) {
        self.senders
            .lock()
            .retain(|tx| tx.send(progress.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.senders.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ProgressKind) -> Progress {
        Progress {
            suite_repeat_idx: 0,
            suite_repeat_total: 1,
            test_repeat_idx: 0,
            test_repeat_total: 1,
            test_index: 0,
            test_id: "T1".to_string(),
            command_idx: 0,
            command_total: 1,
            kind,
            text: String::new(),
            failed: false,
            counters: Counters::default(),
        }
    }

    #[test]
    fn test_publish_reaches_all_and_prunes_dropped() {
        let subscribers = Subscribers::default();
        let mut a = subscribers.subscribe();
        let b = subscribers.subscribe();
        drop(b);

        subscribers.publish(&sample(ProgressKind::Started));
        subscribers.publish(&sample(ProgressKind::Step));

        assert_eq!(subscribers.len(), 1);
        assert_eq!(a.try_recv().unwrap().kind, ProgressKind::Started);
        assert_eq!(a.try_recv().unwrap().kind, ProgressKind::Step);
    }

    #[test]
    fn test_progress_serializes_kind_in_snake_case() {
        let json = serde_json::to_value(sample(ProgressKind::EndSuccess)).unwrap();
        assert_eq!(json["kind"], "end_success");
        assert_eq!(json["counters"]["failed_commands"], 0);
    }
}
