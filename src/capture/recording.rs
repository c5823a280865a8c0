//! Capture relay that keeps emitted values in memory

use parking_lot::Mutex;
use tokio::sync::watch;

use super::{CaptureRelay, CaptureStatus, Severity};

/// One emitted value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedValue {
    pub args: Vec<String>,
    pub severity: Severity,
}

impl EmittedValue {
    /// First argument, the label of the value
    pub fn label(&self) -> &str {
        self.args.first().map(String::as_str).unwrap_or("")
    }
}

/// Relay recording every emitted value, for dry runs and tests
pub struct RecordingCapture {
    values: Mutex<Vec<EmittedValue>>,
    status_tx: watch::Sender<CaptureStatus>,
}

impl Default for RecordingCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingCapture {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(CaptureStatus::Connected);
        Self {
            values: Mutex::new(Vec::new()),
            status_tx,
        }
    }

    pub fn values(&self) -> Vec<EmittedValue> {
        self.values.lock().clone()
    }

    /// Labels of all emitted values, in order
    pub fn labels(&self) -> Vec<String> {
        self.values
            .lock()
            .iter()
            .map(|v| v.label().to_string())
            .collect()
    }

    pub fn set_status(&self, status: CaptureStatus) {
        self.status_tx.send_replace(status);
    }
}

impl CaptureRelay for RecordingCapture {
    fn emit(&self, args: &[&str], severity: Severity) {
        self.values.lock().push(EmittedValue {
            args: args.iter().map(|a| a.to_string()).collect(),
            severity,
        });
    }

    fn status(&self) -> CaptureStatus {
        *self.status_tx.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<CaptureStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_in_order() {
        let capture = RecordingCapture::new();
        capture.emit_value2("test start", "T1", Severity::Info);
        capture.emit_value3("test step", "0", "power on", Severity::Info);
        capture.emit_value("test stopped", Severity::Fatal);

        assert_eq!(capture.labels(), vec!["test start", "test step", "test stopped"]);
        let values = capture.values();
        assert_eq!(values[1].args, vec!["test step", "0", "power on"]);
        assert_eq!(values[2].severity, Severity::Fatal);
    }
}
