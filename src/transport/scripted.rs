//! In-memory transport with scripted outcomes
//!
//! Used for dry runs and tests: every command passes unless its text was
//! registered as failing, and everything sent is recorded in order.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::common::{Error, Result};
use crate::definition::Command;

use super::{CommandOutcome, Directive, Transport, TransportStatus};

/// Transport that never leaves the process
pub struct ScriptedTransport {
    failing: Mutex<HashSet<String>>,
    sent: Mutex<Vec<String>>,
    delay: Option<Duration>,
    status_tx: watch::Sender<TransportStatus>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Create a transport whose link still has to be opened
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(TransportStatus::Idle);
        Self {
            failing: Mutex::new(HashSet::new()),
            sent: Mutex::new(Vec::new()),
            delay: None,
            status_tx,
        }
    }

    /// Create a transport with an already open link
    pub fn connected() -> Self {
        let transport = Self::new();
        transport.set_status(TransportStatus::Connected);
        transport
    }

    /// Let every command take this long before its outcome is known
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every command with this exact text fail
    pub fn fail_on(&self, text: &str) {
        self.failing.lock().insert(text.trim().to_string());
    }

    /// Everything sent so far, commands and directives, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Simulate a link status change
    pub fn set_status(&self, status: TransportStatus) {
        self.status_tx.send_replace(status);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self) -> Result<()> {
        self.set_status(TransportStatus::Connected);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.set_status(TransportStatus::Idle);
        Ok(())
    }

    async fn send_command(&self, command: &Command) -> CommandOutcome {
        if self.status() != TransportStatus::Connected {
            return CommandOutcome::failed(Error::NotConnected.to_string());
        }

        self.sent.lock().push(command.text().to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.lock().contains(command.text()) {
            CommandOutcome::failed("scripted failure")
        } else {
            CommandOutcome::passed()
        }
    }

    async fn send_directive(&self, directive: &Directive) -> Result<()> {
        if self.status() != TransportStatus::Connected {
            return Err(Error::NotConnected);
        }
        self.sent.lock().push(directive.to_string());
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        *self.status_tx.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<TransportStatus> {
        self.status_tx.subscribe()
    }
}
