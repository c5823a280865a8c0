//! TCP client towards the robot endpoint

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};

use crate::common::{Error, Result};
use crate::definition::Command;

use super::codec;
use super::{CommandOutcome, Directive, Transport, TransportSettings, TransportStatus};

/// An established link
struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

impl Connection {
    async fn request(&mut self, line: &str) -> Result<String> {
        codec::write_line(&mut self.writer, line).await?;
        codec::read_line(&mut self.reader).await
    }
}

/// Transport speaking the robot line protocol over TCP
pub struct TcpTransport {
    settings: TransportSettings,
    /// Active link; commands hold the lock for their whole round trip
    conn: Mutex<Option<Connection>>,
    status_tx: watch::Sender<TransportStatus>,
}

impl TcpTransport {
    pub fn new(settings: TransportSettings) -> Self {
        let (status_tx, _) = watch::channel(TransportStatus::Idle);
        Self {
            settings,
            conn: Mutex::new(None),
            status_tx,
        }
    }

    pub fn settings(&self) -> &TransportSettings {
        &self.settings
    }

    fn set_status(&self, status: TransportStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Transport status changed");
        }
    }

    /// Open a new connection, updating the status
    async fn establish(&self) -> Result<Connection> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        self.set_status(TransportStatus::Connecting);
        tracing::info!(%addr, "Connecting to robot endpoint");

        let timeout = Duration::from_millis(self.settings.connect_timeout_ms);
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.set_status(TransportStatus::Error);
                tracing::warn!(%addr, error = %e, "Connection to robot endpoint failed");
                return Err(Error::Transport(format!("Failed to connect to {}: {}", addr, e)));
            }
            Err(_) => {
                self.set_status(TransportStatus::Error);
                tracing::warn!(%addr, "Connection to robot endpoint timed out");
                return Err(Error::Timeout(self.settings.connect_timeout_ms));
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        self.set_status(TransportStatus::Connected);
        tracing::info!(%addr, "Connected to robot endpoint");

        Ok(Connection {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        })
    }

    /// Drop a broken link
    fn lose(&self, conn: &mut Option<Connection>, error: &Error) {
        if conn.take().is_some() {
            tracing::warn!(error = %error, "Lost link to robot endpoint");
        }
        self.set_status(TransportStatus::Disconnected);
    }

    /// Return the active connection, reconnecting once if allowed
    async fn ensure_connected<'a>(
        &self,
        conn: &'a mut Option<Connection>,
    ) -> Result<&'a mut Connection> {
        if conn.is_none() && self.settings.auto_reconnect && self.status() != TransportStatus::Idle
        {
            *conn = Some(self.establish().await?);
        }
        conn.as_mut().ok_or(Error::NotConnected)
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if conn.is_some() {
            return Ok(());
        }
        *conn = Some(self.establish().await?);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        if conn.take().is_some() {
            tracing::info!("Closed link to robot endpoint");
        }
        self.set_status(TransportStatus::Idle);
        Ok(())
    }

    async fn send_command(&self, command: &Command) -> CommandOutcome {
        let mut guard = self.conn.lock().await;
        let conn = match self.ensure_connected(&mut guard).await {
            Ok(conn) => conn,
            Err(e) => return CommandOutcome::failed(e.to_string()),
        };

        tracing::debug!(command = %command, "Robot >>>");
        let timeout = Duration::from_millis(self.settings.command_timeout_ms);
        let result = match tokio::time::timeout(timeout, conn.request(command.text())).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.settings.command_timeout_ms)),
        };

        match result {
            Ok(reply) => {
                tracing::debug!(%reply, "Robot <<<");
                CommandOutcome::from_reply(command.verb(), &reply)
            }
            Err(e) => {
                // A late reply would be read as the answer to the next command
                self.lose(&mut guard, &e);
                CommandOutcome::failed(e.to_string())
            }
        }
    }

    async fn send_directive(&self, directive: &Directive) -> Result<()> {
        let mut guard = self.conn.lock().await;
        let conn = self.ensure_connected(&mut guard).await?;
        let line = directive.to_string();

        tracing::debug!(directive = %line, "Robot >>>");
        let written = codec::write_line(&mut conn.writer, &line).await;
        if let Err(e) = written {
            self.lose(&mut guard, &e);
            return Err(e);
        }
        Ok(())
    }

    fn status(&self) -> TransportStatus {
        *self.status_tx.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<TransportStatus> {
        self.status_tx.subscribe()
    }
}
