//! DLT mini server
//!
//! Trace viewers connect to the relay and receive every emitted value as a
//! DLT log message. Values emitted while nobody is connected are dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::{CaptureRelay, CaptureSettings, CaptureStatus, DltEncoder, Severity};

/// State shared with the accept loop and client tasks
struct Shared {
    clients: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    status_tx: watch::Sender<CaptureStatus>,
}

impl Shared {
    fn set_status(&self, status: CaptureStatus) {
        let previous = self.status_tx.send_replace(status);
        if previous != status {
            tracing::debug!(from = %previous, to = %status, "Capture status changed");
        }
    }

    /// Drop finished clients and derive the status from the remaining ones
    fn refresh(&self) {
        let connected = {
            let mut clients = self.clients.lock();
            clients.retain(|c| !c.is_closed());
            !clients.is_empty()
        };
        match (*self.status_tx.borrow(), connected) {
            (CaptureStatus::Listening, true) => {}
            (CaptureStatus::Connected, false) => {}
            _ => return,
        }
        self.set_status(if connected {
            CaptureStatus::Connected
        } else {
            CaptureStatus::Listening
        });
    }
}

/// Capture relay serving DLT messages over TCP
pub struct TcpCaptureRelay {
    settings: CaptureSettings,
    encoder: Mutex<DltEncoder>,
    shared: Arc<Shared>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpCaptureRelay {
    pub fn new(settings: CaptureSettings) -> Self {
        let encoder = DltEncoder::new(&settings.ecu_id, &settings.app_id, &settings.context_id);
        let (status_tx, _) = watch::channel(CaptureStatus::Idle);

        Self {
            settings,
            encoder: Mutex::new(encoder),
            shared: Arc::new(Shared {
                clients: Mutex::new(Vec::new()),
                status_tx,
            }),
            accept_task: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Start listening for trace viewers, returns the bound address
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.accept_task.lock().is_some() {
            return Err(Error::Capture("relay already listening".to_string()));
        }

        let addr = format!("{}:{}", self.settings.bind_address, self.settings.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.shared.set_status(CaptureStatus::Error);
                return Err(Error::Capture(format!("Failed to listen on {}: {}", addr, e)));
            }
        };
        let local = listener.local_addr()?;
        tracing::info!(addr = %local, "Capture relay listening");
        self.shared.set_status(CaptureStatus::Listening);

        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(accept_loop(listener, shared));
        *self.accept_task.lock() = Some(handle);

        Ok(local)
    }

    /// Stop listening and disconnect all viewers
    pub fn stop(&self) {
        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
            tracing::info!("Capture relay stopped");
        }
        self.shared.clients.lock().clear();
        self.shared.set_status(CaptureStatus::Idle);
    }
}

impl Drop for TcpCaptureRelay {
    fn drop(&mut self) {
        if let Some(handle) = self.accept_task.lock().take() {
            handle.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::info!(%peer, "Trace viewer connected");
                let (tx, rx) = mpsc::unbounded_channel();
                shared.clients.lock().push(tx);
                shared.refresh();
                tokio::spawn(serve_client(stream, rx, Arc::clone(&shared)));
            }
            Err(e) => {
                tracing::error!("Capture accept error: {}", e);
                shared.set_status(CaptureStatus::Error);
                break;
            }
        }
    }
}

async fn serve_client(
    stream: TcpStream,
    mut rx: mpsc::UnboundedReceiver<Vec<u8>>,
    shared: Arc<Shared>,
) {
    let peer = stream.peer_addr().ok();
    let (mut reader, mut writer) = stream.into_split();
    let mut discard = [0u8; 1024];

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).await {
                        tracing::debug!(?peer, error = %e, "Write to trace viewer failed");
                        break;
                    }
                }
                None => break,
            },
            // Viewers may send control messages; they are not interpreted
            read = reader.read(&mut discard) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
        }
    }

    drop(rx);
    tracing::info!(?peer, "Trace viewer disconnected");
    shared.refresh();
}

impl CaptureRelay for TcpCaptureRelay {
    fn emit(&self, args: &[&str], severity: Severity) {
        let mut clients = self.shared.clients.lock();
        if clients.is_empty() {
            tracing::trace!(?args, "No trace viewer connected, value dropped");
            return;
        }

        let bytes = self.encoder.lock().encode(args, severity);
        clients.retain(|client| client.send(bytes.clone()).is_ok());
    }

    fn status(&self) -> CaptureStatus {
        *self.shared.status_tx.borrow()
    }

    fn subscribe_status(&self) -> watch::Receiver<CaptureStatus> {
        self.shared.status_tx.subscribe()
    }
}
