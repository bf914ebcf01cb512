//! Virtual serial transport
//!
//! Looks like a serial port to the host: bytes go in with `write`, reply
//! lines come out with `readline`. A worker thread per session answers one
//! command at a time while the mirror pushes unsolicited lines into the same
//! outbound queue.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bambulink_core::{DeviceStateMirror, SubscriptionId, TransportError};
use parking_lot::Mutex;

use super::queue::Popped;
use super::session::{run_session, SerialSession, SessionChannels, SessionConfig, SessionState};
use crate::device::{DeviceLink, PrinterCommand};
use crate::firmware::marlin::stage_transition_lines;
use crate::upload::RemoteStorage;

/// Log target for serial traffic
pub const SERIAL_LOG_TARGET: &str = "bambulink::serial";

/// Result of a `readline` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// One line, including its `\n` terminator
    Line(Vec<u8>),
    /// Nothing to read before the timeout
    Timeout,
}

impl ReadOutcome {
    /// Line contents without terminator, if any
    pub fn text(&self) -> Option<String> {
        match self {
            Self::Line(bytes) => Some(String::from_utf8_lossy(bytes).trim_end().to_string()),
            Self::Timeout => None,
        }
    }
}

struct Inner {
    config: SessionConfig,
    channels: Arc<SessionChannels>,
    mirror: Arc<DeviceStateMirror>,
    partial: Mutex<Vec<u8>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    listener: Mutex<Option<SubscriptionId>>,
}

impl Inner {
    fn shutdown(&self) {
        {
            let mut state = self.channels.state.lock();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        self.channels.inbound.close();
        self.channels.outbound.close();

        if let Some(id) = self.listener.lock().take() {
            self.mirror.unsubscribe(id);
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!("Session worker panicked");
            }
        }
        tracing::info!("Virtual serial port closed");
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Host-side handle to an open virtual serial port
///
/// Clones share the same session.
#[derive(Clone)]
pub struct VirtualSerial {
    inner: Arc<Inner>,
}

impl VirtualSerial {
    /// Open a session against a printer link
    ///
    /// Starts the session worker, subscribes to mirror changes for
    /// unsolicited lines, and asks the printer for a full status push.
    pub fn open(
        config: SessionConfig,
        link: Arc<dyn DeviceLink>,
        mirror: Arc<DeviceStateMirror>,
        storage: Arc<dyn RemoteStorage>,
    ) -> Result<Self, TransportError> {
        let channels = Arc::new(SessionChannels::new());

        let session = SerialSession::new(
            config.clone(),
            Arc::clone(&link),
            Arc::clone(&mirror),
            storage,
        );
        let worker_channels = Arc::clone(&channels);
        let worker = std::thread::Builder::new()
            .name("bambulink-session".to_string())
            .spawn(move || run_session(session, worker_channels))
            .map_err(|e| TransportError::WorkerSpawn {
                reason: e.to_string(),
            })?;

        let listener_channels = Arc::clone(&channels);
        let listener = mirror.subscribe(move |previous, current| {
            let lines = stage_transition_lines(previous, current);
            if !lines.is_empty() {
                listener_channels.outbound.push_batch(lines);
            }
        });

        if let Err(e) = link.send_command(&PrinterCommand::PushAll) {
            tracing::debug!("Initial status request not sent: {}", e);
        }

        tracing::info!(
            "Virtual serial port opened ({} baud, read timeout {:?})",
            config.baud_rate,
            config.read_timeout
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                channels,
                mirror,
                partial: Mutex::new(Vec::new()),
                worker: Mutex::new(Some(worker)),
                listener: Mutex::new(Some(listener)),
            }),
        })
    }

    /// Write host bytes
    ///
    /// Bytes are buffered until a `\n` or `\r`; each complete line is queued
    /// for the worker. Returns the number of bytes accepted.
    pub fn write(&self, bytes: &[u8]) -> Result<usize, TransportError> {
        match self.state() {
            SessionState::Closed => return Err(TransportError::PortClosed),
            SessionState::Killed => return Err(TransportError::Halted),
            _ => {}
        }

        let mut lines = Vec::new();
        {
            let mut partial = self.inner.partial.lock();
            for &byte in bytes {
                if byte == b'\n' || byte == b'\r' {
                    if !partial.is_empty() {
                        lines.push(String::from_utf8_lossy(&partial).into_owned());
                        partial.clear();
                    }
                } else {
                    partial.push(byte);
                }
            }
        }

        for line in &lines {
            tracing::debug!(target: SERIAL_LOG_TARGET, "<<< {}", line);
        }
        if !lines.is_empty() && !self.inner.channels.inbound.push_batch(lines) {
            return Err(match self.state() {
                SessionState::Killed => TransportError::Halted,
                _ => TransportError::PortClosed,
            });
        }
        Ok(bytes.len())
    }

    /// Read the next reply line, waiting up to `timeout`
    ///
    /// Returns [`ReadOutcome::Timeout`] when nothing is pending; that is not
    /// an error.
    pub fn readline(&self, timeout: Duration) -> Result<ReadOutcome, TransportError> {
        if self.state() == SessionState::Closed {
            return Err(TransportError::PortClosed);
        }

        match self.inner.channels.outbound.pop_timeout(timeout) {
            Popped::Item(line) => {
                tracing::debug!(target: SERIAL_LOG_TARGET, ">>> {}", line.text());
                Ok(ReadOutcome::Line(line.to_bytes()))
            }
            Popped::TimedOut => Ok(ReadOutcome::Timeout),
            Popped::Closed => Err(TransportError::PortClosed),
        }
    }

    /// Close the session; later calls are no-ops
    pub fn close(&self) {
        self.inner.shutdown();
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.channels.state()
    }

    /// Whether the port can be written to
    pub fn is_open(&self) -> bool {
        self.state().accepts_writes()
    }

    /// Default read timeout
    pub fn read_timeout(&self) -> Duration {
        self.inner.config.read_timeout
    }

    /// Baud rate the host asked for
    pub fn baud_rate(&self) -> u32 {
        self.inner.config.baud_rate
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for VirtualSerial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VirtualSerial")
            .field("state", &self.state())
            .field("baud_rate", &self.baud_rate())
            .finish()
    }
}
