//! Shared fixtures for communication integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use bambulink_communication::device::{DeviceLink, PrinterCommand, StateEventHandler, StateEventHub};
use bambulink_communication::upload::LocalDirStorage;
use bambulink_communication::{ReadOutcome, SessionConfig, VirtualSerial};
use bambulink_core::{DeviceStateMirror, LinkError, StateEvent, SubscriptionId};
use parking_lot::Mutex;

pub const HALT_LINE: &str = "Error:Printer halted. kill() called!";

/// Device link that records commands and lets tests push state events
#[derive(Default)]
pub struct RecordingLink {
    sent: Mutex<Vec<PrinterCommand>>,
    offline: Mutex<bool>,
    events: StateEventHub,
}

impl RecordingLink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<PrinterCommand> {
        self.sent.lock().clone()
    }

    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    pub fn push(&self, event: StateEvent) {
        self.events.emit(event);
    }
}

impl DeviceLink for RecordingLink {
    fn send_command(&self, command: &PrinterCommand) -> Result<(), LinkError> {
        if *self.offline.lock() {
            return Err(LinkError::NotConnected);
        }
        self.sent.lock().push(command.clone());
        Ok(())
    }

    fn subscribe(&self, handler: StateEventHandler) -> SubscriptionId {
        self.events.subscribe(handler)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }

    fn is_connected(&self) -> bool {
        !*self.offline.lock()
    }
}

/// An open port wired to a recording link and a temporary SD card
pub struct Harness {
    pub serial: VirtualSerial,
    pub link: Arc<RecordingLink>,
    pub mirror: Arc<DeviceStateMirror>,
    pub card: tempfile::TempDir,
}

impl Harness {
    pub fn open() -> Self {
        Self::open_with(SessionConfig::default())
    }

    pub fn open_with(config: SessionConfig) -> Self {
        let card = tempfile::tempdir().unwrap();
        let link = RecordingLink::new();
        let mirror = Arc::new(DeviceStateMirror::new());

        let feed = Arc::clone(&mirror);
        link.subscribe(Box::new(move |event| feed.update(&event)));

        let storage = Arc::new(LocalDirStorage::new(card.path()).unwrap());
        let serial =
            VirtualSerial::open(config, link.clone(), Arc::clone(&mirror), storage).unwrap();

        Self {
            serial,
            link,
            mirror,
            card,
        }
    }

    pub fn send(&self, line: &str) {
        self.serial
            .write(format!("{}\n", line).as_bytes())
            .unwrap();
    }

    pub fn read(&self) -> Option<String> {
        self.serial
            .readline(Duration::from_secs(2))
            .unwrap()
            .text()
    }

    /// Read lines up to and including the terminal `ok` (or the halt error)
    pub fn reply(&self) -> Vec<String> {
        let mut lines = Vec::new();
        while let ReadOutcome::Line(bytes) = self.serial.readline(Duration::from_secs(2)).unwrap() {
            let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
            let done = line.starts_with("ok") || line == HALT_LINE;
            lines.push(line);
            if done {
                break;
            }
        }
        lines
    }

    /// Wait until nothing else is readable
    pub fn assert_quiet(&self) {
        assert_eq!(
            self.serial.readline(Duration::from_millis(300)).unwrap(),
            ReadOutcome::Timeout
        );
    }
}
