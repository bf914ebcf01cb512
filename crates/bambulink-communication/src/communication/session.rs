//! Serial session
//!
//! The state behind one open virtual port. The worker thread owns a
//! [`SerialSession`] and feeds it one inbound line at a time; everything it
//! returns is pushed to the outbound queue as a single batch.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bambulink_core::{DeviceModel, DeviceStateMirror};
use parking_lot::Mutex;

use super::protocol::{Inbound, LineProtocol};
use super::queue::{LineQueue, Popped};
use crate::device::{DeviceLink, PrintOptions, PrinterCommand};
use crate::firmware::marlin::{
    format_number, rejection_reply, sd_progress_report, synthesize, temperature_report,
    translate, Action, DeviceAction, LocalCommand, Outcome, ReplyContext, ResponseLine,
    StateQuery,
};
use crate::upload::{RemoteStorage, SdFile};

/// How often the worker wakes up to check auto reports
const WORKER_TICK: Duration = Duration::from_millis(100);

/// Settings for one virtual serial session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Default timeout for `readline`
    pub read_timeout: Duration,
    /// Baud rate the host asked for; only reported back
    pub baud_rate: u32,
    /// Printer family, shown in M115
    pub model: DeviceModel,
    /// Append the chamber reading to temperature reports
    pub report_chamber: bool,
    /// Options sent with every print start
    pub print_options: PrintOptions,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(2),
            baud_rate: 115_200,
            model: DeviceModel::default(),
            report_chamber: false,
            print_options: PrintOptions::default(),
        }
    }
}

/// Lifecycle of a virtual serial session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not usable; writes fail with "port closed"
    Closed,
    /// Opened, no command received yet
    Open,
    /// A command is being answered
    Processing,
    /// Waiting for the next command
    Idle,
    /// Halted by M112; writes are rejected until reopened
    Killed,
}

impl SessionState {
    /// Whether the session accepts writes
    pub fn accepts_writes(&self) -> bool {
        matches!(self, Self::Open | Self::Processing | Self::Idle)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "Closed"),
            Self::Open => write!(f, "Open"),
            Self::Processing => write!(f, "Processing"),
            Self::Idle => write!(f, "Idle"),
            Self::Killed => write!(f, "Killed"),
        }
    }
}

/// Queues and state shared between the host side and the worker
#[derive(Debug)]
pub struct SessionChannels {
    /// Complete lines written by the host
    pub inbound: LineQueue<String>,
    /// Lines waiting to be read by the host
    pub outbound: LineQueue<ResponseLine>,
    /// Current lifecycle state
    pub state: Mutex<SessionState>,
}

impl SessionChannels {
    /// Open channels in the `Open` state
    pub fn new() -> Self {
        Self {
            inbound: LineQueue::new(),
            outbound: LineQueue::new(),
            state: Mutex::new(SessionState::Open),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        // Closed and Killed are final for the worker
        if state.accepts_writes() {
            *state = next;
        }
    }
}

impl Default for SessionChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic report requested with `M155 S` or `M27 S`
#[derive(Debug, Clone, Copy, Default)]
struct AutoReport {
    interval: Option<Duration>,
    next_due: Option<Instant>,
}

impl AutoReport {
    fn set_interval(&mut self, seconds: u64, now: Instant) {
        if seconds == 0 {
            self.interval = None;
            self.next_due = None;
        } else {
            let interval = Duration::from_secs(seconds);
            // An interval past the end of the clock never fires
            self.next_due = now.checked_add(interval);
            self.interval = self.next_due.map(|_| interval);
        }
    }

    fn take_due(&mut self, now: Instant) -> bool {
        match (self.interval, self.next_due) {
            (Some(interval), Some(due)) if now >= due => {
                self.next_due = now.checked_add(interval);
                true
            }
            _ => false,
        }
    }
}

/// Protocol and SD-card state of one open port
pub struct SerialSession {
    config: SessionConfig,
    link: Arc<dyn DeviceLink>,
    mirror: Arc<DeviceStateMirror>,
    storage: Arc<dyn RemoteStorage>,
    protocol: LineProtocol,
    selected: Option<SdFile>,
    temperature_report: AutoReport,
    sd_report: AutoReport,
    killed: bool,
}

impl SerialSession {
    /// Create a fresh session expecting line `N1`
    pub fn new(
        config: SessionConfig,
        link: Arc<dyn DeviceLink>,
        mirror: Arc<DeviceStateMirror>,
        storage: Arc<dyn RemoteStorage>,
    ) -> Self {
        Self {
            config,
            link,
            mirror,
            storage,
            protocol: LineProtocol::new(),
            selected: None,
            temperature_report: AutoReport::default(),
            sd_report: AutoReport::default(),
            killed: false,
        }
    }

    /// Line numbering state
    pub fn protocol(&self) -> &LineProtocol {
        &self.protocol
    }

    /// File chosen with M23
    pub fn selected_file(&self) -> Option<&SdFile> {
        self.selected.as_ref()
    }

    /// Whether M112 halted the session
    pub fn is_killed(&self) -> bool {
        self.killed
    }

    /// Answer one raw inbound line
    ///
    /// Returns every line of the reply in emission order; empty for
    /// ignored and discarded lines.
    pub fn process_line(&mut self, raw: &str) -> Vec<ResponseLine> {
        match self.protocol.accept(raw) {
            Inbound::Command(envelope) => {
                let state = self.mirror.snapshot();
                let selected_name = self.selected.as_ref().map(|file| file.name.as_str());
                let action = translate(&envelope, &state, selected_name);
                tracing::debug!("{} -> {:?}", envelope.command_line(), action);

                let outcome = self.execute(&action);
                let context = ReplyContext {
                    model: self.config.model,
                    report_chamber: self.config.report_chamber,
                    selected_file: self.selected.as_ref(),
                };
                synthesize(&action, &state, &outcome, &context)
            }
            Inbound::Rejected(rejection) => {
                tracing::debug!("Rejected '{}': {}", raw.trim(), rejection.error);
                rejection_reply(&rejection.error, rejection.resend)
            }
            Inbound::Discarded { .. } | Inbound::Ignored => Vec::new(),
        }
    }

    /// Auto report lines that are due at `now`
    pub fn due_reports(&mut self, now: Instant) -> Vec<ResponseLine> {
        let mut lines = Vec::new();
        if self.temperature_report.take_due(now) {
            let state = self.mirror.snapshot();
            lines.push(ResponseLine::data(temperature_report(
                &state,
                self.config.report_chamber,
            )));
        }
        if self.sd_report.take_due(now) {
            let state = self.mirror.snapshot();
            lines.push(ResponseLine::data(sd_progress_report(
                &state,
                self.selected.as_ref(),
            )));
        }
        lines
    }

    fn execute(&mut self, action: &Action) -> Outcome {
        match action {
            Action::Device(device_action) => self.dispatch(device_action),
            Action::Query(StateQuery::SdListing { .. }) => match self.storage.list_files() {
                Ok(files) => Outcome::Listing(files),
                Err(e) => {
                    tracing::warn!("Failed to list printer storage: {}", e);
                    Outcome::ListingFailed(e.to_string())
                }
            },
            Action::Query(_) => Outcome::Done,
            Action::Local(command) => self.execute_local(command),
            Action::Ack => Outcome::Done,
            Action::Unsupported(code) => {
                tracing::debug!("Acknowledging unsupported command {}", code);
                Outcome::Done
            }
        }
    }

    fn dispatch(&mut self, action: &DeviceAction) -> Outcome {
        let command = match action {
            DeviceAction::SetNozzleTemperature(target) => {
                PrinterCommand::GcodeLine(format!("M104 S{}", format_number(*target)))
            }
            DeviceAction::SetBedTemperature(target) => {
                PrinterCommand::GcodeLine(format!("M140 S{}", format_number(*target)))
            }
            DeviceAction::SetSpeed(level) => PrinterCommand::SetSpeed(*level),
            DeviceAction::StartPrint(filename) => PrinterCommand::PrintFile {
                filename: filename.clone(),
                options: self.config.print_options,
            },
            DeviceAction::Pause => PrinterCommand::Pause,
            DeviceAction::Resume => PrinterCommand::Resume,
            DeviceAction::Stop => PrinterCommand::Stop,
            DeviceAction::EmergencyStop => {
                tracing::warn!("M112 received, stopping printer and halting session");
                self.killed = true;
                PrinterCommand::Stop
            }
            DeviceAction::Gcode(line) => PrinterCommand::GcodeLine(line.clone()),
        };

        match self.link.send_command(&command) {
            Ok(()) => Outcome::Dispatched,
            Err(e) => {
                tracing::warn!("Failed to send {} to printer: {}", command.name(), e);
                Outcome::NotDispatched(e.to_string())
            }
        }
    }

    fn execute_local(&mut self, command: &LocalCommand) -> Outcome {
        match command {
            LocalCommand::SelectFile(requested) => match self.find_file(requested) {
                Some(file) => {
                    tracing::info!("Selected {} ({} bytes)", file.name, file.size);
                    self.selected = Some(file.clone());
                    Outcome::FileSelected(file)
                }
                None => Outcome::FileNotFound(requested.clone()),
            },
            LocalCommand::DeleteFile(requested) => {
                let Some(file) = self.find_file(requested) else {
                    return Outcome::DeleteFailed(requested.clone());
                };
                match self.storage.delete_file(&file.name) {
                    Ok(()) => {
                        if self.selected.as_ref().is_some_and(|s| s.name == file.name) {
                            self.selected = None;
                        }
                        Outcome::FileDeleted(file.name)
                    }
                    Err(e) => {
                        tracing::warn!("Failed to delete {}: {}", file.name, e);
                        Outcome::DeleteFailed(requested.clone())
                    }
                }
            }
            LocalCommand::ReleaseCard => {
                self.selected = None;
                Outcome::Done
            }
            LocalCommand::TemperatureReportInterval(seconds) => {
                self.temperature_report.set_interval(*seconds, Instant::now());
                Outcome::Done
            }
            LocalCommand::SdReportInterval(seconds) => {
                self.sd_report.set_interval(*seconds, Instant::now());
                Outcome::Done
            }
            LocalCommand::DisplayMessage(message) => {
                tracing::info!("Host message: {}", message);
                Outcome::Done
            }
            LocalCommand::InitCard | LocalCommand::FirmwareInfo | LocalCommand::Echo(_) => {
                Outcome::Done
            }
        }
    }

    fn find_file(&self, requested: &str) -> Option<SdFile> {
        match self.storage.list_files() {
            Ok(files) => files.into_iter().find(|file| file.matches(requested)),
            Err(e) => {
                tracing::warn!("Failed to list printer storage: {}", e);
                None
            }
        }
    }
}

/// Worker loop: answer inbound lines and emit auto reports until closed
pub fn run_session(mut session: SerialSession, channels: Arc<SessionChannels>) {
    tracing::debug!("Session worker started");

    loop {
        match channels.inbound.pop_timeout(WORKER_TICK) {
            Popped::Item(line) => {
                channels.set_state(SessionState::Processing);
                let reply = session.process_line(&line);

                if session.is_killed() {
                    channels.set_state(SessionState::Killed);
                    channels.outbound.push_batch(reply);
                    channels.inbound.close();
                    channels.inbound.clear();
                    break;
                }

                if !reply.is_empty() {
                    channels.outbound.push_batch(reply);
                }
                channels.set_state(SessionState::Idle);
            }
            Popped::TimedOut => {}
            Popped::Closed => break,
        }

        let reports = session.due_reports(Instant::now());
        if !reports.is_empty() {
            channels.outbound.push_batch(reports);
        }
    }

    tracing::debug!("Session worker stopped");
}
