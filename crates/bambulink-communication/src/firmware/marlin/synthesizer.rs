//! Marlin response synthesis
//!
//! Turns an [`Action`], the mirrored [`DeviceState`], and the result of
//! executing the action into the exact lines Marlin would print. Data lines
//! always come before the terminal `ok` or `Error:` line of a reply.

use bambulink_core::{DeviceModel, DeviceState, ProtocolError};

use super::translator::{Action, DeviceAction, LocalCommand, StateQuery};
use crate::upload::SdFile;

const FIRMWARE_NAME: &str = "Bambulink";

/// Role of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    /// Report or echo line
    Data,
    /// Terminal acknowledgement
    Ok,
    /// `Error:` line
    Error,
}

/// One line sent to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseLine {
    kind: LineKind,
    text: String,
}

impl ResponseLine {
    /// Report or echo line
    pub fn data(text: impl Into<String>) -> Self {
        Self {
            kind: LineKind::Data,
            text: text.into(),
        }
    }

    /// Bare `ok`
    pub fn ok() -> Self {
        Self {
            kind: LineKind::Ok,
            text: "ok".to_string(),
        }
    }

    /// `ok` followed by a report on the same line
    pub fn ok_with(report: &str) -> Self {
        Self {
            kind: LineKind::Ok,
            text: format!("ok {}", report),
        }
    }

    /// `Error:<message>`
    pub fn error(message: impl std::fmt::Display) -> Self {
        Self {
            kind: LineKind::Error,
            text: format!("Error:{}", message),
        }
    }

    /// Role of the line
    pub fn kind(&self) -> LineKind {
        self.kind
    }

    /// Line text without terminator
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Line text with `\n` terminator, as read by the host
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.text.len() + 1);
        bytes.extend_from_slice(self.text.as_bytes());
        bytes.push(b'\n');
        bytes
    }
}

/// Result of executing an action inside the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Nothing to execute or execution succeeded without data
    Done,
    /// Printer command queued on the link
    Dispatched,
    /// Printer command could not be queued
    NotDispatched(String),
    /// Files on the card
    Listing(Vec<SdFile>),
    /// Listing failed
    ListingFailed(String),
    /// M23 found the file
    FileSelected(SdFile),
    /// M23 found nothing
    FileNotFound(String),
    /// M30 removed the file
    FileDeleted(String),
    /// M30 failed
    DeleteFailed(String),
}

/// Session facts the synthesizer needs besides the device state
#[derive(Debug, Clone, Copy)]
pub struct ReplyContext<'a> {
    /// Printer family, reported by M115
    pub model: DeviceModel,
    /// Whether M105 includes the chamber reading
    pub report_chamber: bool,
    /// File chosen with M23
    pub selected_file: Option<&'a SdFile>,
}

/// Compose the reply for one executed action
pub fn synthesize(
    action: &Action,
    state: &DeviceState,
    outcome: &Outcome,
    context: &ReplyContext<'_>,
) -> Vec<ResponseLine> {
    match action {
        Action::Query(query) => query_reply(*query, state, outcome, context),
        Action::Device(DeviceAction::EmergencyStop) => {
            vec![ResponseLine::error("Printer halted. kill() called!")]
        }
        Action::Device(_) => match outcome {
            Outcome::NotDispatched(reason) => vec![
                ResponseLine::data(format!("echo:Printer command not sent: {}", reason)),
                ResponseLine::ok(),
            ],
            _ => vec![ResponseLine::ok()],
        },
        Action::Local(command) => local_reply(command, outcome, context),
        Action::Ack | Action::Unsupported(_) => vec![ResponseLine::ok()],
    }
}

fn query_reply(
    query: StateQuery,
    state: &DeviceState,
    outcome: &Outcome,
    context: &ReplyContext<'_>,
) -> Vec<ResponseLine> {
    match query {
        StateQuery::Temperatures => vec![ResponseLine::ok_with(&temperature_report(
            state,
            context.report_chamber,
        ))],
        StateQuery::Position => vec![
            ResponseLine::data(position_report(state)),
            ResponseLine::ok(),
        ],
        StateQuery::SdProgress => vec![
            ResponseLine::data(sd_progress_report(state, context.selected_file)),
            ResponseLine::ok(),
        ],
        StateQuery::SdListing {
            long_names,
            timestamps,
        } => {
            let files: &[SdFile] = match outcome {
                Outcome::Listing(files) => files,
                _ => &[],
            };
            let mut lines = Vec::with_capacity(files.len() + 3);
            lines.push(ResponseLine::data("Begin file list"));
            lines.extend(
                files
                    .iter()
                    .map(|file| ResponseLine::data(listing_entry(file, long_names, timestamps))),
            );
            lines.push(ResponseLine::data("End file list"));
            lines.push(ResponseLine::ok());
            lines
        }
    }
}

fn local_reply(
    command: &LocalCommand,
    outcome: &Outcome,
    context: &ReplyContext<'_>,
) -> Vec<ResponseLine> {
    match (command, outcome) {
        (LocalCommand::InitCard, _) => {
            vec![ResponseLine::data("SD card ok"), ResponseLine::ok()]
        }
        (LocalCommand::SelectFile(_), Outcome::FileSelected(file)) => vec![
            ResponseLine::data(format!("File opened: {} Size: {}", file.name, file.size)),
            ResponseLine::data("File selected"),
            ResponseLine::ok(),
        ],
        (LocalCommand::SelectFile(name), _) => vec![
            ResponseLine::data(format!("open failed, File: {}.", name)),
            ResponseLine::ok(),
        ],
        (LocalCommand::DeleteFile(_), Outcome::FileDeleted(name)) => vec![
            ResponseLine::data(format!("File deleted:{}", name)),
            ResponseLine::ok(),
        ],
        (LocalCommand::DeleteFile(name), _) => vec![
            ResponseLine::data(format!("Deletion failed, File: {}.", name)),
            ResponseLine::ok(),
        ],
        (LocalCommand::FirmwareInfo, _) => {
            let mut lines: Vec<ResponseLine> = firmware_info(context.model)
                .into_iter()
                .map(ResponseLine::data)
                .collect();
            lines.push(ResponseLine::ok());
            lines
        }
        (LocalCommand::Echo(message), _) => vec![
            ResponseLine::data(format!("echo:{}", message)),
            ResponseLine::ok(),
        ],
        (LocalCommand::ReleaseCard, _)
        | (LocalCommand::TemperatureReportInterval(_), _)
        | (LocalCommand::SdReportInterval(_), _)
        | (LocalCommand::DisplayMessage(_), _) => vec![ResponseLine::ok()],
    }
}

/// Reply to a line the protocol refused
pub fn rejection_reply(error: &ProtocolError, resend: Option<u32>) -> Vec<ResponseLine> {
    let mut lines = vec![ResponseLine::error(error)];
    if let Some(line) = resend {
        lines.push(ResponseLine::data(format!("Resend: {}", line)));
    }
    lines.push(ResponseLine::ok());
    lines
}

/// Format a number without a trailing `.0`, rounded to one decimal
pub fn format_number(value: f64) -> String {
    let rounded = (value * 10.0).round() / 10.0;
    // Avoid printing -0
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    if rounded.fract() == 0.0 {
        format!("{:.0}", rounded)
    } else {
        format!("{:.1}", rounded)
    }
}

/// `T:<cur>/<target> B:<cur>/<target>` with an optional chamber reading
pub fn temperature_report(state: &DeviceState, include_chamber: bool) -> String {
    let mut report = format!(
        "T:{}/{} B:{}/{}",
        format_number(state.nozzle.current),
        format_number(state.nozzle.target),
        format_number(state.bed.current),
        format_number(state.bed.target),
    );
    if include_chamber {
        report.push_str(&format!(
            " C:{}/{}",
            format_number(state.chamber.current),
            format_number(state.chamber.target)
        ));
    }
    report
}

/// M114 report; the printer only exposes Z
pub fn position_report(state: &DeviceState) -> String {
    format!(
        "X:0.00 Y:0.00 Z:{:.2} E:0.00 Count X:0 Y:0 Z:0",
        state.z_height
    )
}

/// M27 report
///
/// Progress is only known as a percentage, so the byte position is scaled
/// from the selected file size, or expressed out of 100 without one.
pub fn sd_progress_report(state: &DeviceState, selected_file: Option<&SdFile>) -> String {
    if !state.stage.is_active() {
        return "Not SD printing".to_string();
    }
    let total = selected_file
        .map(|file| file.size)
        .filter(|size| *size > 0)
        .unwrap_or(100);
    let position = ((state.progress_percent / 100.0) * total as f64).round() as u64;
    format!("SD printing byte {}/{}", position.min(total), total)
}

/// One M20 line: alias, size, then optional timestamp and long name
pub fn listing_entry(file: &SdFile, long_names: bool, timestamps: bool) -> String {
    let mut entry = format!("{} {}", file.short_name, file.size);
    if timestamps {
        if let Some(stamp) = file.fat_timestamp() {
            entry.push_str(&format!(" 0x{:08X}", stamp));
        }
    }
    if long_names {
        entry.push(' ');
        entry.push_str(&file.name);
    }
    entry
}

/// M115 lines, without the final `ok`
pub fn firmware_info(model: DeviceModel) -> Vec<String> {
    vec![
        format!(
            "FIRMWARE_NAME:{} {} PROTOCOL_VERSION:1.0 MACHINE_TYPE:Bambu {} EXTRUDER_COUNT:1",
            FIRMWARE_NAME,
            env!("CARGO_PKG_VERSION"),
            model
        ),
        "Cap:EXTENDED_M20:1".to_string(),
        "Cap:LFN_WRITE:1".to_string(),
        "Cap:AUTOREPORT_TEMP:1".to_string(),
        "Cap:AUTOREPORT_SD_STATUS:1".to_string(),
    ]
}

/// Lines announcing a print stage change
pub fn stage_transition_lines(previous: &DeviceState, current: &DeviceState) -> Vec<ResponseLine> {
    use bambulink_core::PrintStage::*;

    let mut lines = Vec::new();
    match (previous.stage, current.stage) {
        // The first report after startup is not a pause the host caused
        (before, Paused) if before != Paused && before != Unknown => {
            lines.push(ResponseLine::data("// action:paused"));
        }
        (Paused, Printing) => lines.push(ResponseLine::data("// action:resumed")),
        (before, Finished) if before.is_active() => {
            lines.push(ResponseLine::data("Done printing file"));
        }
        (before, Failed) if before.is_active() => {
            lines.push(ResponseLine::data("// action:cancel"));
        }
        _ => {}
    }

    if current.error_code != previous.error_code {
        if let Some(code) = current.error_code {
            lines.push(ResponseLine::data(format!("echo:Printer error 0x{:08X}", code)));
        }
    }
    lines
}
