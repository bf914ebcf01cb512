//! G-code to action translation
//!
//! Decides what each host command means for a Bambu printer. Anything that
//! changes the printer becomes a [`DeviceAction`] sent over MQTT without
//! waiting for confirmation. Reads are answered from the mirrored state.
//! SD-card bookkeeping stays inside the session. Everything else is
//! acknowledged so hosts never stall on codes the printer does not need.

use bambulink_core::{DeviceState, PrintStage, SpeedLevel};

use super::envelope::CommandEnvelope;

/// Codes forwarded verbatim as `gcode_line`
const PASSTHROUGH_CODES: &[&str] = &[
    "G0", "G1", "G28", "G90", "G91", "G92", "M82", "M83", "M84", "M106", "M107",
];

/// Codes acknowledged without any effect
const ACK_CODES: &[&str] = &["M110", "M400", "M999"];

/// Longest auto report interval Marlin accepts for `M155 S` and `M27 S`
pub const MAX_REPORT_INTERVAL_SECS: u64 = 60;

/// What a command resolves to
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send a command to the printer
    Device(DeviceAction),
    /// Report mirrored state
    Query(StateQuery),
    /// Session-local SD card and reporting bookkeeping
    Local(LocalCommand),
    /// Plain `ok`
    Ack,
    /// A code the bridge does not handle, acknowledged with `ok`
    Unsupported(String),
}

/// Commands for the printer
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceAction {
    /// M104/M109
    SetNozzleTemperature(f64),
    /// M140/M190
    SetBedTemperature(f64),
    /// M220
    SetSpeed(SpeedLevel),
    /// M24 with a selected file
    StartPrint(String),
    /// M25
    Pause,
    /// M24 while paused
    Resume,
    /// M26 S0, M524
    Stop,
    /// M112
    EmergencyStop,
    /// Motion and fan commands forwarded as-is
    Gcode(String),
}

/// State reads answered from the mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateQuery {
    /// M105
    Temperatures,
    /// M114
    Position,
    /// M27
    SdProgress,
    /// M20
    SdListing {
        /// `L`: append long file names
        long_names: bool,
        /// `T`: append FAT timestamps
        timestamps: bool,
    },
}

/// Bookkeeping handled inside the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    /// M21
    InitCard,
    /// M22
    ReleaseCard,
    /// M23
    SelectFile(String),
    /// M30
    DeleteFile(String),
    /// M155 S, seconds
    TemperatureReportInterval(u64),
    /// M27 S, seconds
    SdReportInterval(u64),
    /// M115
    FirmwareInfo,
    /// M118
    Echo(String),
    /// M117
    DisplayMessage(String),
}

/// Translate one command
///
/// `selected_file` is the file chosen with M23, which M24 starts when the
/// printer is not paused.
pub fn translate(
    envelope: &CommandEnvelope,
    state: &DeviceState,
    selected_file: Option<&str>,
) -> Action {
    let code = envelope.code();

    match code {
        "M105" => Action::Query(StateQuery::Temperatures),
        "M114" => Action::Query(StateQuery::Position),
        "M20" => Action::Query(StateQuery::SdListing {
            long_names: envelope.has('L'),
            timestamps: envelope.has('T'),
        }),
        "M27" => match envelope.int('S') {
            Some(seconds) => Action::Local(LocalCommand::SdReportInterval(report_interval(seconds))),
            None => Action::Query(StateQuery::SdProgress),
        },

        "M104" | "M109" => match envelope.float('S').or_else(|| envelope.float('R')) {
            Some(target) => Action::Device(DeviceAction::SetNozzleTemperature(target)),
            None => Action::Ack,
        },
        "M140" | "M190" => match envelope.float('S').or_else(|| envelope.float('R')) {
            Some(target) => Action::Device(DeviceAction::SetBedTemperature(target)),
            None => Action::Ack,
        },
        "M220" => match envelope.float('S') {
            Some(percent) => Action::Device(DeviceAction::SetSpeed(
                SpeedLevel::nearest_to_percent(percent),
            )),
            None => Action::Ack,
        },

        "M24" => match (state.stage, selected_file) {
            (PrintStage::Paused, _) => Action::Device(DeviceAction::Resume),
            (PrintStage::Printing | PrintStage::Preparing, _) => Action::Ack,
            (_, Some(file)) => Action::Device(DeviceAction::StartPrint(file.to_string())),
            (_, None) => Action::Ack,
        },
        "M25" => Action::Device(DeviceAction::Pause),
        "M26" => match envelope.float('S') {
            Some(position) if position == 0.0 => Action::Device(DeviceAction::Stop),
            _ => Action::Ack,
        },
        "M524" => Action::Device(DeviceAction::Stop),
        "M112" => Action::Device(DeviceAction::EmergencyStop),

        "M21" => Action::Local(LocalCommand::InitCard),
        "M22" => Action::Local(LocalCommand::ReleaseCard),
        "M23" => Action::Local(LocalCommand::SelectFile(envelope.text().to_string())),
        "M30" => Action::Local(LocalCommand::DeleteFile(envelope.text().to_string())),
        "M155" => match envelope.int('S') {
            Some(seconds) => {
                Action::Local(LocalCommand::TemperatureReportInterval(report_interval(seconds)))
            }
            None => Action::Ack,
        },
        "M115" => Action::Local(LocalCommand::FirmwareInfo),
        "M117" => Action::Local(LocalCommand::DisplayMessage(envelope.text().to_string())),
        "M118" => Action::Local(LocalCommand::Echo(echo_text(envelope.text()))),

        _ if PASSTHROUGH_CODES.contains(&code) => {
            Action::Device(DeviceAction::Gcode(envelope.command_line()))
        }
        _ if ACK_CODES.contains(&code) => Action::Ack,
        _ => Action::Unsupported(code.to_string()),
    }
}

/// Strip M118 routing flags (`E1`, `A1`, `Pn`) from the message
fn echo_text(text: &str) -> String {
    let mut rest = text.trim_start();
    loop {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let word = parts.next().unwrap_or("");
        let is_flag = matches!(word, "E1" | "A1" | "P0" | "P1" | "P2");
        if !is_flag {
            return rest.to_string();
        }
        rest = parts.next().unwrap_or("").trim_start();
    }
}

fn report_interval(seconds: i64) -> u64 {
    seconds.clamp(0, MAX_REPORT_INTERVAL_SECS as i64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> CommandEnvelope {
        CommandEnvelope::parse(None, line).unwrap()
    }

    fn idle() -> DeviceState {
        DeviceState::new().with_stage(PrintStage::Idle)
    }

    #[test]
    fn test_queries() {
        let state = idle();
        assert_eq!(
            translate(&parse("M105"), &state, None),
            Action::Query(StateQuery::Temperatures)
        );
        assert_eq!(
            translate(&parse("M114"), &state, None),
            Action::Query(StateQuery::Position)
        );
        assert_eq!(
            translate(&parse("M27"), &state, None),
            Action::Query(StateQuery::SdProgress)
        );
        assert_eq!(
            translate(&parse("M20 L T"), &state, None),
            Action::Query(StateQuery::SdListing {
                long_names: true,
                timestamps: true
            })
        );
    }

    #[test]
    fn test_temperatures() {
        let state = idle();
        assert_eq!(
            translate(&parse("M104 S215"), &state, None),
            Action::Device(DeviceAction::SetNozzleTemperature(215.0))
        );
        assert_eq!(
            translate(&parse("M109 R200"), &state, None),
            Action::Device(DeviceAction::SetNozzleTemperature(200.0))
        );
        assert_eq!(
            translate(&parse("M190 S60"), &state, None),
            Action::Device(DeviceAction::SetBedTemperature(60.0))
        );
        assert_eq!(translate(&parse("M104"), &state, None), Action::Ack);
    }

    #[test]
    fn test_speed() {
        assert_eq!(
            translate(&parse("M220 S166"), &idle(), None),
            Action::Device(DeviceAction::SetSpeed(SpeedLevel::Ludicrous))
        );
    }

    #[test]
    fn test_m24_depends_on_stage() {
        let paused = DeviceState::new().with_stage(PrintStage::Paused);
        assert_eq!(
            translate(&parse("M24"), &paused, Some("a.3mf")),
            Action::Device(DeviceAction::Resume)
        );

        assert_eq!(
            translate(&parse("M24"), &idle(), Some("a.3mf")),
            Action::Device(DeviceAction::StartPrint("a.3mf".to_string()))
        );

        let printing = DeviceState::new().with_stage(PrintStage::Printing);
        assert_eq!(translate(&parse("M24"), &printing, Some("a.3mf")), Action::Ack);
        assert_eq!(translate(&parse("M24"), &idle(), None), Action::Ack);
    }

    #[test]
    fn test_job_control() {
        let state = idle();
        assert_eq!(
            translate(&parse("M25"), &state, None),
            Action::Device(DeviceAction::Pause)
        );
        assert_eq!(
            translate(&parse("M26 S0"), &state, None),
            Action::Device(DeviceAction::Stop)
        );
        assert_eq!(translate(&parse("M26 S100"), &state, None), Action::Ack);
        assert_eq!(translate(&parse("M26 S0.5"), &state, None), Action::Ack);
        assert_eq!(translate(&parse("M26"), &state, None), Action::Ack);
        assert_eq!(
            translate(&parse("M524"), &state, None),
            Action::Device(DeviceAction::Stop)
        );
        assert_eq!(
            translate(&parse("M112"), &state, None),
            Action::Device(DeviceAction::EmergencyStop)
        );
    }

    #[test]
    fn test_passthrough() {
        assert_eq!(
            translate(&parse("G28 X Y"), &idle(), None),
            Action::Device(DeviceAction::Gcode("G28 X Y".to_string()))
        );
        assert_eq!(
            translate(&parse("M106 S255"), &idle(), None),
            Action::Device(DeviceAction::Gcode("M106 S255".to_string()))
        );
    }

    #[test]
    fn test_local_commands() {
        let state = idle();
        assert_eq!(
            translate(&parse("M23 cube.gcode"), &state, None),
            Action::Local(LocalCommand::SelectFile("cube.gcode".to_string()))
        );
        assert_eq!(
            translate(&parse("M30 cube.gcode"), &state, None),
            Action::Local(LocalCommand::DeleteFile("cube.gcode".to_string()))
        );
        assert_eq!(
            translate(&parse("M155 S2"), &state, None),
            Action::Local(LocalCommand::TemperatureReportInterval(2))
        );
        assert_eq!(
            translate(&parse("M27 S5"), &state, None),
            Action::Local(LocalCommand::SdReportInterval(5))
        );
        assert_eq!(
            translate(&parse("M118 E1 hello host"), &state, None),
            Action::Local(LocalCommand::Echo("hello host".to_string()))
        );
        assert_eq!(
            translate(&parse("M115"), &state, None),
            Action::Local(LocalCommand::FirmwareInfo)
        );
    }

    #[test]
    fn test_report_intervals_are_clamped() {
        let state = idle();
        assert_eq!(
            translate(&parse("M155 S99999999999999999999"), &state, None),
            Action::Local(LocalCommand::TemperatureReportInterval(60))
        );
        assert_eq!(
            translate(&parse("M27 S3600"), &state, None),
            Action::Local(LocalCommand::SdReportInterval(60))
        );
        assert_eq!(
            translate(&parse("M155 S-4"), &state, None),
            Action::Local(LocalCommand::TemperatureReportInterval(0))
        );
    }

    #[test]
    fn test_ack_and_unsupported() {
        let state = idle();
        assert_eq!(translate(&parse("M400"), &state, None), Action::Ack);
        assert_eq!(translate(&parse("M110 N0"), &state, None), Action::Ack);
        assert_eq!(
            translate(&parse("M851 Z-1"), &state, None),
            Action::Unsupported("M851".to_string())
        );
    }
}
