//! Bambu printer commands.
//!
//! Every command becomes a JSON document published on
//! `device/<serial>/request`. The `sequence_id` is supplied by the link so
//! it increases across the whole connection.

use bambulink_core::SpeedLevel;
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Options sent with every print start
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrintOptions {
    /// Record a timelapse
    pub timelapse: bool,
    /// Auto bed leveling before the print
    pub bed_leveling: bool,
    /// Extrusion flow calibration
    pub flow_cali: bool,
    /// Vibration compensation calibration
    pub vibration_cali: bool,
    /// First layer inspection (lidar models)
    pub layer_inspect: bool,
    /// Feed filament from the AMS
    pub use_ams: bool,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            timelapse: false,
            bed_leveling: true,
            flow_cali: false,
            vibration_cali: true,
            layer_inspect: true,
            use_ams: false,
        }
    }
}

/// Command to send to the printer.
#[derive(Debug, Clone, PartialEq)]
pub enum PrinterCommand {
    /// Request a full status push.
    PushAll,
    /// Run one line of G-code.
    GcodeLine(String),
    /// Pause the current print.
    Pause,
    /// Resume a paused print.
    Resume,
    /// Stop the current print.
    Stop,
    /// Switch the speed profile.
    SetSpeed(SpeedLevel),
    /// Start printing a file already on the printer storage.
    PrintFile {
        /// File name on the SD card.
        filename: String,
        /// Print options from settings.
        options: PrintOptions,
    },
}

impl PrinterCommand {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            PrinterCommand::PushAll => "pushall",
            PrinterCommand::GcodeLine(_) => "gcode_line",
            PrinterCommand::Pause => "pause",
            PrinterCommand::Resume => "resume",
            PrinterCommand::Stop => "stop",
            PrinterCommand::SetSpeed(_) => "print_speed",
            PrinterCommand::PrintFile { filename, .. } if is_project_file(filename) => {
                "project_file"
            }
            PrinterCommand::PrintFile { .. } => "gcode_file",
        }
    }

    /// Convert command to JSON payload.
    pub fn to_json(&self, sequence_id: u64) -> serde_json::Value {
        let sequence_id = sequence_id.to_string();
        match self {
            PrinterCommand::PushAll => json!({
                "pushing": {
                    "sequence_id": sequence_id,
                    "command": "pushall",
                    "version": 1,
                    "push_target": 1
                }
            }),

            PrinterCommand::GcodeLine(gcode) => json!({
                "print": {
                    "sequence_id": sequence_id,
                    "command": "gcode_line",
                    "param": format!("{}\n", gcode.trim_end())
                }
            }),

            PrinterCommand::Pause | PrinterCommand::Resume | PrinterCommand::Stop => json!({
                "print": {
                    "sequence_id": sequence_id,
                    "command": self.name(),
                    "param": ""
                }
            }),

            PrinterCommand::SetSpeed(level) => json!({
                "print": {
                    "sequence_id": sequence_id,
                    "command": "print_speed",
                    "param": level.level().to_string()
                }
            }),

            PrinterCommand::PrintFile { filename, options } if is_project_file(filename) => {
                json!({
                    "print": {
                        "sequence_id": sequence_id,
                        "command": "project_file",
                        "param": "Metadata/plate_1.gcode",
                        "subtask_name": filename,
                        "url": format!("file:///sdcard/{}", filename),
                        "bed_type": "auto",
                        "timelapse": options.timelapse,
                        "bed_leveling": options.bed_leveling,
                        "flow_cali": options.flow_cali,
                        "vibration_cali": options.vibration_cali,
                        "layer_inspect": options.layer_inspect,
                        "use_ams": options.use_ams,
                        "profile_id": "0",
                        "project_id": "0",
                        "subtask_id": "0",
                        "task_id": "0"
                    }
                })
            }

            PrinterCommand::PrintFile { filename, .. } => json!({
                "print": {
                    "sequence_id": sequence_id,
                    "command": "gcode_file",
                    "param": format!("/sdcard/{}", filename)
                }
            }),
        }
    }
}

/// Sliced project archives are started with `project_file`, plain G-code with `gcode_file`
fn is_project_file(filename: &str) -> bool {
    filename.to_ascii_lowercase().ends_with(".3mf")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pushall_payload() {
        let json = PrinterCommand::PushAll.to_json(7);
        assert_eq!(json["pushing"]["command"], "pushall");
        assert_eq!(json["pushing"]["sequence_id"], "7");
    }

    #[test]
    fn test_gcode_line_is_newline_terminated() {
        let json = PrinterCommand::GcodeLine("M104 S200".to_string()).to_json(1);
        assert_eq!(json["print"]["command"], "gcode_line");
        assert_eq!(json["print"]["param"], "M104 S200\n");
    }

    #[test]
    fn test_speed_payload_uses_level() {
        let json = PrinterCommand::SetSpeed(SpeedLevel::Sport).to_json(2);
        assert_eq!(json["print"]["command"], "print_speed");
        assert_eq!(json["print"]["param"], "3");
    }

    #[test]
    fn test_project_file_carries_options() {
        let options = PrintOptions {
            timelapse: true,
            use_ams: true,
            ..Default::default()
        };
        let command = PrinterCommand::PrintFile {
            filename: "benchy.gcode.3mf".to_string(),
            options,
        };
        assert_eq!(command.name(), "project_file");

        let json = command.to_json(3);
        let print = &json["print"];
        assert_eq!(print["command"], "project_file");
        assert_eq!(print["url"], "file:///sdcard/benchy.gcode.3mf");
        assert_eq!(print["subtask_name"], "benchy.gcode.3mf");
        assert_eq!(print["timelapse"], true);
        assert_eq!(print["bed_leveling"], true);
        assert_eq!(print["use_ams"], true);
    }

    #[test]
    fn test_plain_gcode_file() {
        let command = PrinterCommand::PrintFile {
            filename: "cube.gcode".to_string(),
            options: PrintOptions::default(),
        };
        let json = command.to_json(4);
        assert_eq!(json["print"]["command"], "gcode_file");
        assert_eq!(json["print"]["param"], "/sdcard/cube.gcode");
    }

    #[test]
    fn test_print_options_defaults() {
        let options = PrintOptions::default();
        assert!(!options.timelapse);
        assert!(options.bed_leveling);
        assert!(!options.flow_cali);
        assert!(options.vibration_cali);
        assert!(options.layer_inspect);
        assert!(!options.use_ams);
    }
}
