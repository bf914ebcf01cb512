//! Data models for the mirrored printer state
//!
//! This module provides:
//! - Heater readings with current and target values
//! - Print stage and speed profile enums mapped from Bambu report fields
//! - AMS slot state
//! - `DeviceState`, the full snapshot read by the serial side
//! - `DeviceUpdate`, a partial update where `None` means "unchanged"
//! - `StateEvent`, what the device link pushes into the mirror

use serde::{Deserialize, Serialize};
use std::fmt;

/// Bambu printer family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeviceModel {
    /// X1 Carbon
    #[default]
    X1C,
    /// X1E
    X1E,
    /// X1
    X1,
    /// P1P
    P1P,
    /// P1S
    P1S,
    /// A1
    A1,
    /// A1 mini
    #[serde(rename = "A1MINI", alias = "A1M")]
    A1Mini,
}

impl DeviceModel {
    /// Whether this family reports a chamber temperature
    pub fn has_chamber_sensor(&self) -> bool {
        matches!(self, DeviceModel::X1C | DeviceModel::X1E | DeviceModel::X1)
    }
}

impl fmt::Display for DeviceModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceModel::X1C => write!(f, "X1C"),
            DeviceModel::X1E => write!(f, "X1E"),
            DeviceModel::X1 => write!(f, "X1"),
            DeviceModel::P1P => write!(f, "P1P"),
            DeviceModel::P1S => write!(f, "P1S"),
            DeviceModel::A1 => write!(f, "A1"),
            DeviceModel::A1Mini => write!(f, "A1MINI"),
        }
    }
}

/// A heater reading in degrees Celsius
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperature {
    /// Measured temperature
    pub current: f64,
    /// Requested temperature, 0 when the heater is off
    pub target: f64,
}

impl Temperature {
    /// Create a reading
    pub fn new(current: f64, target: f64) -> Self {
        Self { current, target }
    }
}

/// Print job stage as reported in `gcode_state`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrintStage {
    /// Nothing has been reported yet
    #[default]
    Unknown,
    /// Printer idle
    Idle,
    /// Heating, leveling, or slicing before the first layer
    Preparing,
    /// Printing
    Printing,
    /// Paused by the user or by the printer
    Paused,
    /// Last job finished
    Finished,
    /// Last job failed or was cancelled
    Failed,
}

impl PrintStage {
    /// Map a Bambu `gcode_state` string
    pub fn from_gcode_state(state: &str) -> Self {
        match state.trim().to_ascii_uppercase().as_str() {
            "IDLE" => PrintStage::Idle,
            "PREPARE" | "SLICING" | "INIT" => PrintStage::Preparing,
            "RUNNING" => PrintStage::Printing,
            "PAUSE" => PrintStage::Paused,
            "FINISH" => PrintStage::Finished,
            "FAILED" => PrintStage::Failed,
            _ => PrintStage::Unknown,
        }
    }

    /// A job is loaded and not yet terminal
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PrintStage::Preparing | PrintStage::Printing | PrintStage::Paused
        )
    }
}

impl fmt::Display for PrintStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintStage::Unknown => write!(f, "Unknown"),
            PrintStage::Idle => write!(f, "Idle"),
            PrintStage::Preparing => write!(f, "Preparing"),
            PrintStage::Printing => write!(f, "Printing"),
            PrintStage::Paused => write!(f, "Paused"),
            PrintStage::Finished => write!(f, "Finished"),
            PrintStage::Failed => write!(f, "Failed"),
        }
    }
}

/// Bambu print speed profile (`spd_lvl`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeedLevel {
    /// 50%
    Silent,
    /// 100%
    Standard,
    /// 124%
    Sport,
    /// 166%
    Ludicrous,
}

impl SpeedLevel {
    const ALL: [SpeedLevel; 4] = [
        SpeedLevel::Silent,
        SpeedLevel::Standard,
        SpeedLevel::Sport,
        SpeedLevel::Ludicrous,
    ];

    /// Numeric level used on the wire (1-4)
    pub fn level(&self) -> u8 {
        match self {
            SpeedLevel::Silent => 1,
            SpeedLevel::Standard => 2,
            SpeedLevel::Sport => 3,
            SpeedLevel::Ludicrous => 4,
        }
    }

    /// Parse a wire level
    pub fn from_level(level: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.level() == level)
    }

    /// Feed rate percentage the profile corresponds to
    pub fn percent(&self) -> u32 {
        match self {
            SpeedLevel::Silent => 50,
            SpeedLevel::Standard => 100,
            SpeedLevel::Sport => 124,
            SpeedLevel::Ludicrous => 166,
        }
    }

    /// Nearest profile for an M220 feed rate percentage
    pub fn nearest_to_percent(percent: f64) -> Self {
        let mut best = SpeedLevel::Standard;
        let mut best_distance = f64::MAX;
        for level in Self::ALL {
            let distance = (f64::from(level.percent()) - percent).abs();
            if distance < best_distance {
                best = level;
                best_distance = distance;
            }
        }
        best
    }
}

/// One AMS filament slot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AmsSlot {
    /// AMS unit index
    pub unit: u8,
    /// Tray index within the unit
    pub tray: u8,
    /// Filament material, e.g. `PLA`
    pub filament_type: Option<String>,
    /// Filament colour as `RRGGBBAA` hex
    pub color: Option<String>,
    /// Remaining filament percentage, when the RFID tag reports it
    pub remaining_percent: Option<i32>,
}

/// Latest known printer state
///
/// Temperatures are never reset to unknown: once a reading has been observed
/// it is kept until a newer one arrives.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    /// Hotend
    pub nozzle: Temperature,
    /// Heated bed
    pub bed: Temperature,
    /// Enclosure chamber
    pub chamber: Temperature,
    /// Current job stage
    pub stage: PrintStage,
    /// Job progress 0-100
    pub progress_percent: f64,
    /// Current Z height in mm
    pub z_height: f64,
    /// Current layer
    pub layer_current: u32,
    /// Total layers of the job
    pub layer_total: u32,
    /// Estimated minutes left
    pub remaining_minutes: u32,
    /// Job name
    pub subtask_name: Option<String>,
    /// Active speed profile
    pub speed_level: Option<SpeedLevel>,
    /// AMS trays
    pub ams_slots: Vec<AmsSlot>,
    /// Active device error code, `None` when clear
    pub error_code: Option<u32>,
    /// MQTT link established
    pub link_online: bool,
}

impl DeviceState {
    /// Create the default state used before any report arrives
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a link event, returning whether anything changed
    pub fn apply(&mut self, event: &StateEvent) -> bool {
        let before = self.clone();
        match event {
            StateEvent::LinkUp => self.link_online = true,
            StateEvent::LinkDown { .. } => self.link_online = false,
            StateEvent::Update(update) => update.apply_to(self),
        }
        *self != before
    }

    /// Builder method to set the nozzle reading
    pub fn with_nozzle(mut self, current: f64, target: f64) -> Self {
        self.nozzle = Temperature::new(current, target);
        self
    }

    /// Builder method to set the bed reading
    pub fn with_bed(mut self, current: f64, target: f64) -> Self {
        self.bed = Temperature::new(current, target);
        self
    }

    /// Builder method to set the job stage
    pub fn with_stage(mut self, stage: PrintStage) -> Self {
        self.stage = stage;
        self
    }

    /// Builder method to set progress
    pub fn with_progress(mut self, percent: f64) -> Self {
        self.progress_percent = percent.clamp(0.0, 100.0);
        self
    }
}

/// Partial device state update
///
/// Bambu printers send full state on `pushall` and deltas afterwards. Each
/// field is an `Option` where `None` means "don't change this field".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceUpdate {
    /// Nozzle current temperature
    pub nozzle_current: Option<f64>,
    /// Nozzle target temperature
    pub nozzle_target: Option<f64>,
    /// Bed current temperature
    pub bed_current: Option<f64>,
    /// Bed target temperature
    pub bed_target: Option<f64>,
    /// Chamber current temperature
    pub chamber_current: Option<f64>,
    /// Chamber target temperature
    pub chamber_target: Option<f64>,
    /// Job stage
    pub stage: Option<PrintStage>,
    /// Job progress 0-100
    pub progress_percent: Option<f64>,
    /// Z height in mm
    pub z_height: Option<f64>,
    /// Current layer
    pub layer_current: Option<u32>,
    /// Total layers
    pub layer_total: Option<u32>,
    /// Minutes left
    pub remaining_minutes: Option<u32>,
    /// Job name
    pub subtask_name: Option<String>,
    /// Speed profile
    pub speed_level: Option<SpeedLevel>,
    /// Complete AMS tray list
    pub ams_slots: Option<Vec<AmsSlot>>,
    /// Device error code, `Some(0)` clears the active error
    pub error_code: Option<u32>,
}

impl DeviceUpdate {
    /// Create an empty update
    pub fn new() -> Self {
        Self::default()
    }

    /// Update carrying only nozzle readings
    pub fn nozzle(current: f64, target: f64) -> Self {
        Self {
            nozzle_current: Some(current),
            nozzle_target: Some(target),
            ..Default::default()
        }
    }

    /// Update carrying only bed readings
    pub fn bed(current: f64, target: f64) -> Self {
        Self {
            bed_current: Some(current),
            bed_target: Some(target),
            ..Default::default()
        }
    }

    /// Update carrying only the job stage
    pub fn stage(stage: PrintStage) -> Self {
        Self {
            stage: Some(stage),
            ..Default::default()
        }
    }

    /// Apply this update to a state, changing only the fields that are set
    pub fn apply_to(&self, state: &mut DeviceState) {
        if let Some(v) = self.nozzle_current {
            state.nozzle.current = v;
        }
        if let Some(v) = self.nozzle_target {
            state.nozzle.target = v;
        }
        if let Some(v) = self.bed_current {
            state.bed.current = v;
        }
        if let Some(v) = self.bed_target {
            state.bed.target = v;
        }
        if let Some(v) = self.chamber_current {
            state.chamber.current = v;
        }
        if let Some(v) = self.chamber_target {
            state.chamber.target = v;
        }
        if let Some(stage) = self.stage {
            state.stage = stage;
        }
        if let Some(v) = self.progress_percent {
            state.progress_percent = v.clamp(0.0, 100.0);
        }
        if let Some(v) = self.z_height {
            state.z_height = v;
        }
        if let Some(v) = self.layer_current {
            state.layer_current = v;
        }
        if let Some(v) = self.layer_total {
            state.layer_total = v;
        }
        if let Some(v) = self.remaining_minutes {
            state.remaining_minutes = v;
        }
        if let Some(name) = &self.subtask_name {
            state.subtask_name = (!name.is_empty()).then(|| name.clone());
        }
        if let Some(level) = self.speed_level {
            state.speed_level = Some(level);
        }
        if let Some(slots) = &self.ams_slots {
            state.ams_slots = slots.clone();
        }
        if let Some(code) = self.error_code {
            state.error_code = (code != 0).then_some(code);
        }
    }

    /// Check if this update carries no fields
    pub fn is_empty(&self) -> bool {
        *self == DeviceUpdate::default()
    }
}

/// Event pushed by the device link
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// MQTT session established
    LinkUp,
    /// MQTT session lost
    LinkDown {
        /// Why the link went down.
        reason: String,
    },
    /// Fields reported by the printer
    Update(DeviceUpdate),
}

impl fmt::Display for StateEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateEvent::LinkUp => write!(f, "LinkUp"),
            StateEvent::LinkDown { reason } => write!(f, "LinkDown({})", reason),
            StateEvent::Update(_) => write!(f, "Update"),
        }
    }
}
