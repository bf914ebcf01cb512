//! Firmware emulation
//!
//! The bridge presents itself to hosts as a Marlin printer:
//! - `marlin`: command parsing, translation and response synthesis

pub mod marlin;

pub use marlin::{
    synthesize, translate, Action, CommandEnvelope, DeviceAction, LocalCommand, Outcome,
    ResponseLine, StateQuery,
};
