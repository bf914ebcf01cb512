//! Marlin dialect emulation
//!
//! Hosts talk to the bridge as if it were a Marlin printer. A line is parsed
//! into a [`CommandEnvelope`], translated into an [`Action`], and answered
//! by the synthesizer with the exact lines Marlin would print.

pub mod envelope;
pub mod synthesizer;
pub mod translator;

pub use envelope::{Argument, CommandEnvelope};
pub use synthesizer::{
    firmware_info, format_number, listing_entry, position_report, rejection_reply,
    sd_progress_report, stage_transition_lines, synthesize, temperature_report, LineKind,
    Outcome, ReplyContext, ResponseLine,
};
pub use translator::{translate, Action, DeviceAction, LocalCommand, StateQuery};
