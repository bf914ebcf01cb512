//! # Bambulink Core
//!
//! Core types and utilities for Bambulink.
//! Provides the device state model, the snapshot mirror shared between the
//! printer link and the virtual serial port, and the error types used by
//! every layer.

pub mod data;
pub mod error;
pub mod mirror;
pub mod types;

pub use data::{
    AmsSlot, DeviceModel, DeviceState, DeviceUpdate, PrintStage, SpeedLevel, StateEvent,
    Temperature,
};

pub use error::{Error, LinkError, ProtocolError, Result, TransportError, UploadError};

pub use mirror::{DeviceStateMirror, StateListener, SubscriptionId};

// Re-export type aliases for convenience
pub use types::{subscription_map, DataCallback, SubscriptionMap, ThreadSafeRwMap};
