//! # Bambulink Communication
//!
//! Everything between the host's serial port and the printer.
//! Hosts see a Marlin printer on a virtual serial port; commands are
//! translated into Bambu MQTT requests and replies are built from the
//! mirrored printer state. Files reach the printer through the upload bridge.

pub mod communication;
pub mod device;
pub mod firmware;
pub mod upload;

pub use communication::{
    checksum, frame, serve, ReadOutcome, SessionConfig, SessionState, VirtualSerial,
};
pub use device::{
    DeviceLink, MqttDeviceLink, MqttLinkConfig, PrintOptions, PrinterCommand, StateEventHandler,
    StateEventHub,
};
pub use firmware::{Action, CommandEnvelope, ResponseLine};
pub use upload::{
    LocalDirStorage, RemoteStorage, SdFile, UploadBridge, UploadCallbacks, UploadHandle,
    UploadOutcome,
};
