//! Device link to the physical printer
//!
//! The serial side never talks MQTT directly. It hands [`PrinterCommand`]s
//! to a [`DeviceLink`] and learns about the printer through the
//! [`StateEvent`]s the link publishes.

pub mod commands;
pub mod mqtt;
pub mod report;

pub use commands::{PrintOptions, PrinterCommand};
pub use mqtt::{MqttDeviceLink, MqttLinkConfig};
pub use report::{parse_report, update_from_report};

use bambulink_core::{
    subscription_map, DataCallback, LinkError, StateEvent, SubscriptionId, SubscriptionMap,
};

/// Handler invoked for every state event
pub type StateEventHandler = DataCallback<StateEvent>;

/// Connection to the printer
///
/// Implementations must not block in `send_command`; the serial worker
/// calls it while the host waits for its `ok`.
pub trait DeviceLink: Send + Sync {
    /// Queue a command for the printer
    fn send_command(&self, command: &PrinterCommand) -> Result<(), LinkError>;

    /// Register a state event handler
    fn subscribe(&self, handler: StateEventHandler) -> SubscriptionId;

    /// Remove a handler, returning whether it was registered
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Whether the link currently has a session with the printer
    fn is_connected(&self) -> bool;
}

/// Fan-out of state events to registered handlers
#[derive(Default)]
pub struct StateEventHub {
    handlers: SubscriptionMap<SubscriptionId, StateEventHandler>,
}

impl StateEventHub {
    /// Create an empty hub
    pub fn new() -> Self {
        Self {
            handlers: subscription_map(),
        }
    }

    /// Register a handler
    pub fn subscribe(&self, handler: StateEventHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.handlers.write().insert(id, handler);
        id
    }

    /// Remove a handler
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.handlers.write().remove(&id).is_some()
    }

    /// Deliver an event to every handler
    pub fn emit(&self, event: StateEvent) {
        let handlers = self.handlers.read();
        for handler in handlers.values() {
            handler(event.clone());
        }
    }

    /// Number of registered handlers
    pub fn handler_count(&self) -> usize {
        self.handlers.read().len()
    }
}
