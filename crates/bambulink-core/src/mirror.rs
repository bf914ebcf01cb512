//! Device state mirror.
//!
//! Holds the latest [`DeviceState`] behind an `RwLock<Arc<_>>`. Every update
//! clones the current snapshot, applies the event, and swaps the whole value
//! in, so readers never observe a half-applied update. Listeners are told
//! about each change with the previous and the new snapshot.

use parking_lot::RwLock;
use std::sync::Arc;
use uuid::Uuid;

use crate::data::{DeviceState, StateEvent};
use crate::types::{subscription_map, SubscriptionMap};

/// Subscription handle for removing a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Listener receiving `(previous, current)` snapshots after each change
pub type StateListener = Box<dyn Fn(&DeviceState, &DeviceState) + Send + Sync>;

/// Shared, snapshot-consistent view of the printer
pub struct DeviceStateMirror {
    current: RwLock<Arc<DeviceState>>,
    listeners: SubscriptionMap<SubscriptionId, StateListener>,
}

impl DeviceStateMirror {
    /// Create a mirror holding the default state
    pub fn new() -> Self {
        Self::with_state(DeviceState::default())
    }

    /// Create a mirror seeded with a state
    pub fn with_state(state: DeviceState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
            listeners: subscription_map(),
        }
    }

    /// Latest complete snapshot
    pub fn snapshot(&self) -> Arc<DeviceState> {
        Arc::clone(&self.current.read())
    }

    /// Apply an event as a whole-snapshot replacement
    ///
    /// Listeners run after the swap, outside the state lock, and only when
    /// the event changed something.
    pub fn update(&self, event: &StateEvent) {
        let swapped = {
            let mut current = self.current.write();
            let mut next = DeviceState::clone(&current);
            if next.apply(event) {
                let previous = std::mem::replace(&mut *current, Arc::new(next));
                Some((previous, Arc::clone(&current)))
            } else {
                None
            }
        };

        match event {
            StateEvent::LinkDown { reason } => {
                tracing::warn!("Printer link down ({}), holding last known state", reason);
            }
            StateEvent::LinkUp => tracing::info!("Printer link up"),
            StateEvent::Update(_) => {}
        }

        if let Some((previous, next)) = swapped {
            let listeners = self.listeners.read();
            for listener in listeners.values() {
                listener(&previous, &next);
            }
        }
    }

    /// Register a change listener
    ///
    /// Listeners must not subscribe or unsubscribe from inside the callback.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&DeviceState, &DeviceState) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        self.listeners.write().insert(id, Box::new(listener));
        tracing::debug!("Mirror listener {} registered", id);
        id
    }

    /// Remove a listener, returning whether it was registered
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.write().remove(&id).is_some()
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }
}

impl Default for DeviceStateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeviceStateMirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceStateMirror")
            .field("current", &self.snapshot())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{DeviceUpdate, PrintStage};
    use parking_lot::Mutex;

    #[test]
    fn test_snapshot_before_any_update_is_default() {
        let mirror = DeviceStateMirror::new();
        assert_eq!(*mirror.snapshot(), DeviceState::default());
    }

    #[test]
    fn test_update_replaces_snapshot() {
        let mirror = DeviceStateMirror::new();
        let before = mirror.snapshot();
        mirror.update(&StateEvent::Update(DeviceUpdate::nozzle(210.0, 210.0)));
        let after = mirror.snapshot();

        assert_eq!(before.nozzle.current, 0.0);
        assert_eq!(after.nozzle.current, 210.0);
        assert!(!Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_unchanged_update_keeps_snapshot() {
        let mirror = DeviceStateMirror::new();
        mirror.update(&StateEvent::Update(DeviceUpdate::bed(60.0, 60.0)));
        let first = mirror.snapshot();
        mirror.update(&StateEvent::Update(DeviceUpdate::bed(60.0, 60.0)));
        assert!(Arc::ptr_eq(&first, &mirror.snapshot()));
    }

    #[test]
    fn test_listener_sees_previous_and_next() {
        let mirror = DeviceStateMirror::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        mirror.subscribe(move |prev, next| {
            sink.lock().push((prev.stage, next.stage));
        });

        mirror.update(&StateEvent::Update(DeviceUpdate::stage(PrintStage::Printing)));
        mirror.update(&StateEvent::Update(DeviceUpdate::stage(PrintStage::Paused)));

        assert_eq!(
            *seen.lock(),
            vec![
                (PrintStage::Unknown, PrintStage::Printing),
                (PrintStage::Printing, PrintStage::Paused),
            ]
        );
    }

    #[test]
    fn test_unsubscribe() {
        let mirror = DeviceStateMirror::new();
        let id = mirror.subscribe(|_, _| {});
        assert_eq!(mirror.listener_count(), 1);
        assert!(mirror.unsubscribe(id));
        assert!(!mirror.unsubscribe(id));
        assert_eq!(mirror.listener_count(), 0);
    }

    #[test]
    fn test_link_down_freezes_values() {
        let mirror = DeviceStateMirror::new();
        mirror.update(&StateEvent::LinkUp);
        mirror.update(&StateEvent::Update(DeviceUpdate::nozzle(215.5, 220.0)));
        mirror.update(&StateEvent::LinkDown {
            reason: "connection reset".to_string(),
        });

        let state = mirror.snapshot();
        assert!(!state.link_online);
        assert_eq!(state.nozzle.current, 215.5);
        assert_eq!(state.nozzle.target, 220.0);
    }

    #[test]
    fn test_subscription_id_display() {
        let id = SubscriptionId::new();
        let text = id.to_string();
        assert!(text.starts_with("Sub("));
        assert_eq!(text.len(), 13);
    }
}
