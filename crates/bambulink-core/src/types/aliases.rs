//! Type aliases for commonly used complex types.
//!
//! Gives meaningful names to the nested lock and callback types shared by
//! the device link and the state mirror.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use bambulink_core::types::*;
//!
//! // Instead of: Arc<RwLock<HashMap<SubscriptionId, Box<dyn Fn(StateEvent) + Send + Sync>>>>
//! let handlers: SubscriptionMap<SubscriptionId, DataCallback<StateEvent>> = subscription_map();
//! ```

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// A thread-safe reader-writer hash map.
///
/// Uses `parking_lot::RwLock`; reads vastly outnumber writes for listener
/// registries.
pub type ThreadSafeRwMap<K, V> = Arc<RwLock<HashMap<K, V>>>;

/// A callback that receives a single parameter.
///
/// Thread-safe, suitable for cross-thread data notification.
pub type DataCallback<T> = Box<dyn Fn(T) + Send + Sync>;

/// A map of subscription IDs to callbacks for listener registries.
pub type SubscriptionMap<K, V> = ThreadSafeRwMap<K, V>;

/// Create a new empty `SubscriptionMap<K, V>`.
#[inline]
pub fn subscription_map<K, V>() -> SubscriptionMap<K, V> {
    Arc::new(RwLock::new(HashMap::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscription_map_is_shared() {
        let map: SubscriptionMap<u32, DataCallback<u32>> = subscription_map();
        let other = Arc::clone(&map);
        other.write().insert(1, Box::new(|_| {}));
        assert_eq!(map.read().len(), 1);
    }

    #[test]
    fn test_data_callback_invoked() {
        let seen = Arc::new(RwLock::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: DataCallback<&str> = Box::new(move |value| sink.write().push(value.to_string()));
        callback("ok");
        assert_eq!(*seen.read(), vec!["ok".to_string()]);
    }
}
