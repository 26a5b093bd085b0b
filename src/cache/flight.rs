use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::OwnedMutexGuard;

type Slots = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// Per-key in-flight lock. Concurrent misses for one key queue behind the
/// first resolver instead of each invoking the inspector.
#[derive(Default, Clone)]
pub struct InFlight {
    slots: Slots,
}

/// Held while a key is being resolved. Dropping it lets the next waiter in
/// and forgets the slot once nobody else is queued.
pub struct FlightGuard {
    key: String,
    slots: Slots,
    _held: OwnedMutexGuard<()>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &str) -> FlightGuard {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.entry(key.to_string()).or_default().clone()
        };
        let held = slot.lock_owned().await;
        FlightGuard {
            key: key.to_string(),
            slots: self.slots.clone(),
            _held: held,
        }
    }

    /// Keys with a resolution running or queued.
    pub fn pending(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the map, one inside our own guard.
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) <= 2)
        {
            slots.remove(&self.key);
        }
    }
}
