//! In-flight guard for destination creates.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use common::{OrderId, StoreId};

type Key = (OrderId, StoreId);

/// Ensures at most one create call is in flight per (order, destination).
///
/// Shared by every cycle in the process. A claim is released when the
/// returned [`DispatchClaim`] is dropped.
#[derive(Debug, Clone, Default)]
pub struct DispatchGuard {
    in_flight: Arc<Mutex<HashSet<Key>>>,
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the pair, or returns `None` if another task holds it.
    pub fn try_claim(&self, order_id: OrderId, destination: StoreId) -> Option<DispatchClaim> {
        let key = (order_id, destination);
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert(key) {
            return None;
        }
        Some(DispatchClaim {
            in_flight: Arc::clone(&self.in_flight),
            key,
        })
    }

    pub fn is_claimed(&self, order_id: OrderId, destination: StoreId) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&(order_id, destination))
    }
}

/// Held while a create call is in flight.
#[derive(Debug)]
pub struct DispatchClaim {
    in_flight: Arc<Mutex<HashSet<Key>>>,
    key: Key,
}

impl Drop for DispatchClaim {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
