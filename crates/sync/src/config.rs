//! Engine-level settings.

use std::time::Duration;

use common::StoreId;

pub const DEFAULT_CONNECTOR_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MIN_ORDER_AGE: Duration = Duration::from_secs(300);
pub const DEFAULT_TRACKING_DELAY: Duration = Duration::from_secs(300);

/// Settings for a [`SyncOrchestrator`](crate::SyncOrchestrator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// The store orders are pulled from.
    pub source_store_id: StoreId,
    /// Upper bound on every connector call.
    pub connector_timeout: Duration,
    /// Orders younger than this (by placed-at) are not routed yet.
    pub min_order_age: Duration,
    /// Dispatches younger than this are not polled for tracking yet.
    pub tracking_delay: Duration,
}

impl SyncConfig {
    pub fn new(source_store_id: StoreId) -> Self {
        Self {
            source_store_id,
            connector_timeout: DEFAULT_CONNECTOR_TIMEOUT,
            min_order_age: DEFAULT_MIN_ORDER_AGE,
            tracking_delay: DEFAULT_TRACKING_DELAY,
        }
    }

    pub fn with_connector_timeout(mut self, timeout: Duration) -> Self {
        self.connector_timeout = timeout;
        self
    }

    pub fn with_min_order_age(mut self, age: Duration) -> Self {
        self.min_order_age = age;
        self
    }

    pub fn with_tracking_delay(mut self, delay: Duration) -> Self {
        self.tracking_delay = delay;
        self
    }
}
