//! Per-cycle counts returned by the orchestrator.

use chrono::{DateTime, Utc};
use common::StoreId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollReport {
    pub fetched: usize,
    pub imported: usize,
    pub refreshed: usize,
    /// Already past `New`; the source copy was ignored.
    pub unchanged: usize,
    /// Exact repeats of an order seen earlier in the same batch.
    pub duplicates: usize,
    pub quarantined: usize,
    pub failed: usize,
    pub cursor_advanced: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingReport {
    pub routed: usize,
    /// Orders with at least one line no rule matched.
    pub routing_gaps: usize,
    /// Orders younger than the settle delay.
    pub deferred: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReport {
    pub created: usize,
    pub already_dispatched: usize,
    pub in_flight: usize,
    pub failed: usize,
    /// Orders moved to `Dispatched`.
    pub orders_dispatched: usize,
    /// Orders moved to `Error` after a destination rejected them.
    pub orders_errored: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingReport {
    pub polled: usize,
    pub updated: usize,
    /// Dispatched more recently than the tracking delay.
    pub not_due: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBackReport {
    pub pushed: usize,
    pub failed: usize,
    pub orders_tracking: usize,
    pub orders_synced: usize,
}

/// Outcome of one full cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub poll: PollReport,
    pub routing: RoutingReport,
    pub dispatch: DispatchReport,
    pub tracking: TrackingReport,
    pub sync_back: SyncBackReport,
    /// Stores whose credentials were refused during this cycle.
    pub halted_stores: Vec<StoreId>,
}
