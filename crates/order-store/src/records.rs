use chrono::{DateTime, Utc};
use common::{OrderId, StoreId};
use domain::OrderStatus;
use serde::{Deserialize, Serialize};

/// What `upsert_order` did with an incoming source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First time this native id was seen.
    Inserted(OrderId),
    /// The order was still `New` and its snapshot was replaced.
    Refreshed(OrderId),
    /// The order has progressed past `New`; the incoming copy was ignored.
    Unchanged { order_id: OrderId, status: OrderStatus },
}

impl UpsertOutcome {
    pub fn order_id(&self) -> OrderId {
        match self {
            UpsertOutcome::Inserted(id) | UpsertOutcome::Refreshed(id) => *id,
            UpsertOutcome::Unchanged { order_id, .. } => *order_id,
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// A source order that failed validation, kept for inspection.
///
/// One record per (source store, native id); re-quarantining replaces it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedOrder {
    pub source_store_id: StoreId,
    pub native_id: String,
    pub reason: String,
    pub payload: serde_json::Value,
    pub quarantined_at: DateTime<Utc>,
}

impl QuarantinedOrder {
    pub fn new(
        source_store_id: StoreId,
        native_id: impl Into<String>,
        reason: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            source_store_id,
            native_id: native_id.into(),
            reason: reason.into(),
            payload,
            quarantined_at: Utc::now(),
        }
    }
}
