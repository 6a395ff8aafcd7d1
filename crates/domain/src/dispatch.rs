//! Remote orders created at destinations and their tracking state.

use chrono::{DateTime, Utc};
use common::{DispatchId, LineId, OrderId, StoreId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::routing::LookupMethod;

/// Fulfillment progress reported by a destination.
///
/// Progress order:
/// ```text
/// Unfulfilled ──► Partial ──► Fulfilled ──► Delivered
///      │             │
///      └─────────────┴──► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentStatus {
    #[default]
    Unfulfilled,
    Partial,
    Fulfilled,
    Delivered,
    Cancelled,
}

impl FulfillmentStatus {
    fn rank(&self) -> u8 {
        match self {
            FulfillmentStatus::Unfulfilled => 0,
            FulfillmentStatus::Partial => 1,
            FulfillmentStatus::Fulfilled => 2,
            FulfillmentStatus::Delivered => 3,
            FulfillmentStatus::Cancelled => 4,
        }
    }

    /// Returns true once no further polling is needed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FulfillmentStatus::Fulfilled | FulfillmentStatus::Delivered | FulfillmentStatus::Cancelled
        )
    }

    /// Returns true if moving from `self` to `next` is forward progress.
    ///
    /// Cancellation is accepted from any non-terminal status. Same-status
    /// moves are allowed so that tracking details can be filled in.
    pub fn can_advance_to(&self, next: FulfillmentStatus) -> bool {
        match next {
            FulfillmentStatus::Cancelled => !self.is_terminal() || *self == next,
            _ if *self == FulfillmentStatus::Cancelled => false,
            _ => next.rank() >= self.rank(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FulfillmentStatus::Unfulfilled => "unfulfilled",
            FulfillmentStatus::Partial => "partial",
            FulfillmentStatus::Fulfilled => "fulfilled",
            FulfillmentStatus::Delivered => "delivered",
            FulfillmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Result<Self, DomainError> {
        match value {
            "unfulfilled" => Ok(FulfillmentStatus::Unfulfilled),
            "partial" => Ok(FulfillmentStatus::Partial),
            "fulfilled" => Ok(FulfillmentStatus::Fulfilled),
            "delivered" => Ok(FulfillmentStatus::Delivered),
            "cancelled" => Ok(FulfillmentStatus::Cancelled),
            other => Err(DomainError::UnknownValue {
                kind: "fulfillment status",
                value: other.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FulfillmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracking details as confirmed by a destination.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TrackingState {
    pub status: FulfillmentStatus,
    pub carrier: Option<String>,
    pub tracking_number: Option<String>,
    pub tracking_url: Option<String>,
}

impl TrackingState {
    pub fn new(status: FulfillmentStatus) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    /// A shipped state with carrier and tracking number.
    pub fn shipped(carrier: impl Into<String>, tracking_number: impl Into<String>) -> Self {
        Self {
            status: FulfillmentStatus::Fulfilled,
            carrier: Some(carrier.into()),
            tracking_number: Some(tracking_number.into()),
            tracking_url: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.tracking_url = Some(url.into());
        self
    }

    /// Returns true if `next` should replace `self`.
    ///
    /// Identical states and backwards (out-of-order) states are ignored.
    pub fn should_accept(&self, next: &TrackingState) -> bool {
        self != next && self.status.can_advance_to(next.status)
    }
}

/// A remote order created at one destination for a subset of an order's lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutedDispatch {
    pub id: DispatchId,
    pub order_id: OrderId,
    pub destination_store_id: StoreId,
    pub remote_order_id: String,
    pub idempotency_key: String,
    pub lookup: LookupMethod,
    pub line_ids: Vec<LineId>,
    pub tracking: TrackingState,
    /// Incremented every time a new tracking state is recorded.
    pub tracking_revision: i64,
    /// Set when `tracking` has not yet been pushed to the source.
    pub pending_sync_back: bool,
    pub dispatched_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub last_pushed_at: Option<DateTime<Utc>>,
}

impl RoutedDispatch {
    /// Records a freshly created remote order.
    pub fn created(
        order_id: OrderId,
        destination_store_id: StoreId,
        remote_order_id: impl Into<String>,
        lookup: LookupMethod,
        line_ids: Vec<LineId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: DispatchId::new(),
            order_id,
            destination_store_id,
            remote_order_id: remote_order_id.into(),
            idempotency_key: idempotency_key(order_id, destination_store_id),
            lookup,
            line_ids,
            tracking: TrackingState::default(),
            tracking_revision: 0,
            pending_sync_back: false,
            dispatched_at: now,
            last_polled_at: None,
            last_pushed_at: None,
        }
    }

    /// Records a tracking update if it is forward progress.
    ///
    /// Returns true when the state changed and now awaits sync-back.
    pub fn observe_tracking(&mut self, next: TrackingState, now: DateTime<Utc>) -> bool {
        self.last_polled_at = Some(now);
        if !self.tracking.should_accept(&next) {
            return false;
        }
        self.tracking = next;
        self.tracking_revision += 1;
        self.pending_sync_back = true;
        true
    }

    /// Clears the pending flag if nothing newer was recorded since `revision`.
    pub fn confirm_pushed(&mut self, revision: i64, now: DateTime<Utc>) -> bool {
        if self.tracking_revision != revision {
            return false;
        }
        self.pending_sync_back = false;
        self.last_pushed_at = Some(now);
        true
    }

    /// Terminal at the destination and nothing left to push.
    pub fn is_settled(&self) -> bool {
        self.tracking.status.is_terminal() && !self.pending_sync_back
    }
}

/// Key handed to destinations so retried creates can be deduplicated.
pub fn idempotency_key(order_id: OrderId, destination: StoreId) -> String {
    format!("{order_id}:{destination}")
}
