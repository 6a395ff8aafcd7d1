//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The sync status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// New ──► Routed ──► Dispatched ──┬──► Tracking ──► Synced
///  │        │            │        └──────────────► Synced
///  └────────┴────────────┴─────────────┴──► Error
/// ```
///
/// Transitions only ever move forward; `Synced` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Imported from the source, no line has been routed yet.
    #[default]
    New,

    /// At least one line has a destination; dispatch pending.
    Routed,

    /// Every assigned destination has a remote order.
    Dispatched,

    /// At least one tracking update has been pushed back to the source.
    Tracking,

    /// Every dispatch reached a terminal tracking state and was pushed (terminal state).
    Synced,

    /// A destination permanently refused the order (terminal state).
    Error,
}

impl OrderStatus {
    /// Position along the forward path. `Error` sorts after everything.
    fn rank(&self) -> u8 {
        match self {
            OrderStatus::New => 0,
            OrderStatus::Routed => 1,
            OrderStatus::Dispatched => 2,
            OrderStatus::Tracking => 3,
            OrderStatus::Synced => 4,
            OrderStatus::Error => 5,
        }
    }

    /// Returns true if an order in this state may be moved to `next`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (New, Routed) | (Routed, Dispatched) => true,
            (Dispatched, Tracking) | (Dispatched, Synced) | (Tracking, Synced) => true,
            (from, Error) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Returns true if the payload snapshot may still be refreshed from the source.
    pub fn accepts_source_updates(&self) -> bool {
        matches!(self, OrderStatus::New)
    }

    /// Returns true if tracking pushes may advance this order's status.
    pub fn awaits_tracking(&self) -> bool {
        matches!(self, OrderStatus::Dispatched | OrderStatus::Tracking)
    }

    /// Returns true if this is a terminal state (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Synced | OrderStatus::Error)
    }

    /// Returns true if `self` is strictly further along than `other`.
    pub fn is_after(&self, other: OrderStatus) -> bool {
        self.rank() > other.rank()
    }

    /// Returns the status name as stored and logged.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "new",
            OrderStatus::Routed => "routed",
            OrderStatus::Dispatched => "dispatched",
            OrderStatus::Tracking => "tracking",
            OrderStatus::Synced => "synced",
            OrderStatus::Error => "error",
        }
    }

    /// Parses the stored representation.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(OrderStatus::New),
            "routed" => Some(OrderStatus::Routed),
            "dispatched" => Some(OrderStatus::Dispatched),
            "tracking" => Some(OrderStatus::Tracking),
            "synced" => Some(OrderStatus::Synced),
            "error" => Some(OrderStatus::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
