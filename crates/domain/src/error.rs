//! Domain error types.

use common::{LineId, OrderId, StoreId};
use thiserror::Error;

use crate::order::OrderStatus;

/// Errors raised by the domain model.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The state machine does not allow this move.
    #[error("Invalid status transition: cannot move from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    /// A line already has a different destination.
    #[error("Line {line_id} is already assigned to {existing}, refusing {requested}")]
    LineAlreadyAssigned {
        line_id: LineId,
        existing: StoreId,
        requested: StoreId,
    },

    /// A binding referenced a line the order does not have.
    #[error("Order {order_id} has no line {line_id}")]
    UnknownLine { order_id: OrderId, line_id: LineId },

    /// A source order failed validation and cannot be imported.
    #[error("Malformed order {native_id}: {reason}")]
    MalformedOrder { native_id: String, reason: String },

    /// A stored value could not be mapped back to a domain type.
    #[error("Unknown {kind} value: {value}")]
    UnknownValue { kind: &'static str, value: String },
}
