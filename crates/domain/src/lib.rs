//! Domain layer for the order sync engine.
//!
//! This crate provides:
//! - Stores and their roles (one source, many destinations)
//! - Imported orders, order lines and the order status state machine
//! - Routing rules and the pure routing engine
//! - Dispatches (remote orders at destinations) and their tracking state

pub mod dispatch;
pub mod error;
pub mod order;
pub mod routing;
pub mod store;

pub use dispatch::{FulfillmentStatus, RoutedDispatch, TrackingState, idempotency_key};
pub use error::DomainError;
pub use order::{MAX_LINE_QUANTITY, Order, OrderLine, OrderStatus, RawOrder, RawOrderLine};
pub use routing::{
    Assignment, LineBinding, LookupMethod, RoutingDecision, RoutingRule, RulePredicate,
    SkuPattern, route,
};
pub use store::{DEFAULT_API_VERSION, Store, StoreRole};
