//! Shared identifier types for the order sync engine.

mod types;

pub use types::{Cursor, DispatchId, LineId, OrderId, RuleId, StoreId};
