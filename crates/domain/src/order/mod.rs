//! Imported orders, their lines and the order status state machine.

mod model;
mod raw;
mod status;

pub use model::{Order, OrderLine};
pub use raw::{MAX_LINE_QUANTITY, RawOrder, RawOrderLine};
pub use status::OrderStatus;
