//! The store connector capability and its implementations.
//!
//! The pipeline never branches on platform type; it only talks to
//! `StoreConnector` trait objects obtained from the [`ConnectorRegistry`].

pub mod memory;
pub mod registry;
pub mod shopify;

use async_trait::async_trait;
use common::{Cursor, LineId, OrderId};
use domain::{LookupMethod, Order, OrderLine, RawOrder, TrackingState};
use serde::{Deserialize, Serialize};

use crate::error::ConnectorError;

pub use memory::{InMemoryConnector, InMemoryConnectorFactory};
pub use registry::{ConnectorFactory, ConnectorRegistry};
pub use shopify::{ShopifyConnector, ShopifyConnectorFactory};

/// A page of source orders and the cursor to resume from.
#[derive(Debug, Clone, Default)]
pub struct FetchedOrders {
    pub orders: Vec<RawOrder>,
    /// `None` when nothing new was seen; the stored cursor is kept.
    pub next_cursor: Option<Cursor>,
}

/// One line of a dispatch request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchLine {
    pub line_id: LineId,
    /// The source platform's id for the line, if known.
    pub source_line_id: Option<String>,
    pub sku: Option<String>,
    pub product_id: Option<String>,
    pub ean: Option<String>,
    pub title: Option<String>,
    pub quantity: u32,
}

impl From<&OrderLine> for DispatchLine {
    fn from(line: &OrderLine) -> Self {
        Self {
            line_id: line.id,
            source_line_id: line.source_line_id.clone(),
            sku: line.sku.clone(),
            product_id: line.product_id.clone(),
            ean: line.ean.clone(),
            title: line.title.clone(),
            quantity: line.quantity,
        }
    }
}

/// Everything a destination needs to create its copy of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Stable per (order, destination); destinations may dedupe on it.
    pub idempotency_key: String,
    pub order_id: OrderId,
    /// Order number (or native id) at the source.
    pub source_order_number: String,
    pub source_store_name: String,
    pub lookup: LookupMethod,
    /// Only the lines assigned to this destination.
    pub lines: Vec<DispatchLine>,
    /// Source payload snapshot, for customer and address details.
    pub payload: serde_json::Value,
}

impl DispatchRequest {
    pub fn for_destination(
        order: &Order,
        lines: &[&OrderLine],
        idempotency_key: String,
        source_store_name: &str,
        lookup: LookupMethod,
    ) -> Self {
        Self {
            idempotency_key,
            order_id: order.id,
            source_order_number: order.display_ref().to_string(),
            source_store_name: source_store_name.to_string(),
            lookup,
            lines: lines.iter().map(|l| DispatchLine::from(*l)).collect(),
            payload: order.payload.clone(),
        }
    }
}

/// A destination's tracking state, addressed to the source order it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackingPush {
    pub source_order_id: String,
    /// The lines this destination handled.
    pub lines: Vec<DispatchLine>,
    /// True when the destination handled every line of the source order.
    pub covers_whole_order: bool,
    pub tracking: TrackingState,
}

impl TrackingPush {
    /// Builds the push for one dispatch of `order`.
    pub fn for_dispatch(order: &Order, line_ids: &[LineId], tracking: TrackingState) -> Self {
        let lines: Vec<DispatchLine> = order
            .lines
            .iter()
            .filter(|l| line_ids.contains(&l.id))
            .map(DispatchLine::from)
            .collect();
        Self {
            source_order_id: order.native_id.clone(),
            covers_whole_order: lines.len() == order.lines.len(),
            lines,
            tracking,
        }
    }
}

/// Uniform operations every store platform offers.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    /// Fetches orders created or updated after `since`.
    ///
    /// With no cursor the connector applies its own default look-back.
    async fn fetch_new_orders(&self, since: Option<&Cursor>) -> Result<FetchedOrders, ConnectorError>;

    /// Creates an order at this store and returns its remote id.
    async fn create_order(&self, request: &DispatchRequest) -> Result<String, ConnectorError>;

    /// Reads the current fulfillment state of a remote order.
    async fn fetch_tracking(&self, remote_order_id: &str) -> Result<TrackingState, ConnectorError>;

    /// Writes a destination's tracking state back to an order at this store.
    ///
    /// Only the pushed lines are touched; a cancellation that does not cover
    /// the whole order must leave the rest of the order alone.
    async fn push_tracking_update(&self, push: &TrackingPush) -> Result<(), ConnectorError>;
}
