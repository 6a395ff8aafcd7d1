//! Order sync pipeline.
//!
//! This crate moves orders from one source store to many destination stores
//! and carries fulfillment tracking back. Each cycle runs four stages:
//! 1. Poll the source for new orders
//! 2. Route order lines to destinations and dispatch remote orders
//! 3. Poll destinations for tracking
//! 4. Push tracking back to the source
//!
//! Every stage is idempotent, so a cycle interrupted at any point can simply
//! be run again.

pub mod config;
pub mod connector;
pub mod error;
pub mod guard;
pub mod orchestrator;
pub mod report;

pub use config::SyncConfig;
pub use connector::{
    ConnectorFactory, ConnectorRegistry, DispatchLine, DispatchRequest, FetchedOrders,
    InMemoryConnector, InMemoryConnectorFactory, ShopifyConnector, ShopifyConnectorFactory,
    StoreConnector, TrackingPush,
};
pub use error::{ConnectorError, Result, SyncError};
pub use guard::{DispatchClaim, DispatchGuard};
pub use orchestrator::{CycleContext, SyncOrchestrator};
pub use report::{
    CycleReport, DispatchReport, PollReport, RoutingReport, SyncBackReport, TrackingReport,
};
