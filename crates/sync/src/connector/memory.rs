//! In-memory connector for tests and local runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::{Cursor, StoreId};
use domain::{RawOrder, Store, TrackingState};

use super::{ConnectorFactory, DispatchRequest, FetchedOrders, StoreConnector, TrackingPush};
use crate::error::ConnectorError;

#[derive(Debug, Default)]
struct InMemoryConnectorState {
    source_orders: Vec<RawOrder>,
    created: Vec<DispatchRequest>,
    remote_by_key: HashMap<String, String>,
    tracking: HashMap<String, TrackingState>,
    pushes: Vec<TrackingPush>,
    next_id: u32,
    calls: usize,
    fail_on_fetch: Option<ConnectorError>,
    fail_on_create: Option<ConnectorError>,
    fail_on_tracking: Option<ConnectorError>,
    fail_on_push: Option<ConnectorError>,
    delay: Option<Duration>,
}

/// In-memory store connector.
///
/// Acts as a source (orders queued with [`push_source_order`]) and as a
/// destination (created orders are recorded, tracking is scripted with
/// [`set_tracking`]). The cursor is the number of source orders already
/// handed out.
///
/// [`push_source_order`]: InMemoryConnector::push_source_order
/// [`set_tracking`]: InMemoryConnector::set_tracking
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnector {
    state: Arc<RwLock<InMemoryConnectorState>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> RwLockWriteGuard<'_, InMemoryConnectorState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues an order to be returned by the next fetch.
    pub fn push_source_order(&self, order: RawOrder) {
        self.state().source_orders.push(order);
    }

    /// Sets the tracking state reported for a remote order.
    pub fn set_tracking(&self, remote_order_id: &str, tracking: TrackingState) {
        self.state()
            .tracking
            .insert(remote_order_id.to_string(), tracking);
    }

    pub fn set_fail_on_fetch(&self, error: Option<ConnectorError>) {
        self.state().fail_on_fetch = error;
    }

    pub fn set_fail_on_create(&self, error: Option<ConnectorError>) {
        self.state().fail_on_create = error;
    }

    pub fn set_fail_on_tracking(&self, error: Option<ConnectorError>) {
        self.state().fail_on_tracking = error;
    }

    pub fn set_fail_on_push(&self, error: Option<ConnectorError>) {
        self.state().fail_on_push = error;
    }

    /// Delays every call, to exercise timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state().delay = delay;
    }

    /// Orders accepted by `create_order`, without idempotent replays.
    pub fn created_orders(&self) -> Vec<DispatchRequest> {
        self.state().created.clone()
    }

    pub fn create_count(&self) -> usize {
        self.state().created.len()
    }

    /// Remote id assigned to an idempotency key, if any.
    pub fn remote_id_for(&self, idempotency_key: &str) -> Option<String> {
        self.state().remote_by_key.get(idempotency_key).cloned()
    }

    /// Tracking pushes received, in order.
    pub fn pushes(&self) -> Vec<TrackingPush> {
        self.state().pushes.clone()
    }

    /// Total number of connector calls, failed ones included.
    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Counts the call and returns the configured delay.
    fn begin_call(&self) -> Option<Duration> {
        let mut state = self.state();
        state.calls += 1;
        state.delay
    }

    async fn simulate_latency(&self) {
        if let Some(delay) = self.begin_call() {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl StoreConnector for InMemoryConnector {
    async fn fetch_new_orders(&self, since: Option<&Cursor>) -> Result<FetchedOrders, ConnectorError> {
        self.simulate_latency().await;
        let state = self.state();
        if let Some(err) = &state.fail_on_fetch {
            return Err(err.clone());
        }

        let start = match since {
            Some(cursor) => cursor
                .as_str()
                .parse::<usize>()
                .map_err(|_| ConnectorError::Malformed(format!("bad cursor '{cursor}'")))?,
            None => 0,
        };
        let orders: Vec<RawOrder> = state.source_orders.iter().skip(start).cloned().collect();
        let next_cursor = if orders.is_empty() {
            None
        } else {
            Some(Cursor::new(state.source_orders.len().to_string()))
        };

        Ok(FetchedOrders {
            orders,
            next_cursor,
        })
    }

    async fn create_order(&self, request: &DispatchRequest) -> Result<String, ConnectorError> {
        self.simulate_latency().await;
        let mut state = self.state();
        if let Some(err) = &state.fail_on_create {
            return Err(err.clone());
        }
        if let Some(remote_id) = state.remote_by_key.get(&request.idempotency_key) {
            return Ok(remote_id.clone());
        }

        state.next_id += 1;
        let remote_id = format!("REMOTE-{:04}", state.next_id);
        state
            .remote_by_key
            .insert(request.idempotency_key.clone(), remote_id.clone());
        state.created.push(request.clone());
        Ok(remote_id)
    }

    async fn fetch_tracking(&self, remote_order_id: &str) -> Result<TrackingState, ConnectorError> {
        self.simulate_latency().await;
        let state = self.state();
        if let Some(err) = &state.fail_on_tracking {
            return Err(err.clone());
        }
        if let Some(tracking) = state.tracking.get(remote_order_id) {
            return Ok(tracking.clone());
        }
        if state.remote_by_key.values().any(|id| id == remote_order_id) {
            return Ok(TrackingState::default());
        }
        Err(ConnectorError::Rejected(format!(
            "unknown order {remote_order_id}"
        )))
    }

    async fn push_tracking_update(&self, push: &TrackingPush) -> Result<(), ConnectorError> {
        self.simulate_latency().await;
        let mut state = self.state();
        if let Some(err) = &state.fail_on_push {
            return Err(err.clone());
        }
        state.pushes.push(push.clone());
        Ok(())
    }
}

/// Hands out pre-registered in-memory connectors by store id.
#[derive(Debug, Clone, Default)]
pub struct InMemoryConnectorFactory {
    connectors: Arc<RwLock<HashMap<StoreId, InMemoryConnector>>>,
    connects: Arc<AtomicUsize>,
}

impl InMemoryConnectorFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, store_id: StoreId, connector: InMemoryConnector) {
        self.connectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(store_id, connector);
    }

    /// Number of times `connect` was called.
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectorFactory for InMemoryConnectorFactory {
    async fn connect(&self, store: &Store) -> Result<Arc<dyn StoreConnector>, ConnectorError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let connectors = self
            .connectors
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match connectors.get(&store.id) {
            Some(connector) => Ok(Arc::new(connector.clone())),
            None => Err(ConnectorError::Rejected(format!(
                "no in-memory connector for store {}",
                store.name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::OrderId;
    use domain::{FulfillmentStatus, LookupMethod, RawOrderLine};

    use super::*;

    fn raw(native_id: &str) -> RawOrder {
        RawOrder {
            native_id: native_id.to_string(),
            order_number: None,
            placed_at: Utc::now(),
            payload: serde_json::json!({}),
            lines: vec![RawOrderLine::new("A", 1)],
        }
    }

    fn request(key: &str) -> DispatchRequest {
        DispatchRequest {
            idempotency_key: key.to_string(),
            order_id: OrderId::new(),
            source_order_number: "#1".to_string(),
            source_store_name: "Main".to_string(),
            lookup: LookupMethod::Sku,
            lines: vec![],
            payload: serde_json::json!({}),
        }
    }

    #[tokio::test]
    async fn test_fetch_resumes_from_cursor() {
        let connector = InMemoryConnector::new();
        connector.push_source_order(raw("1"));
        connector.push_source_order(raw("2"));

        let first = connector.fetch_new_orders(None).await.unwrap();
        assert_eq!(first.orders.len(), 2);
        let cursor = first.next_cursor.unwrap();

        let empty = connector.fetch_new_orders(Some(&cursor)).await.unwrap();
        assert!(empty.orders.is_empty());
        assert!(empty.next_cursor.is_none());

        connector.push_source_order(raw("3"));
        let next = connector.fetch_new_orders(Some(&cursor)).await.unwrap();
        assert_eq!(next.orders[0].native_id, "3");
    }

    #[tokio::test]
    async fn test_create_is_idempotent_per_key() {
        let connector = InMemoryConnector::new();
        let a = connector.create_order(&request("k1")).await.unwrap();
        let b = connector.create_order(&request("k1")).await.unwrap();
        let c = connector.create_order(&request("k2")).await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(connector.create_count(), 2);
        assert_eq!(connector.remote_id_for("k1"), Some(a));
    }

    #[tokio::test]
    async fn test_tracking_defaults_to_unfulfilled_for_known_orders() {
        let connector = InMemoryConnector::new();
        let remote = connector.create_order(&request("k1")).await.unwrap();

        let tracking = connector.fetch_tracking(&remote).await.unwrap();
        assert_eq!(tracking.status, FulfillmentStatus::Unfulfilled);
        assert!(connector.fetch_tracking("nope").await.is_err());

        connector.set_tracking(&remote, TrackingState::shipped("UPS", "1Z"));
        let tracking = connector.fetch_tracking(&remote).await.unwrap();
        assert_eq!(tracking.tracking_number.as_deref(), Some("1Z"));
    }

    #[tokio::test]
    async fn test_injected_failures_are_returned() {
        let connector = InMemoryConnector::new();
        connector.set_fail_on_push(Some(ConnectorError::Auth("401".into())));

        let push = TrackingPush {
            source_order_id: "1".to_string(),
            lines: vec![],
            covers_whole_order: true,
            tracking: TrackingState::default(),
        };
        let err = connector
            .push_tracking_update(&push)
            .await
            .unwrap_err();
        assert!(err.is_auth());
        assert!(connector.pushes().is_empty());
        assert_eq!(connector.call_count(), 1);
    }
}
