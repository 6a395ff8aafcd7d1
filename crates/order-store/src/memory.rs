use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Cursor, DispatchId, OrderId, StoreId};
use domain::{
    DomainError, LineBinding, Order, OrderStatus, RawOrder, RoutedDispatch, RoutingRule, Store,
    TrackingState,
};
use tokio::sync::RwLock;

use crate::{OrderRepository, QuarantinedOrder, RepositoryError, Result, UpsertOutcome};

#[derive(Default)]
struct State {
    stores: Vec<Store>,
    rules: Vec<RoutingRule>,
    orders: Vec<Order>,
    dispatches: Vec<RoutedDispatch>,
    cursors: HashMap<StoreId, Cursor>,
    quarantined: Vec<QuarantinedOrder>,
}

impl State {
    fn order_mut(&mut self, id: OrderId) -> Result<&mut Order> {
        self.orders
            .iter_mut()
            .find(|o| o.id == id)
            .ok_or(RepositoryError::OrderNotFound(id))
    }

    fn dispatch_mut(&mut self, id: DispatchId) -> Result<&mut RoutedDispatch> {
        self.dispatches
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(RepositoryError::DispatchNotFound(id))
    }
}

#[derive(Default)]
struct Faults {
    upsert_native_ids: Vec<String>,
    save_cursor: bool,
}

/// In-memory repository used by tests and by `syncd` when no database is
/// configured.
///
/// A single lock guards all state, so every method is atomic.
#[derive(Clone, Default)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<State>>,
    faults: Arc<std::sync::RwLock<Faults>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `upsert_order` fail for the given native id.
    pub fn set_fail_on_upsert(&self, native_id: impl Into<String>) {
        if let Ok(mut faults) = self.faults.write() {
            faults.upsert_native_ids.push(native_id.into());
        }
    }

    /// Makes `save_cursor` fail.
    pub fn set_fail_on_save_cursor(&self, fail: bool) {
        if let Ok(mut faults) = self.faults.write() {
            faults.save_cursor = fail;
        }
    }

    /// Clears all injected failures.
    pub fn clear_faults(&self) {
        if let Ok(mut faults) = self.faults.write() {
            *faults = Faults::default();
        }
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    pub async fn dispatch_count(&self) -> usize {
        self.state.read().await.dispatches.len()
    }

    fn should_fail_upsert(&self, native_id: &str) -> bool {
        self.faults
            .read()
            .map(|f| f.upsert_native_ids.iter().any(|id| id == native_id))
            .unwrap_or(false)
    }

    fn should_fail_save_cursor(&self) -> bool {
        self.faults.read().map(|f| f.save_cursor).unwrap_or(false)
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn save_store(&self, store: Store) -> Result<()> {
        let mut state = self.state.write().await;
        match state.stores.iter_mut().find(|s| s.id == store.id) {
            Some(existing) => *existing = store,
            None => state.stores.push(store),
        }
        Ok(())
    }

    async fn get_store(&self, id: StoreId) -> Result<Option<Store>> {
        let state = self.state.read().await;
        Ok(state.stores.iter().find(|s| s.id == id).cloned())
    }

    async fn list_stores(&self) -> Result<Vec<Store>> {
        Ok(self.state.read().await.stores.clone())
    }

    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<()> {
        let mut state = self.state.write().await;
        match state.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => state.rules.push(rule),
        }
        Ok(())
    }

    async fn list_routing_rules(&self, source: StoreId) -> Result<Vec<RoutingRule>> {
        let state = self.state.read().await;
        Ok(state
            .rules
            .iter()
            .filter(|r| r.source_store_id == source && r.active)
            .cloned()
            .collect())
    }

    async fn upsert_order(&self, source: StoreId, raw: &RawOrder) -> Result<UpsertOutcome> {
        if self.should_fail_upsert(&raw.native_id) {
            return Err(RepositoryError::Unavailable(format!(
                "write refused for order {}",
                raw.native_id
            )));
        }

        let mut state = self.state.write().await;
        let existing = state
            .orders
            .iter_mut()
            .find(|o| o.source_store_id == source && o.native_id == raw.native_id);

        match existing {
            Some(order) => {
                let order_id = order.id;
                if order.refresh_from(raw) {
                    Ok(UpsertOutcome::Refreshed(order_id))
                } else {
                    Ok(UpsertOutcome::Unchanged {
                        order_id,
                        status: order.status,
                    })
                }
            }
            None => {
                let order = Order::import(source, raw, Utc::now());
                let order_id = order.id;
                state.orders.push(order);
                Ok(UpsertOutcome::Inserted(order_id))
            }
        }
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.iter().find(|o| o.id == id).cloned())
    }

    async fn find_order(&self, source: StoreId, native_id: &str) -> Result<Option<Order>> {
        let state = self.state.read().await;
        Ok(state
            .orders
            .iter()
            .find(|o| o.source_store_id == source && o.native_id == native_id)
            .cloned())
    }

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let state = self.state.read().await;
        let mut orders: Vec<_> = state
            .orders
            .iter()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn assign_lines(&self, order_id: OrderId, bindings: &[LineBinding]) -> Result<()> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        order.bind_lines(bindings)?;
        Ok(())
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        let mut state = self.state.write().await;
        let order = state.order_mut(order_id)?;
        if order.status != expected {
            return Err(RepositoryError::StatusConflict {
                order_id,
                expected,
                actual: order.status,
            });
        }
        order.transition(next, Utc::now())?;
        Ok(order.clone())
    }

    async fn get_dispatch(
        &self,
        order_id: OrderId,
        destination: StoreId,
    ) -> Result<Option<RoutedDispatch>> {
        let state = self.state.read().await;
        Ok(state
            .dispatches
            .iter()
            .find(|d| d.order_id == order_id && d.destination_store_id == destination)
            .cloned())
    }

    async fn dispatches_for_order(&self, order_id: OrderId) -> Result<Vec<RoutedDispatch>> {
        let state = self.state.read().await;
        Ok(state
            .dispatches
            .iter()
            .filter(|d| d.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn insert_dispatch(&self, dispatch: RoutedDispatch) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.orders.iter().any(|o| o.id == dispatch.order_id) {
            return Err(RepositoryError::OrderNotFound(dispatch.order_id));
        }
        if state.dispatches.iter().any(|d| {
            d.order_id == dispatch.order_id
                && d.destination_store_id == dispatch.destination_store_id
        }) {
            return Err(RepositoryError::DispatchExists {
                order_id: dispatch.order_id,
                destination: dispatch.destination_store_id,
            });
        }
        state.dispatches.push(dispatch);
        Ok(())
    }

    async fn open_dispatches(&self) -> Result<Vec<RoutedDispatch>> {
        let state = self.state.read().await;
        Ok(state
            .dispatches
            .iter()
            .filter(|d| !d.tracking.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn record_tracking(
        &self,
        id: DispatchId,
        tracking: TrackingState,
        polled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let dispatch = state.dispatch_mut(id)?;
        Ok(dispatch.observe_tracking(tracking, polled_at))
    }

    async fn pending_sync_back(&self) -> Result<Vec<RoutedDispatch>> {
        let state = self.state.read().await;
        Ok(state
            .dispatches
            .iter()
            .filter(|d| d.pending_sync_back)
            .cloned()
            .collect())
    }

    async fn confirm_pushed(
        &self,
        id: DispatchId,
        revision: i64,
        pushed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        let dispatch = state.dispatch_mut(id)?;
        Ok(dispatch.confirm_pushed(revision, pushed_at))
    }

    async fn load_cursor(&self, store: StoreId) -> Result<Option<Cursor>> {
        Ok(self.state.read().await.cursors.get(&store).cloned())
    }

    async fn save_cursor(&self, store: StoreId, cursor: &Cursor) -> Result<()> {
        if self.should_fail_save_cursor() {
            return Err(RepositoryError::Unavailable(
                "cursor write refused".to_string(),
            ));
        }
        self.state
            .write()
            .await
            .cursors
            .insert(store, cursor.clone());
        Ok(())
    }

    async fn quarantine(&self, record: QuarantinedOrder) -> Result<()> {
        let mut state = self.state.write().await;
        match state.quarantined.iter_mut().find(|q| {
            q.source_store_id == record.source_store_id && q.native_id == record.native_id
        }) {
            Some(existing) => *existing = record,
            None => state.quarantined.push(record),
        }
        Ok(())
    }

    async fn list_quarantined(&self, source: StoreId) -> Result<Vec<QuarantinedOrder>> {
        let state = self.state.read().await;
        Ok(state
            .quarantined
            .iter()
            .filter(|q| q.source_store_id == source)
            .cloned()
            .collect())
    }
}
