use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Cursor, DispatchId, OrderId, StoreId};
use domain::{LineBinding, Order, OrderStatus, RawOrder, RoutedDispatch, RoutingRule, Store, TrackingState};

use crate::{QuarantinedOrder, RepositoryError, Result, UpsertOutcome};

/// Durable state of the sync engine.
///
/// Every method is a single atomic unit: a failure leaves nothing half
/// written. All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Inserts or replaces a store by id.
    async fn save_store(&self, store: Store) -> Result<()>;

    async fn get_store(&self, id: StoreId) -> Result<Option<Store>>;

    /// All stores in the order they were first saved.
    async fn list_stores(&self) -> Result<Vec<Store>>;

    /// Inserts or replaces a rule by id. Replacing keeps the original
    /// insertion position.
    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<()>;

    /// Active rules for a source store, in insertion order.
    async fn list_routing_rules(&self, source: StoreId) -> Result<Vec<RoutingRule>>;

    /// Imports a validated source order keyed by (source, native id).
    ///
    /// A known order is refreshed only while it is still `New`; later
    /// statuses are never touched by the source.
    async fn upsert_order(&self, source: StoreId, raw: &RawOrder) -> Result<UpsertOutcome>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn find_order(&self, source: StoreId, native_id: &str) -> Result<Option<Order>>;

    /// Orders currently in `status`, oldest first.
    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    /// Binds lines to destinations, all or nothing.
    ///
    /// Rebinding a line to its current destination is a no-op; any other
    /// rebinding fails with `LineAlreadyAssigned`.
    async fn assign_lines(&self, order_id: OrderId, bindings: &[LineBinding]) -> Result<()>;

    /// Moves an order from `expected` to `next`.
    ///
    /// Fails with `StatusConflict` if the order is no longer in `expected`,
    /// and with `InvalidTransition` if the move is not allowed.
    async fn transition_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order>;

    async fn get_dispatch(
        &self,
        order_id: OrderId,
        destination: StoreId,
    ) -> Result<Option<RoutedDispatch>>;

    async fn dispatches_for_order(&self, order_id: OrderId) -> Result<Vec<RoutedDispatch>>;

    /// Records a remote order. At most one dispatch may exist per
    /// (order, destination); a second insert fails with `DispatchExists`.
    async fn insert_dispatch(&self, dispatch: RoutedDispatch) -> Result<()>;

    /// Dispatches whose destination status is not yet terminal.
    async fn open_dispatches(&self) -> Result<Vec<RoutedDispatch>>;

    /// Stores a polled tracking state.
    ///
    /// Returns true if the state was forward progress and is now pending
    /// sync-back. The poll time is recorded either way.
    async fn record_tracking(
        &self,
        id: DispatchId,
        tracking: TrackingState,
        polled_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Dispatches with tracking not yet pushed to the source.
    async fn pending_sync_back(&self) -> Result<Vec<RoutedDispatch>>;

    /// Clears the pending flag if the tracking revision is still `revision`.
    ///
    /// Returns false when a newer state was recorded in the meantime.
    async fn confirm_pushed(
        &self,
        id: DispatchId,
        revision: i64,
        pushed_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn load_cursor(&self, store: StoreId) -> Result<Option<Cursor>>;

    async fn save_cursor(&self, store: StoreId, cursor: &Cursor) -> Result<()>;

    /// Records a malformed source order, replacing any earlier record.
    async fn quarantine(&self, record: QuarantinedOrder) -> Result<()>;

    async fn list_quarantined(&self, source: StoreId) -> Result<Vec<QuarantinedOrder>>;
}

/// Extension trait providing convenience methods for repositories.
#[async_trait]
pub trait OrderRepositoryExt: OrderRepository {
    /// Loads an order or fails with `OrderNotFound`.
    async fn require_order(&self, id: OrderId) -> Result<Order> {
        self.get_order(id)
            .await?
            .ok_or(RepositoryError::OrderNotFound(id))
    }

    /// Loads a store or fails with `StoreNotFound`.
    async fn require_store(&self, id: StoreId) -> Result<Store> {
        self.get_store(id)
            .await?
            .ok_or(RepositoryError::StoreNotFound(id))
    }

    async fn dispatch_exists(&self, order_id: OrderId, destination: StoreId) -> Result<bool> {
        Ok(self.get_dispatch(order_id, destination).await?.is_some())
    }
}

// Blanket implementation for all OrderRepository implementations
impl<T: OrderRepository + ?Sized> OrderRepositoryExt for T {}
