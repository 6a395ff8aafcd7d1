//! The four-stage sync pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use common::{OrderId, StoreId};
use domain::{
    LookupMethod, Order, OrderStatus, RawOrder, RoutedDispatch, RoutingRule, Store,
    idempotency_key, route,
};
use futures_util::future::join_all;
use order_store::{OrderRepository, QuarantinedOrder, RepositoryError, UpsertOutcome};

use crate::config::SyncConfig;
use crate::connector::{ConnectorRegistry, DispatchRequest, StoreConnector, TrackingPush};
use crate::error::{ConnectorError, Result, SyncError};
use crate::guard::DispatchGuard;
use crate::report::{
    CycleReport, DispatchReport, PollReport, RoutingReport, SyncBackReport, TrackingReport,
};

/// State shared by the stages of one cycle.
#[derive(Default)]
pub struct CycleContext {
    stores: HashMap<StoreId, Store>,
    halted: HashSet<StoreId>,
}

impl CycleContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_halted(&self, store_id: StoreId) -> bool {
        self.halted.contains(&store_id)
    }

    /// Returns true the first time a store is halted.
    fn halt(&mut self, store_id: StoreId) -> bool {
        self.halted.insert(store_id)
    }

    /// Halted stores in id order.
    pub fn halted_stores(&self) -> Vec<StoreId> {
        let mut halted: Vec<_> = self.halted.iter().copied().collect();
        halted.sort();
        halted
    }
}

enum DispatchOutcome {
    Created(RoutedDispatch),
    AlreadyExists,
    InFlight,
    Failed(ConnectorError),
    Persistence(RepositoryError),
}

/// Drives orders from the source store through routing, dispatch,
/// tracking and sync-back.
///
/// Each stage commits before the next begins. Failures of a single order or
/// destination are logged and counted; only failures that make the whole
/// stage meaningless (repository unreachable, source misconfigured) abort
/// the cycle.
pub struct SyncOrchestrator<R>
where
    R: OrderRepository,
{
    repo: R,
    registry: Arc<ConnectorRegistry>,
    config: SyncConfig,
    guard: DispatchGuard,
}

impl<R> SyncOrchestrator<R>
where
    R: OrderRepository,
{
    pub fn new(repo: R, registry: Arc<ConnectorRegistry>, config: SyncConfig) -> Self {
        Self {
            repo,
            registry,
            config,
            guard: DispatchGuard::new(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn guard(&self) -> &DispatchGuard {
        &self.guard
    }

    /// Runs all four stages once.
    #[tracing::instrument(skip(self), fields(source_store_id = %self.config.source_store_id))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        metrics::counter!("sync_cycles_total").increment(1);
        let started_at = Utc::now();
        let start = Instant::now();
        let mut ctx = CycleContext::new();

        let result = async {
            let poll = self.poll_source(&mut ctx).await?;
            let routing = self.route_pending(&mut ctx).await?;
            let dispatch = self.dispatch_routed(&mut ctx).await?;
            let tracking = self.poll_tracking(&mut ctx).await?;
            let sync_back = self.sync_back(&mut ctx).await?;
            Ok::<_, SyncError>((poll, routing, dispatch, tracking, sync_back))
        }
        .await;

        let duration = start.elapsed();
        metrics::histogram!("sync_cycle_duration_seconds").record(duration.as_secs_f64());

        let (poll, routing, dispatch, tracking, sync_back) = match result {
            Ok(stages) => stages,
            Err(e) => {
                metrics::counter!("sync_cycle_failures_total").increment(1);
                tracing::error!(error = %e, "sync cycle aborted");
                return Err(e);
            }
        };

        let report = CycleReport {
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            poll,
            routing,
            dispatch,
            tracking,
            sync_back,
            halted_stores: ctx.halted_stores(),
        };
        tracing::info!(
            imported = report.poll.imported,
            routed = report.routing.routed,
            dispatched = report.dispatch.created,
            tracking_updates = report.tracking.updated,
            pushed = report.sync_back.pushed,
            duration_ms = report.duration_ms,
            "sync cycle completed"
        );
        Ok(report)
    }

    /// Stage 1: pulls new orders from the source and upserts them.
    ///
    /// The cursor only advances when every order in the batch was either
    /// stored or quarantined.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn poll_source(&self, ctx: &mut CycleContext) -> Result<PollReport> {
        let mut report = PollReport::default();
        let (source, connector) = self.source(ctx).await?;
        if ctx.is_halted(source.id) {
            return Ok(report);
        }

        let cursor = self.repo.load_cursor(source.id).await?;
        let fetched = match self.call(connector.fetch_new_orders(cursor.as_ref())).await {
            Ok(fetched) => fetched,
            Err(e) => {
                tracing::warn!(store = %source.name, error_kind = e.kind(), error = %e, "failed to fetch source orders");
                self.halt_on_auth(ctx, &source, &e);
                report.failed += 1;
                return Ok(report);
            }
        };
        report.fetched = fetched.orders.len();

        let mut seen: HashMap<&str, &RawOrder> = HashMap::new();
        let mut batch_committed = true;

        for raw in &fetched.orders {
            if let Some(earlier) = seen.get(raw.native_id.as_str()) {
                if *earlier == raw {
                    report.duplicates += 1;
                } else if self
                    .quarantine(source.id, raw, "conflicting duplicate in batch".to_string())
                    .await
                {
                    report.quarantined += 1;
                } else {
                    batch_committed = false;
                }
                continue;
            }
            seen.insert(raw.native_id.as_str(), raw);

            if let Err(e) = raw.validate() {
                if self.quarantine(source.id, raw, e.to_string()).await {
                    report.quarantined += 1;
                } else {
                    batch_committed = false;
                }
                continue;
            }

            match self.repo.upsert_order(source.id, raw).await {
                Ok(UpsertOutcome::Inserted(order_id)) => {
                    metrics::counter!("sync_orders_imported_total").increment(1);
                    tracing::info!(native_id = %raw.native_id, %order_id, "imported order");
                    report.imported += 1;
                }
                Ok(UpsertOutcome::Refreshed(_)) => report.refreshed += 1,
                Ok(UpsertOutcome::Unchanged { .. }) => report.unchanged += 1,
                Err(e) => {
                    tracing::warn!(native_id = %raw.native_id, error = %e, "failed to store order");
                    report.failed += 1;
                    batch_committed = false;
                }
            }
        }

        if let Some(next) = fetched.next_cursor {
            if !batch_committed {
                tracing::warn!(cursor = ?cursor, "batch incomplete; cursor not advanced");
            } else if let Err(e) = self.repo.save_cursor(source.id, &next).await {
                tracing::warn!(error = %e, "failed to save cursor");
            } else {
                report.cursor_advanced = true;
            }
        }

        Ok(report)
    }

    /// Stage 2a: routes settled `New` orders.
    #[tracing::instrument(skip(self, _ctx))]
    pub async fn route_pending(&self, _ctx: &mut CycleContext) -> Result<RoutingReport> {
        let mut report = RoutingReport::default();
        let orders = self.repo.orders_with_status(OrderStatus::New).await?;
        let min_age = chrono::Duration::from_std(self.config.min_order_age)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let now = Utc::now();
        let mut rules: HashMap<StoreId, Vec<RoutingRule>> = HashMap::new();

        for order in orders {
            if now - order.placed_at < min_age {
                tracing::debug!(native_id = %order.native_id, "order too recent to route");
                report.deferred += 1;
                continue;
            }

            if !rules.contains_key(&order.source_store_id) {
                let loaded = self.repo.list_routing_rules(order.source_store_id).await?;
                rules.insert(order.source_store_id, loaded);
            }
            let source_rules = rules
                .get(&order.source_store_id)
                .map(Vec::as_slice)
                .unwrap_or_default();

            let decision = route(&order.lines, source_rules);
            let unrouted = decision.unrouted();
            if !unrouted.is_empty() {
                metrics::counter!("sync_routing_gaps_total").increment(1);
                tracing::warn!(
                    native_id = %order.native_id,
                    order_id = %order.id,
                    unrouted_lines = unrouted.len(),
                    "routing gap: no rule matched"
                );
                report.routing_gaps += 1;
            }
            if decision.is_empty_route() {
                continue;
            }

            if let Err(e) = self.repo.assign_lines(order.id, &decision.new_bindings()).await {
                tracing::warn!(order_id = %order.id, error = %e, "failed to assign lines");
                report.failed += 1;
                continue;
            }

            match self
                .repo
                .transition_status(order.id, OrderStatus::New, OrderStatus::Routed)
                .await
            {
                Ok(_) => {
                    tracing::info!(
                        order = order.display_ref(),
                        destinations = decision.destinations().len(),
                        "order routed"
                    );
                    report.routed += 1;
                }
                Err(RepositoryError::StatusConflict { actual, .. }) => {
                    tracing::debug!(order_id = %order.id, %actual, "order moved concurrently");
                }
                Err(e) => {
                    tracing::warn!(order_id = %order.id, error = %e, "failed to mark order routed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Stage 2b: creates remote orders for every `Routed` order.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn dispatch_routed(&self, ctx: &mut CycleContext) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        let orders = self.repo.orders_with_status(OrderStatus::Routed).await?;

        for order in orders {
            self.dispatch_order(ctx, &order, &mut report).await?;
        }

        Ok(report)
    }

    async fn dispatch_order(
        &self,
        ctx: &mut CycleContext,
        order: &Order,
        report: &mut DispatchReport,
    ) -> Result<()> {
        let destinations = order.assigned_destinations();
        if destinations.is_empty() {
            return Ok(());
        }
        let source_name = match self.store(ctx, order.source_store_id).await? {
            Some(store) => store.name,
            None => order.source_store_id.to_string(),
        };
        let existing = self.repo.dispatches_for_order(order.id).await?;

        let mut pending = Vec::new();
        for destination in &destinations {
            if existing
                .iter()
                .any(|d| d.destination_store_id == *destination)
            {
                report.already_dispatched += 1;
                continue;
            }
            if let Some((store, connector)) = self.connector(ctx, *destination).await? {
                pending.push((store, connector));
            } else {
                report.failed += 1;
            }
        }

        let attempts = pending.iter().map(|(store, connector)| {
            self.dispatch_one(order, store.id, connector.as_ref(), &source_name)
        });
        let outcomes = join_all(attempts).await;

        let mut rejected = false;
        for ((store, _), outcome) in pending.iter().zip(outcomes) {
            match outcome {
                DispatchOutcome::Created(dispatch) => {
                    metrics::counter!("sync_dispatches_created_total").increment(1);
                    tracing::info!(
                        order = order.display_ref(),
                        destination = %store.name,
                        remote_order_id = %dispatch.remote_order_id,
                        "dispatched order"
                    );
                    report.created += 1;
                }
                DispatchOutcome::AlreadyExists => report.already_dispatched += 1,
                DispatchOutcome::InFlight => {
                    tracing::debug!(order_id = %order.id, destination = %store.name, "dispatch already in flight");
                    report.in_flight += 1;
                }
                DispatchOutcome::Failed(e) => {
                    metrics::counter!("sync_dispatch_failures_total").increment(1);
                    tracing::warn!(
                        native_id = %order.native_id,
                        order_id = %order.id,
                        destination = %store.name,
                        error_kind = e.kind(),
                        error = %e,
                        "dispatch failed"
                    );
                    self.halt_on_auth(ctx, store, &e);
                    rejected |= matches!(e, ConnectorError::Rejected(_));
                    report.failed += 1;
                }
                DispatchOutcome::Persistence(e) => {
                    metrics::counter!("sync_dispatch_failures_total").increment(1);
                    tracing::warn!(order_id = %order.id, destination = %store.name, error = %e, "failed to record dispatch");
                    report.failed += 1;
                }
            }
        }

        if rejected {
            if self
                .transition(order.id, OrderStatus::Routed, OrderStatus::Error)
                .await?
            {
                tracing::error!(order = order.display_ref(), "destination rejected order; marked as error");
                report.orders_errored += 1;
            }
            return Ok(());
        }

        let dispatched = self.repo.dispatches_for_order(order.id).await?;
        let complete = destinations
            .iter()
            .all(|dest| dispatched.iter().any(|d| d.destination_store_id == *dest));
        if complete
            && self
                .transition(order.id, OrderStatus::Routed, OrderStatus::Dispatched)
                .await?
        {
            report.orders_dispatched += 1;
        }

        Ok(())
    }

    async fn dispatch_one(
        &self,
        order: &Order,
        destination: StoreId,
        connector: &dyn StoreConnector,
        source_name: &str,
    ) -> DispatchOutcome {
        let Some(_claim) = self.guard.try_claim(order.id, destination) else {
            return DispatchOutcome::InFlight;
        };

        match self.repo.get_dispatch(order.id, destination).await {
            Ok(Some(_)) => return DispatchOutcome::AlreadyExists,
            Ok(None) => {}
            Err(e) => return DispatchOutcome::Persistence(e),
        }

        let lines = order.lines_for(destination);
        let lookup = lines.first().map(|l| l.lookup).unwrap_or(LookupMethod::Sku);
        let request = DispatchRequest::for_destination(
            order,
            &lines,
            idempotency_key(order.id, destination),
            source_name,
            lookup,
        );

        let remote_order_id = match self.call(connector.create_order(&request)).await {
            Ok(id) => id,
            Err(e) => return DispatchOutcome::Failed(e),
        };

        let dispatch = RoutedDispatch::created(
            order.id,
            destination,
            remote_order_id,
            lookup,
            lines.iter().map(|l| l.id).collect(),
            Utc::now(),
        );
        match self.repo.insert_dispatch(dispatch.clone()).await {
            Ok(()) => DispatchOutcome::Created(dispatch),
            Err(RepositoryError::DispatchExists { .. }) => DispatchOutcome::AlreadyExists,
            Err(e) => DispatchOutcome::Persistence(e),
        }
    }

    /// Stage 3: polls destinations for tracking on open dispatches.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn poll_tracking(&self, ctx: &mut CycleContext) -> Result<TrackingReport> {
        let mut report = TrackingReport::default();
        let dispatches = self.repo.open_dispatches().await?;
        let delay = chrono::Duration::from_std(self.config.tracking_delay)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let now = Utc::now();

        for dispatch in dispatches {
            if now - dispatch.dispatched_at < delay {
                report.not_due += 1;
                continue;
            }
            let Some((store, connector)) = self.connector(ctx, dispatch.destination_store_id).await?
            else {
                continue;
            };

            let tracking = match self.call(connector.fetch_tracking(&dispatch.remote_order_id)).await {
                Ok(tracking) => tracking,
                Err(e) => {
                    tracing::warn!(
                        remote_order_id = %dispatch.remote_order_id,
                        destination = %store.name,
                        error_kind = e.kind(),
                        error = %e,
                        "failed to fetch tracking"
                    );
                    self.halt_on_auth(ctx, &store, &e);
                    report.failed += 1;
                    continue;
                }
            };
            report.polled += 1;

            match self
                .repo
                .record_tracking(dispatch.id, tracking.clone(), Utc::now())
                .await
            {
                Ok(true) => {
                    metrics::counter!("sync_tracking_updates_total").increment(1);
                    tracing::info!(
                        remote_order_id = %dispatch.remote_order_id,
                        status = %tracking.status,
                        tracking_number = ?tracking.tracking_number,
                        "tracking updated"
                    );
                    report.updated += 1;
                }
                Ok(false) => tracing::debug!(
                    remote_order_id = %dispatch.remote_order_id,
                    stored = %dispatch.tracking.status,
                    polled = %tracking.status,
                    "tracking unchanged or out of order"
                ),
                Err(e) => {
                    tracing::warn!(dispatch_id = %dispatch.id, error = %e, "failed to record tracking");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Stage 4: pushes recorded tracking back to the source.
    #[tracing::instrument(skip(self, ctx))]
    pub async fn sync_back(&self, ctx: &mut CycleContext) -> Result<SyncBackReport> {
        let mut report = SyncBackReport::default();
        let pending = self.repo.pending_sync_back().await?;
        let mut pushed_orders: Vec<OrderId> = Vec::new();

        for dispatch in pending {
            let Some(order) = self.repo.get_order(dispatch.order_id).await? else {
                tracing::warn!(order_id = %dispatch.order_id, "dispatch references a missing order");
                continue;
            };
            let Some((store, connector)) = self.connector(ctx, order.source_store_id).await? else {
                continue;
            };

            let push =
                TrackingPush::for_dispatch(&order, &dispatch.line_ids, dispatch.tracking.clone());
            let pushed = self.call(connector.push_tracking_update(&push)).await;
            if let Err(e) = pushed {
                metrics::counter!("sync_push_failures_total").increment(1);
                tracing::warn!(
                    native_id = %order.native_id,
                    order_id = %order.id,
                    error_kind = e.kind(),
                    error = %e,
                    "failed to push tracking"
                );
                self.halt_on_auth(ctx, &store, &e);
                report.failed += 1;
                continue;
            }

            metrics::counter!("sync_pushes_total").increment(1);
            report.pushed += 1;
            match self
                .repo
                .confirm_pushed(dispatch.id, dispatch.tracking_revision, Utc::now())
                .await
            {
                Ok(true) => {}
                Ok(false) => tracing::debug!(
                    dispatch_id = %dispatch.id,
                    "newer tracking recorded during push; will push again"
                ),
                Err(e) => tracing::warn!(dispatch_id = %dispatch.id, error = %e, "failed to clear pending flag"),
            }
            if !pushed_orders.contains(&order.id) {
                pushed_orders.push(order.id);
            }
        }

        for order_id in pushed_orders {
            self.advance_after_push(order_id, &mut report).await?;
        }

        Ok(report)
    }

    /// Moves a pushed order to `Tracking`, or to `Synced` once every
    /// dispatch is terminal and pushed. `Routed` orders keep their status.
    async fn advance_after_push(&self, order_id: OrderId, report: &mut SyncBackReport) -> Result<()> {
        let Some(order) = self.repo.get_order(order_id).await? else {
            return Ok(());
        };
        if !order.status.awaits_tracking() {
            return Ok(());
        }

        let dispatches = self.repo.dispatches_for_order(order_id).await?;
        let settled = order.assigned_destinations().iter().all(|dest| {
            dispatches
                .iter()
                .any(|d| d.destination_store_id == *dest && d.is_settled())
        });
        let target = if settled {
            OrderStatus::Synced
        } else {
            OrderStatus::Tracking
        };
        if target == order.status {
            return Ok(());
        }

        if self.transition(order_id, order.status, target).await? {
            if target == OrderStatus::Synced {
                metrics::counter!("sync_orders_synced_total").increment(1);
                tracing::info!(order = order.display_ref(), "order fully synced");
                report.orders_synced += 1;
            } else {
                report.orders_tracking += 1;
            }
        }
        Ok(())
    }

    /// Compare-and-set transition. A lost race is not an error.
    async fn transition(&self, order_id: OrderId, from: OrderStatus, to: OrderStatus) -> Result<bool> {
        match self.repo.transition_status(order_id, from, to).await {
            Ok(_) => Ok(true),
            Err(RepositoryError::StatusConflict { actual, .. }) => {
                tracing::debug!(%order_id, expected = %from, %actual, "order moved concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn quarantine(&self, source: StoreId, raw: &RawOrder, reason: String) -> bool {
        tracing::warn!(native_id = %raw.native_id, %reason, "quarantining malformed order");
        let record = QuarantinedOrder::new(source, raw.native_id.clone(), reason, raw.payload.clone());
        match self.repo.quarantine(record).await {
            Ok(()) => {
                metrics::counter!("sync_orders_quarantined_total").increment(1);
                true
            }
            Err(e) => {
                tracing::warn!(native_id = %raw.native_id, error = %e, "failed to quarantine order");
                false
            }
        }
    }

    /// Runs a connector call under the configured timeout.
    async fn call<T>(
        &self,
        fut: impl Future<Output = std::result::Result<T, ConnectorError>>,
    ) -> std::result::Result<T, ConnectorError> {
        let limit = self.config.connector_timeout;
        tokio::time::timeout(limit, fut)
            .await
            .unwrap_or(Err(ConnectorError::Timeout(limit)))
    }

    fn halt_on_auth(&self, ctx: &mut CycleContext, store: &Store, error: &ConnectorError) {
        if error.is_auth() && ctx.halt(store.id) {
            metrics::counter!("sync_auth_failures_total").increment(1);
            tracing::error!(
                alert = true,
                store_id = %store.id,
                store = %store.name,
                error = %error,
                "store credentials refused; store halted for this cycle"
            );
        }
    }

    async fn store(&self, ctx: &mut CycleContext, store_id: StoreId) -> Result<Option<Store>> {
        if let Some(store) = ctx.stores.get(&store_id) {
            return Ok(Some(store.clone()));
        }
        let store = self.repo.get_store(store_id).await?;
        if let Some(store) = &store {
            ctx.stores.insert(store_id, store.clone());
        }
        Ok(store)
    }

    /// Resolves a usable connector, or `None` if the store is halted,
    /// inactive, unknown or misconfigured.
    async fn connector(
        &self,
        ctx: &mut CycleContext,
        store_id: StoreId,
    ) -> Result<Option<(Store, Arc<dyn StoreConnector>)>> {
        if ctx.is_halted(store_id) {
            return Ok(None);
        }
        let Some(store) = self.store(ctx, store_id).await? else {
            tracing::warn!(%store_id, "store not configured");
            return Ok(None);
        };
        if !store.active {
            tracing::debug!(store = %store.name, "store inactive; skipping");
            return Ok(None);
        }

        match self.registry.connector_for(&store).await {
            Ok(connector) => Ok(Some((store, connector))),
            Err(SyncError::Connector { source, .. }) => {
                tracing::warn!(store = %store.name, error = %source, "failed to build connector");
                self.halt_on_auth(ctx, &store, &source);
                Ok(None)
            }
            Err(e) => {
                tracing::error!(store = %store.name, error = %e, "store misconfigured; skipping");
                Ok(None)
            }
        }
    }

    /// The configured source store and its connector.
    async fn source(&self, ctx: &mut CycleContext) -> Result<(Store, Arc<dyn StoreConnector>)> {
        let id = self.config.source_store_id;
        let store = self
            .store(ctx, id)
            .await?
            .ok_or_else(|| SyncError::Config(format!("source store {id} not found")))?;
        if !store.is_source() {
            return Err(SyncError::Config(format!(
                "store {} is configured as {}, not source",
                store.name, store.role
            )));
        }
        if !store.active {
            return Err(SyncError::Config(format!("source store {} is inactive", store.name)));
        }
        let active_sources = self
            .repo
            .list_stores()
            .await?
            .iter()
            .filter(|s| s.active && s.is_source())
            .count();
        if active_sources > 1 {
            return Err(SyncError::Config(format!(
                "{active_sources} active source stores configured; expected exactly one"
            )));
        }
        let connector = self.registry.connector_for(&store).await?;
        Ok((store, connector))
    }
}
