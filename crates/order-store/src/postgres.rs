use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Cursor, DispatchId, LineId, OrderId, RuleId, StoreId};
use domain::{
    DomainError, FulfillmentStatus, LineBinding, LookupMethod, Order, OrderLine, OrderStatus,
    RawOrder, RoutedDispatch, RoutingRule, RulePredicate, SkuPattern, Store, StoreRole,
    TrackingState,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{OrderRepository, QuarantinedOrder, RepositoryError, Result, UpsertOutcome};

const ORDER_COLUMNS: &str = "id, source_store_id, native_id, order_number, status, version, \
     placed_at, created_at, last_synced_at, payload";

const LINE_COLUMNS: &str = "id, order_id, position, source_line_id, sku, product_id, ean, title, quantity, tags, \
     destination_store_id, lookup";

const DISPATCH_COLUMNS: &str = "id, order_id, destination_store_id, remote_order_id, \
     idempotency_key, lookup, line_ids, fulfillment_status, carrier, tracking_number, \
     tracking_url, tracking_revision, pending_sync_back, dispatched_at, last_polled_at, \
     last_pushed_at";

/// PostgreSQL-backed order repository.
#[derive(Clone)]
pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    /// Creates a new PostgreSQL repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_store(row: PgRow) -> Result<Store> {
        Ok(Store {
            id: StoreId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            platform: row.try_get("platform")?,
            role: StoreRole::parse(row.try_get::<&str, _>("role")?)?,
            shop_url: row.try_get("shop_url")?,
            access_token: row.try_get("access_token")?,
            api_version: row.try_get("api_version")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn row_to_rule(row: PgRow) -> Result<RoutingRule> {
        Ok(RoutingRule {
            id: RuleId::from_uuid(row.try_get::<Uuid, _>("id")?),
            source_store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("source_store_id")?),
            destination_store_id: StoreId::from_uuid(
                row.try_get::<Uuid, _>("destination_store_id")?,
            ),
            predicate: RulePredicate {
                sku_pattern: row
                    .try_get::<Option<String>, _>("sku_pattern")?
                    .map(SkuPattern::new),
                product_id: row.try_get("product_id")?,
                tag: row.try_get("tag")?,
            },
            priority: row.try_get("priority")?,
            lookup: LookupMethod::parse(row.try_get::<&str, _>("lookup")?)?,
            active: row.try_get("active")?,
            notes: row.try_get("notes")?,
        })
    }

    fn row_to_line(row: &PgRow) -> Result<OrderLine> {
        let quantity: i32 = row.try_get("quantity")?;
        Ok(OrderLine {
            id: LineId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            position: row.try_get("position")?,
            source_line_id: row.try_get("source_line_id")?,
            sku: row.try_get("sku")?,
            product_id: row.try_get("product_id")?,
            ean: row.try_get("ean")?,
            title: row.try_get("title")?,
            quantity: u32::try_from(quantity).map_err(|_| {
                RepositoryError::Domain(DomainError::UnknownValue {
                    kind: "line quantity",
                    value: quantity.to_string(),
                })
            })?,
            tags: row.try_get("tags")?,
            destination: row
                .try_get::<Option<Uuid>, _>("destination_store_id")?
                .map(StoreId::from_uuid),
            lookup: LookupMethod::parse(row.try_get::<&str, _>("lookup")?)?,
        })
    }

    fn row_to_order(row: &PgRow, lines: Vec<OrderLine>) -> Result<Order> {
        Ok(Order {
            id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
            source_store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("source_store_id")?),
            native_id: row.try_get("native_id")?,
            order_number: row.try_get("order_number")?,
            status: parse_status(row.try_get::<&str, _>("status")?)?,
            version: row.try_get("version")?,
            placed_at: row.try_get("placed_at")?,
            created_at: row.try_get("created_at")?,
            last_synced_at: row.try_get("last_synced_at")?,
            payload: row.try_get("payload")?,
            lines,
        })
    }

    fn row_to_dispatch(row: PgRow) -> Result<RoutedDispatch> {
        let line_ids: Vec<Uuid> = row.try_get("line_ids")?;
        Ok(RoutedDispatch {
            id: DispatchId::from_uuid(row.try_get::<Uuid, _>("id")?),
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            destination_store_id: StoreId::from_uuid(
                row.try_get::<Uuid, _>("destination_store_id")?,
            ),
            remote_order_id: row.try_get("remote_order_id")?,
            idempotency_key: row.try_get("idempotency_key")?,
            lookup: LookupMethod::parse(row.try_get::<&str, _>("lookup")?)?,
            line_ids: line_ids.into_iter().map(LineId::from_uuid).collect(),
            tracking: TrackingState {
                status: FulfillmentStatus::parse(row.try_get::<&str, _>("fulfillment_status")?)?,
                carrier: row.try_get("carrier")?,
                tracking_number: row.try_get("tracking_number")?,
                tracking_url: row.try_get("tracking_url")?,
            },
            tracking_revision: row.try_get("tracking_revision")?,
            pending_sync_back: row.try_get("pending_sync_back")?,
            dispatched_at: row.try_get("dispatched_at")?,
            last_polled_at: row.try_get("last_polled_at")?,
            last_pushed_at: row.try_get("last_pushed_at")?,
        })
    }

    fn row_to_quarantined(row: PgRow) -> Result<QuarantinedOrder> {
        Ok(QuarantinedOrder {
            source_store_id: StoreId::from_uuid(row.try_get::<Uuid, _>("source_store_id")?),
            native_id: row.try_get("native_id")?,
            reason: row.try_get("reason")?,
            payload: row.try_get("payload")?,
            quarantined_at: row.try_get("quarantined_at")?,
        })
    }

    /// Loads order rows together with their lines.
    async fn hydrate_orders(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<std::result::Result<_, _>>()?;

        let line_rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) ORDER BY position ASC"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<Uuid, Vec<OrderLine>> = HashMap::new();
        for row in &line_rows {
            let line = Self::row_to_line(row)?;
            lines.entry(line.order_id.as_uuid()).or_default().push(line);
        }

        rows.iter()
            .map(|row| {
                let id: Uuid = row.try_get("id")?;
                Self::row_to_order(row, lines.remove(&id).unwrap_or_default())
            })
            .collect()
    }

    async fn insert_lines(
        tx: &mut Transaction<'_, Postgres>,
        native_id: &str,
        lines: &[OrderLine],
    ) -> Result<()> {
        for line in lines {
            let quantity = i32::try_from(line.quantity).map_err(|_| {
                RepositoryError::Domain(DomainError::MalformedOrder {
                    native_id: native_id.to_string(),
                    reason: format!("line {} quantity {} out of range", line.position, line.quantity),
                })
            })?;
            sqlx::query(
                r#"
                INSERT INTO order_lines (id, order_id, position, source_line_id, sku, product_id, ean, title, quantity, tags, destination_store_id, lookup)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(line.order_id.as_uuid())
            .bind(line.position)
            .bind(&line.source_line_id)
            .bind(&line.sku)
            .bind(&line.product_id)
            .bind(&line.ean)
            .bind(&line.title)
            .bind(quantity)
            .bind(&line.tags)
            .bind(line.destination.map(|d| d.as_uuid()))
            .bind(line.lookup.as_str())
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

fn parse_status(value: &str) -> Result<OrderStatus> {
    OrderStatus::parse(value).ok_or_else(|| {
        RepositoryError::Domain(DomainError::UnknownValue {
            kind: "order status",
            value: value.to_string(),
        })
    })
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn save_store(&self, store: Store) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO stores (id, name, platform, role, shop_url, access_token, api_version, active, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                platform = EXCLUDED.platform,
                role = EXCLUDED.role,
                shop_url = EXCLUDED.shop_url,
                access_token = EXCLUDED.access_token,
                api_version = EXCLUDED.api_version,
                active = EXCLUDED.active
            "#,
        )
        .bind(store.id.as_uuid())
        .bind(&store.name)
        .bind(&store.platform)
        .bind(store.role.as_str())
        .bind(&store.shop_url)
        .bind(&store.access_token)
        .bind(&store.api_version)
        .bind(store.active)
        .bind(store.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_store(&self, id: StoreId) -> Result<Option<Store>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, platform, role, shop_url, access_token, api_version, active, created_at
            FROM stores
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_store).transpose()
    }

    async fn list_stores(&self) -> Result<Vec<Store>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, platform, role, shop_url, access_token, api_version, active, created_at
            FROM stores
            ORDER BY seq ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_store).collect()
    }

    async fn save_routing_rule(&self, rule: RoutingRule) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO routing_rules (id, source_store_id, destination_store_id, sku_pattern, product_id, tag, priority, lookup, active, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (id) DO UPDATE SET
                source_store_id = EXCLUDED.source_store_id,
                destination_store_id = EXCLUDED.destination_store_id,
                sku_pattern = EXCLUDED.sku_pattern,
                product_id = EXCLUDED.product_id,
                tag = EXCLUDED.tag,
                priority = EXCLUDED.priority,
                lookup = EXCLUDED.lookup,
                active = EXCLUDED.active,
                notes = EXCLUDED.notes
            "#,
        )
        .bind(rule.id.as_uuid())
        .bind(rule.source_store_id.as_uuid())
        .bind(rule.destination_store_id.as_uuid())
        .bind(rule.predicate.sku_pattern.as_ref().map(|p| p.as_str()))
        .bind(&rule.predicate.product_id)
        .bind(&rule.predicate.tag)
        .bind(rule.priority)
        .bind(rule.lookup.as_str())
        .bind(rule.active)
        .bind(&rule.notes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_routing_rules(&self, source: StoreId) -> Result<Vec<RoutingRule>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source_store_id, destination_store_id, sku_pattern, product_id, tag, priority, lookup, active, notes
            FROM routing_rules
            WHERE source_store_id = $1 AND active
            ORDER BY seq ASC
            "#,
        )
        .bind(source.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_rule).collect()
    }

    #[tracing::instrument(skip(self, raw), fields(native_id = %raw.native_id))]
    async fn upsert_order(&self, source: StoreId, raw: &RawOrder) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query(
            "SELECT id, status FROM orders WHERE source_store_id = $1 AND native_id = $2 FOR UPDATE",
        )
        .bind(source.as_uuid())
        .bind(&raw.native_id)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
                let order = Order::import(source, raw, Utc::now());
                let inserted = sqlx::query(
                    r#"
                    INSERT INTO orders (id, source_store_id, native_id, order_number, status, version, placed_at, created_at, payload)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    ON CONFLICT ON CONSTRAINT unique_source_native_id DO NOTHING
                    "#,
                )
                .bind(order.id.as_uuid())
                .bind(source.as_uuid())
                .bind(&order.native_id)
                .bind(&order.order_number)
                .bind(order.status.as_str())
                .bind(order.version)
                .bind(order.placed_at)
                .bind(order.created_at)
                .bind(&order.payload)
                .execute(&mut *tx)
                .await?;

                if inserted.rows_affected() == 0 {
                    // A concurrent import won; report the row it wrote.
                    let row = sqlx::query(
                        "SELECT id, status FROM orders WHERE source_store_id = $1 AND native_id = $2",
                    )
                    .bind(source.as_uuid())
                    .bind(&raw.native_id)
                    .fetch_one(&mut *tx)
                    .await?;
                    UpsertOutcome::Unchanged {
                        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("id")?),
                        status: parse_status(row.try_get::<&str, _>("status")?)?,
                    }
                } else {
                    Self::insert_lines(&mut tx, &order.native_id, &order.lines).await?;
                    UpsertOutcome::Inserted(order.id)
                }
            }
            Some(row) => {
                let order_id = OrderId::from_uuid(row.try_get::<Uuid, _>("id")?);
                let status = parse_status(row.try_get::<&str, _>("status")?)?;

                if status.accepts_source_updates() {
                    sqlx::query(
                        "UPDATE orders SET order_number = $2, placed_at = $3, payload = $4 WHERE id = $1",
                    )
                    .bind(order_id.as_uuid())
                    .bind(&raw.order_number)
                    .bind(raw.placed_at)
                    .bind(&raw.payload)
                    .execute(&mut *tx)
                    .await?;

                    sqlx::query("DELETE FROM order_lines WHERE order_id = $1")
                        .bind(order_id.as_uuid())
                        .execute(&mut *tx)
                        .await?;

                    let mut refreshed = Order::import(source, raw, Utc::now());
                    refreshed.id = order_id;
                    for line in &mut refreshed.lines {
                        line.order_id = order_id;
                    }
                    Self::insert_lines(&mut tx, &raw.native_id, &refreshed.lines).await?;
                    UpsertOutcome::Refreshed(order_id)
                } else {
                    UpsertOutcome::Unchanged { order_id, status }
                }
            }
        };

        tx.commit().await?;
        tracing::debug!(?outcome, "upserted order");
        Ok(outcome)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.hydrate_orders(rows).await?.pop())
    }

    async fn find_order(&self, source: StoreId, native_id: &str) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE source_store_id = $1 AND native_id = $2"
        ))
        .bind(source.as_uuid())
        .bind(native_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(self.hydrate_orders(rows).await?.pop())
    }

    async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        self.hydrate_orders(rows).await
    }

    async fn assign_lines(&self, order_id: OrderId, bindings: &[LineBinding]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM orders WHERE id = $1 FOR UPDATE")
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;
        if exists.is_none() {
            return Err(RepositoryError::OrderNotFound(order_id));
        }

        for binding in bindings {
            let current: Option<Option<Uuid>> = sqlx::query_scalar(
                "SELECT destination_store_id FROM order_lines WHERE id = $1 AND order_id = $2",
            )
            .bind(binding.line_id.as_uuid())
            .bind(order_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?;

            match current {
                None => {
                    return Err(DomainError::UnknownLine {
                        order_id,
                        line_id: binding.line_id,
                    }
                    .into());
                }
                Some(Some(existing)) if existing == binding.destination.as_uuid() => {}
                Some(Some(existing)) => {
                    return Err(DomainError::LineAlreadyAssigned {
                        line_id: binding.line_id,
                        existing: StoreId::from_uuid(existing),
                        requested: binding.destination,
                    }
                    .into());
                }
                Some(None) => {
                    sqlx::query(
                        "UPDATE order_lines SET destination_store_id = $2, lookup = $3 WHERE id = $1",
                    )
                    .bind(binding.line_id.as_uuid())
                    .bind(binding.destination.as_uuid())
                    .bind(binding.lookup.as_str())
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    async fn transition_status(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        next: OrderStatus,
    ) -> Result<Order> {
        if !expected.can_transition_to(next) {
            return Err(DomainError::InvalidTransition {
                from: expected,
                to: next,
            }
            .into());
        }

        let updated = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, version = version + 1, last_synced_at = $4
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_uuid())
        .bind(expected.as_str())
        .bind(next.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let actual: Option<String> =
                sqlx::query_scalar("SELECT status FROM orders WHERE id = $1")
                    .bind(order_id.as_uuid())
                    .fetch_optional(&self.pool)
                    .await?;
            return match actual {
                Some(actual) => Err(RepositoryError::StatusConflict {
                    order_id,
                    expected,
                    actual: parse_status(&actual)?,
                }),
                None => Err(RepositoryError::OrderNotFound(order_id)),
            };
        }

        self.get_order(order_id)
            .await?
            .ok_or(RepositoryError::OrderNotFound(order_id))
    }

    async fn get_dispatch(
        &self,
        order_id: OrderId,
        destination: StoreId,
    ) -> Result<Option<RoutedDispatch>> {
        let row = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM routed_dispatches WHERE order_id = $1 AND destination_store_id = $2"
        ))
        .bind(order_id.as_uuid())
        .bind(destination.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_dispatch).transpose()
    }

    async fn dispatches_for_order(&self, order_id: OrderId) -> Result<Vec<RoutedDispatch>> {
        let rows = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM routed_dispatches WHERE order_id = $1 ORDER BY dispatched_at ASC"
        ))
        .bind(order_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dispatch).collect()
    }

    async fn insert_dispatch(&self, dispatch: RoutedDispatch) -> Result<()> {
        let line_ids: Vec<Uuid> = dispatch.line_ids.iter().map(|id| id.as_uuid()).collect();

        sqlx::query(&format!(
            "INSERT INTO routed_dispatches ({DISPATCH_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)"
        ))
        .bind(dispatch.id.as_uuid())
        .bind(dispatch.order_id.as_uuid())
        .bind(dispatch.destination_store_id.as_uuid())
        .bind(&dispatch.remote_order_id)
        .bind(&dispatch.idempotency_key)
        .bind(dispatch.lookup.as_str())
        .bind(&line_ids)
        .bind(dispatch.tracking.status.as_str())
        .bind(&dispatch.tracking.carrier)
        .bind(&dispatch.tracking.tracking_number)
        .bind(&dispatch.tracking.tracking_url)
        .bind(dispatch.tracking_revision)
        .bind(dispatch.pending_sync_back)
        .bind(dispatch.dispatched_at)
        .bind(dispatch.last_polled_at)
        .bind(dispatch.last_pushed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e {
                match db_err.constraint() {
                    Some("unique_order_destination")
                    | Some("routed_dispatches_idempotency_key_key") => {
                        return RepositoryError::DispatchExists {
                            order_id: dispatch.order_id,
                            destination: dispatch.destination_store_id,
                        };
                    }
                    Some("routed_dispatches_order_id_fkey") => {
                        return RepositoryError::OrderNotFound(dispatch.order_id);
                    }
                    _ => {}
                }
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }

    async fn open_dispatches(&self) -> Result<Vec<RoutedDispatch>> {
        let rows = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM routed_dispatches \
             WHERE fulfillment_status NOT IN ('fulfilled', 'delivered', 'cancelled') \
             ORDER BY dispatched_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dispatch).collect()
    }

    async fn record_tracking(
        &self,
        id: DispatchId,
        tracking: TrackingState,
        polled_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM routed_dispatches WHERE id = $1 FOR UPDATE"
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(RepositoryError::DispatchNotFound(id))?;

        let mut dispatch = Self::row_to_dispatch(row)?;
        let changed = dispatch.observe_tracking(tracking, polled_at);

        sqlx::query(
            r#"
            UPDATE routed_dispatches
            SET fulfillment_status = $2, carrier = $3, tracking_number = $4, tracking_url = $5,
                tracking_revision = $6, pending_sync_back = $7, last_polled_at = $8
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(dispatch.tracking.status.as_str())
        .bind(&dispatch.tracking.carrier)
        .bind(&dispatch.tracking.tracking_number)
        .bind(&dispatch.tracking.tracking_url)
        .bind(dispatch.tracking_revision)
        .bind(dispatch.pending_sync_back)
        .bind(dispatch.last_polled_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(changed)
    }

    async fn pending_sync_back(&self) -> Result<Vec<RoutedDispatch>> {
        let rows = sqlx::query(&format!(
            "SELECT {DISPATCH_COLUMNS} FROM routed_dispatches WHERE pending_sync_back ORDER BY dispatched_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_dispatch).collect()
    }

    async fn confirm_pushed(
        &self,
        id: DispatchId,
        revision: i64,
        pushed_at: DateTime<Utc>,
    ) -> Result<bool> {
        let updated = sqlx::query(
            r#"
            UPDATE routed_dispatches
            SET pending_sync_back = FALSE, last_pushed_at = $3
            WHERE id = $1 AND tracking_revision = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(revision)
        .bind(pushed_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }

        let exists: Option<Uuid> = sqlx::query_scalar("SELECT id FROM routed_dispatches WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(RepositoryError::DispatchNotFound(id)),
        }
    }

    async fn load_cursor(&self, store: StoreId) -> Result<Option<Cursor>> {
        let cursor: Option<String> =
            sqlx::query_scalar("SELECT cursor FROM sync_cursors WHERE store_id = $1")
                .bind(store.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(cursor.map(Cursor::new))
    }

    async fn save_cursor(&self, store: StoreId, cursor: &Cursor) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (store_id, cursor, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (store_id) DO UPDATE SET
                cursor = EXCLUDED.cursor,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(store.as_uuid())
        .bind(cursor.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn quarantine(&self, record: QuarantinedOrder) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO quarantined_orders (source_store_id, native_id, reason, payload, quarantined_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_store_id, native_id) DO UPDATE SET
                reason = EXCLUDED.reason,
                payload = EXCLUDED.payload,
                quarantined_at = EXCLUDED.quarantined_at
            "#,
        )
        .bind(record.source_store_id.as_uuid())
        .bind(&record.native_id)
        .bind(&record.reason)
        .bind(&record.payload)
        .bind(record.quarantined_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_quarantined(&self, source: StoreId) -> Result<Vec<QuarantinedOrder>> {
        let rows = sqlx::query(
            r#"
            SELECT source_store_id, native_id, reason, payload, quarantined_at
            FROM quarantined_orders
            WHERE source_store_id = $1
            ORDER BY quarantined_at ASC
            "#,
        )
        .bind(source.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_quarantined).collect()
    }
}
