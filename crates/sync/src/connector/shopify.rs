//! Shopify REST Admin API connector.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::Cursor;
use domain::{
    FulfillmentStatus, LookupMethod, RawOrder, RawOrderLine, Store, TrackingState,
};
use reqwest::{RequestBuilder, StatusCode, header::LINK};
use serde_json::{Value, json};

use super::{
    ConnectorFactory, DispatchLine, DispatchRequest, FetchedOrders, StoreConnector, TrackingPush,
};
use crate::error::ConnectorError;

const PAGE_LIMIT: &str = "250";
const INTEGRATOR: &str = "order-sync";
const IDEMPOTENCY_ATTRIBUTE: &str = "IdempotencyKey";
const OPEN_FULFILLMENT_STATUSES: [&str; 2] = ["open", "in_progress"];
const SKIPPED_FINANCIAL_STATUSES: [&str; 3] = ["voided", "refunded", "partially_refunded"];

/// Talks to one Shopify shop.
pub struct ShopifyConnector {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
    timeout: Duration,
    lookback: chrono::Duration,
    /// How far back `create_order` looks for an order it already created.
    idempotency_window: chrono::Duration,
}

impl ShopifyConnector {
    pub fn new(store: &Store, timeout: Duration) -> Result<Self, ConnectorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::Transient(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: format!(
                "https://{}/admin/api/{}",
                store.shop_url.trim_end_matches('/'),
                store.api_version
            ),
            access_token: store.access_token.clone(),
            timeout,
            lookback: chrono::Duration::days(2),
            idempotency_window: chrono::Duration::days(7),
        })
    }

    /// Overrides the API root, e.g. to point at a local stub.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// How far back the first poll reaches when there is no cursor.
    pub fn with_lookback(mut self, lookback: chrono::Duration) -> Self {
        self.lookback = lookback;
        self
    }

    pub fn with_idempotency_window(mut self, window: chrono::Duration) -> Self {
        self.idempotency_window = window;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("X-Shopify-Access-Token", &self.access_token)
    }

    /// Sends a request and returns the JSON body and the next-page link.
    async fn send(&self, builder: RequestBuilder) -> Result<(Value, Option<String>), ConnectorError> {
        let response = self
            .authed(builder)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let next = response
            .headers()
            .get(LINK)
            .and_then(|v| v.to_str().ok())
            .and_then(next_page_url);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body = response
            .json::<Value>()
            .await
            .map_err(|e| ConnectorError::Malformed(e.to_string()))?;
        Ok((body, next))
    }

    fn transport_error(&self, error: reqwest::Error) -> ConnectorError {
        if error.is_timeout() {
            ConnectorError::Timeout(self.timeout)
        } else {
            ConnectorError::Transient(error.to_string())
        }
    }

    /// Loads every product variant in the shop, following pagination.
    async fn fetch_variants(&self) -> Result<Vec<Value>, ConnectorError> {
        let mut variants = Vec::new();
        let mut request = Some(
            self.client
                .get(self.url("products.json"))
                .query(&[("limit", PAGE_LIMIT)]),
        );

        while let Some(builder) = request.take() {
            let (body, next) = self.send(builder).await?;
            for product in body["products"].as_array().into_iter().flatten() {
                variants.extend(product["variants"].as_array().into_iter().flatten().cloned());
            }
            request = next.map(|url| self.client.get(url));
        }
        Ok(variants)
    }

    /// Finds a recent order created with this idempotency key.
    ///
    /// A create whose response was lost (timeout, dropped connection) still
    /// lands at the shop, so a retry must find it before posting again.
    async fn find_created_order(&self, idempotency_key: &str) -> Result<Option<String>, ConnectorError> {
        let created_at_min = (Utc::now() - self.idempotency_window).to_rfc3339();
        let mut request = Some(self.client.get(self.url("orders.json")).query(&[
            ("status", "any"),
            ("created_at_min", created_at_min.as_str()),
            ("fields", "id,note_attributes,tags"),
            ("limit", PAGE_LIMIT),
        ]));

        while let Some(builder) = request.take() {
            let (body, next) = self.send(builder).await?;
            if let Some(order) = body["orders"]
                .as_array()
                .into_iter()
                .flatten()
                .find(|order| carries_idempotency_key(order, idempotency_key))
            {
                return Ok(id_string(&order["id"]));
            }
            request = next.map(|url| self.client.get(url));
        }
        Ok(None)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), ConnectorError> {
        let builder = self
            .client
            .post(self.url(&format!("orders/{order_id}/cancel.json")))
            .json(&json!({ "reason": "other" }));
        self.send(builder).await?;
        Ok(())
    }
}

#[async_trait]
impl StoreConnector for ShopifyConnector {
    #[tracing::instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_new_orders(&self, since: Option<&Cursor>) -> Result<FetchedOrders, ConnectorError> {
        let updated_at_min = match since {
            Some(cursor) => cursor.to_string(),
            None => (Utc::now() - self.lookback).to_rfc3339(),
        };

        let mut orders = Vec::new();
        let mut newest: Option<String> = None;
        let mut request = Some(self.client.get(self.url("orders.json")).query(&[
            ("status", "any"),
            ("fulfillment_status", "unfulfilled"),
            ("updated_at_min", updated_at_min.as_str()),
            ("limit", PAGE_LIMIT),
        ]));

        while let Some(builder) = request.take() {
            let (body, next) = self.send(builder).await?;
            let page = body["orders"]
                .as_array()
                .ok_or_else(|| ConnectorError::Malformed("missing 'orders' array".to_string()))?;
            for order in page {
                if let Some(updated) = order["updated_at"].as_str()
                    && newest.as_deref().is_none_or(|n| later_than(updated, n))
                {
                    newest = Some(updated.to_string());
                }
                if is_importable(order) {
                    orders.push(parse_order(order));
                }
            }
            request = next.map(|url| self.client.get(url));
        }

        Ok(FetchedOrders {
            orders,
            next_cursor: newest.map(Cursor::new),
        })
    }

    #[tracing::instrument(skip(self, request), fields(key = %request.idempotency_key))]
    async fn create_order(&self, request: &DispatchRequest) -> Result<String, ConnectorError> {
        if let Some(existing) = self.find_created_order(&request.idempotency_key).await? {
            tracing::info!(remote_order_id = %existing, "order already created at destination");
            return Ok(existing);
        }

        let variants = self.fetch_variants().await?;

        let mut line_items = Vec::new();
        for line in &request.lines {
            match find_variant(&variants, line, request.lookup) {
                Some(variant_id) => {
                    line_items.push(json!({ "variant_id": variant_id, "quantity": line.quantity }))
                }
                None => tracing::warn!(
                    sku = ?line.sku,
                    ean = ?line.ean,
                    "product not found at destination"
                ),
            }
        }
        if line_items.is_empty() {
            return Err(ConnectorError::Rejected(
                "none of the products exist at the destination".to_string(),
            ));
        }

        let payload = &request.payload;
        let body = json!({
            "order": {
                "line_items": line_items,
                "note": order_note(request),
                "note_attributes": [
                    { "name": IDEMPOTENCY_ATTRIBUTE, "value": request.idempotency_key }
                ],
                "email": payload["email"],
                "customer": payload["customer"],
                "shipping_address": payload["shipping_address"],
                "billing_address": payload["billing_address"],
                "tags": INTEGRATOR,
            }
        });

        let builder = self.client.post(self.url("orders.json")).json(&body);
        let (created, _) = self.send(builder).await?;
        id_string(&created["order"]["id"])
            .ok_or_else(|| ConnectorError::Malformed("created order has no id".to_string()))
    }

    async fn fetch_tracking(&self, remote_order_id: &str) -> Result<TrackingState, ConnectorError> {
        let builder = self
            .client
            .get(self.url(&format!("orders/{remote_order_id}.json")));
        let (body, _) = self.send(builder).await?;
        if body["order"].is_null() {
            return Err(ConnectorError::Malformed("missing 'order' object".to_string()));
        }
        Ok(parse_tracking(&body["order"]))
    }

    #[tracing::instrument(
        skip(self, push),
        fields(source_order_id = %push.source_order_id, status = %push.tracking.status)
    )]
    async fn push_tracking_update(&self, push: &TrackingPush) -> Result<(), ConnectorError> {
        let tracking = &push.tracking;
        match tracking.status {
            FulfillmentStatus::Cancelled if push.covers_whole_order => {
                return self.cancel_order(&push.source_order_id).await;
            }
            FulfillmentStatus::Cancelled => {
                // Other destinations still ship their lines.
                tracing::info!(lines = push.lines.len(), "partial cancellation left open at source");
                return Ok(());
            }
            // Shipped quantities are unknown until the destination settles.
            FulfillmentStatus::Unfulfilled | FulfillmentStatus::Partial => return Ok(()),
            FulfillmentStatus::Fulfilled | FulfillmentStatus::Delivered => {}
        }

        let builder = self.client.get(self.url(&format!(
            "orders/{}/fulfillment_orders.json",
            push.source_order_id
        )));
        let (body, _) = self.send(builder).await?;
        let line_items = fulfillment_line_items(&body, &push.lines);
        if line_items.is_empty() {
            // Already fulfilled or closed at the source; nothing left to write.
            tracing::debug!("no open fulfillment lines for this dispatch");
            return Ok(());
        }

        let builder = self
            .client
            .post(self.url("fulfillments.json"))
            .json(&fulfillment_body(line_items, tracking));
        self.send(builder).await?;
        Ok(())
    }
}

/// Builds [`ShopifyConnector`]s with a shared timeout.
#[derive(Debug, Clone)]
pub struct ShopifyConnectorFactory {
    timeout: Duration,
}

impl ShopifyConnectorFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ConnectorFactory for ShopifyConnectorFactory {
    async fn connect(&self, store: &Store) -> Result<Arc<dyn StoreConnector>, ConnectorError> {
        if store.access_token.is_empty() {
            return Err(ConnectorError::Auth(format!(
                "store {} has no access token",
                store.name
            )));
        }
        Ok(Arc::new(ShopifyConnector::new(store, self.timeout)?))
    }
}

fn classify_status(status: StatusCode, body: &str) -> ConnectorError {
    let detail = format!("{status}: {}", body.chars().take(200).collect::<String>());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::Auth(detail),
        StatusCode::TOO_MANY_REQUESTS => ConnectorError::Transient(detail),
        s if s.is_server_error() => ConnectorError::Transient(detail),
        _ => ConnectorError::Rejected(detail),
    }
}

/// Extracts the `rel="next"` target from a Link header.
fn next_page_url(link: &str) -> Option<String> {
    link.split(',')
        .find(|part| part.contains("rel=\"next\""))
        .and_then(|part| part.split(';').next())
        .map(|url| url.trim().trim_start_matches('<').trim_end_matches('>').to_string())
}

fn later_than(candidate: &str, current: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(candidate),
        DateTime::parse_from_rfc3339(current),
    ) {
        (Ok(a), Ok(b)) => a > b,
        _ => false,
    }
}

fn is_importable(order: &Value) -> bool {
    let financial = order["financial_status"].as_str().unwrap_or_default();
    order["cancelled_at"].is_null() && !SKIPPED_FINANCIAL_STATUSES.contains(&financial)
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn non_empty(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn split_tags(tags: &Value) -> Vec<String> {
    tags.as_str()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Converts a Shopify order into a raw order. Never fails: missing fields
/// surface later as validation errors.
fn parse_order(order: &Value) -> RawOrder {
    let order_tags = split_tags(&order["tags"]);
    let placed_at = order["created_at"]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    let lines = order["line_items"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|item| {
            let mut tags = order_tags.clone();
            for prop in item["properties"].as_array().into_iter().flatten() {
                if let Some(value) = non_empty(&prop["value"]).or_else(|| non_empty(&prop["name"])) {
                    tags.push(value);
                }
            }
            RawOrderLine {
                source_line_id: id_string(&item["id"]),
                sku: non_empty(&item["sku"]),
                product_id: id_string(&item["product_id"]),
                ean: non_empty(&item["barcode"]),
                title: non_empty(&item["title"]),
                quantity: item["quantity"]
                    .as_u64()
                    .and_then(|q| u32::try_from(q).ok())
                    .unwrap_or(0),
                tags,
            }
        })
        .collect();

    RawOrder {
        native_id: id_string(&order["id"]).unwrap_or_default(),
        order_number: id_string(&order["order_number"]).or_else(|| non_empty(&order["name"])),
        placed_at,
        payload: order.clone(),
        lines,
    }
}

fn parse_tracking(order: &Value) -> TrackingState {
    let fulfillment = order["fulfillments"]
        .as_array()
        .and_then(|f| f.first())
        .cloned()
        .unwrap_or(Value::Null);

    let status = if !order["cancelled_at"].is_null() {
        FulfillmentStatus::Cancelled
    } else if fulfillment["shipment_status"].as_str() == Some("delivered") {
        FulfillmentStatus::Delivered
    } else {
        match order["fulfillment_status"].as_str() {
            Some("fulfilled") => FulfillmentStatus::Fulfilled,
            Some("partial") => FulfillmentStatus::Partial,
            _ => FulfillmentStatus::Unfulfilled,
        }
    };

    TrackingState {
        status,
        carrier: non_empty(&fulfillment["tracking_company"]),
        tracking_number: non_empty(&fulfillment["tracking_number"]),
        tracking_url: non_empty(&fulfillment["tracking_url"]),
    }
}

/// Finds a variant by the preferred identifier, falling back to the other.
fn find_variant(variants: &[Value], line: &DispatchLine, lookup: LookupMethod) -> Option<Value> {
    let by = |field: &str, wanted: &Option<String>| {
        let wanted = wanted.as_deref()?;
        variants
            .iter()
            .find(|v| v[field].as_str() == Some(wanted))
            .map(|v| v["id"].clone())
    };
    match lookup {
        LookupMethod::Sku => by("sku", &line.sku).or_else(|| by("barcode", &line.ean)),
        LookupMethod::Ean => by("barcode", &line.ean).or_else(|| by("sku", &line.sku)),
    }
}

fn order_note(request: &DispatchRequest) -> String {
    [
        format!("ChannelName\n{}", request.source_store_name),
        format!("ChannelOrderNo\n{}", request.source_order_number),
        format!("IdempotencyKey\n{}", request.idempotency_key),
        format!("Integrator\n{INTEGRATOR}"),
    ]
    .join("\n\n")
}

fn carries_idempotency_key(order: &Value, idempotency_key: &str) -> bool {
    order["note_attributes"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|attr| {
            attr["name"].as_str() == Some(IDEMPOTENCY_ATTRIBUTE)
                && attr["value"].as_str() == Some(idempotency_key)
        })
}

/// Picks the open fulfillment-order lines that belong to the dispatched lines.
///
/// Each source line is fulfilled for at most its dispatched quantity, spread
/// over the fulfillment orders that still hold it. Returns one entry per
/// fulfillment order with something to fulfill.
fn fulfillment_line_items(body: &Value, lines: &[DispatchLine]) -> Vec<Value> {
    let mut remaining: HashMap<&str, u64> = lines
        .iter()
        .filter_map(|l| Some((l.source_line_id.as_deref()?, u64::from(l.quantity))))
        .collect();

    let mut groups = Vec::new();
    let open = body["fulfillment_orders"]
        .as_array()
        .into_iter()
        .flatten()
        .filter(|fo| {
            fo["status"]
                .as_str()
                .is_some_and(|s| OPEN_FULFILLMENT_STATUSES.contains(&s))
        });
    for fo in open {
        let mut items = Vec::new();
        for item in fo["line_items"].as_array().into_iter().flatten() {
            let Some(line_item_id) = id_string(&item["line_item_id"]) else {
                continue;
            };
            let Some(left) = remaining.get_mut(line_item_id.as_str()) else {
                continue;
            };
            let quantity = (*left).min(item["fulfillable_quantity"].as_u64().unwrap_or(0));
            if quantity == 0 {
                continue;
            }
            *left -= quantity;
            items.push(json!({ "id": item["id"], "quantity": quantity }));
        }
        if !items.is_empty() {
            groups.push(json!({
                "fulfillment_order_id": fo["id"],
                "fulfillment_order_line_items": items,
            }));
        }
    }
    groups
}

fn fulfillment_body(line_items: Vec<Value>, tracking: &TrackingState) -> Value {
    let mut fulfillment = json!({
        "line_items_by_fulfillment_order": line_items,
        "notify_customer": false,
    });
    if let Some(number) = &tracking.tracking_number {
        fulfillment["tracking_info"] = json!({
            "number": number,
            "company": tracking.carrier.clone().unwrap_or_default(),
            "url": tracking.tracking_url.clone().unwrap_or_default(),
        });
    }
    json!({ "fulfillment": fulfillment })
}

#[cfg(test)]
mod tests {
    use common::{LineId, OrderId};

    use super::*;

    fn shopify_order() -> Value {
        json!({
            "id": 5550001,
            "order_number": 1001,
            "name": "#1001",
            "created_at": "2024-05-01T10:00:00+02:00",
            "updated_at": "2024-05-01T10:05:00+02:00",
            "tags": "VIP, wholesale",
            "financial_status": "paid",
            "cancelled_at": null,
            "line_items": [
                {
                    "id": 9001,
                    "sku": "PROD-A1",
                    "product_id": 42,
                    "title": "Widget",
                    "quantity": 2,
                    "properties": [{"name": "engraving", "value": "Zinaps"}]
                },
                { "id": 9002, "sku": "", "product_id": 43, "title": "Gadget", "quantity": 1 }
            ]
        })
    }

    fn line(sku: Option<&str>, ean: Option<&str>) -> DispatchLine {
        DispatchLine {
            line_id: LineId::new(),
            source_line_id: None,
            sku: sku.map(String::from),
            product_id: None,
            ean: ean.map(String::from),
            title: None,
            quantity: 1,
        }
    }

    #[test]
    fn test_parse_order_maps_lines_and_tags() {
        let raw = parse_order(&shopify_order());

        assert_eq!(raw.native_id, "5550001");
        assert_eq!(raw.order_number.as_deref(), Some("1001"));
        assert_eq!(raw.lines.len(), 2);
        assert_eq!(raw.lines[0].source_line_id.as_deref(), Some("9001"));
        assert_eq!(raw.lines[0].sku.as_deref(), Some("PROD-A1"));
        assert_eq!(raw.lines[0].product_id.as_deref(), Some("42"));
        assert_eq!(raw.lines[0].tags, vec!["VIP", "wholesale", "Zinaps"]);
        assert_eq!(raw.lines[1].sku, None);
        assert_eq!(raw.placed_at.to_rfc3339(), "2024-05-01T08:00:00+00:00");
        assert!(raw.validate().is_ok());
    }

    #[test]
    fn test_cancelled_and_refunded_orders_are_skipped() {
        let mut cancelled = shopify_order();
        cancelled["cancelled_at"] = json!("2024-05-02T00:00:00Z");
        let mut refunded = shopify_order();
        refunded["financial_status"] = json!("refunded");

        assert!(is_importable(&shopify_order()));
        assert!(!is_importable(&cancelled));
        assert!(!is_importable(&refunded));
    }

    #[test]
    fn test_parse_tracking_statuses() {
        let mut order = shopify_order();
        assert_eq!(parse_tracking(&order).status, FulfillmentStatus::Unfulfilled);

        order["fulfillment_status"] = json!("fulfilled");
        order["fulfillments"] = json!([{
            "tracking_company": "UPS",
            "tracking_number": "1Z999",
            "tracking_url": "https://ups.example/1Z999"
        }]);
        let tracking = parse_tracking(&order);
        assert_eq!(tracking, TrackingState::shipped("UPS", "1Z999").with_url("https://ups.example/1Z999"));

        order["fulfillments"][0]["shipment_status"] = json!("delivered");
        assert_eq!(parse_tracking(&order).status, FulfillmentStatus::Delivered);

        order["cancelled_at"] = json!("2024-05-02T00:00:00Z");
        assert_eq!(parse_tracking(&order).status, FulfillmentStatus::Cancelled);
    }

    #[test]
    fn test_find_variant_with_fallback() {
        let variants = vec![
            json!({"id": 1, "sku": "PROD-A1", "barcode": "4006381333931"}),
            json!({"id": 2, "sku": "PROD-B2", "barcode": null}),
        ];

        let by_sku = find_variant(&variants, &line(Some("PROD-B2"), None), LookupMethod::Sku);
        assert_eq!(by_sku, Some(json!(2)));

        let ean_fallback = find_variant(
            &variants,
            &line(Some("UNKNOWN"), Some("4006381333931")),
            LookupMethod::Sku,
        );
        assert_eq!(ean_fallback, Some(json!(1)));

        let sku_fallback = find_variant(&variants, &line(Some("PROD-A1"), Some("000")), LookupMethod::Ean);
        assert_eq!(sku_fallback, Some(json!(1)));

        assert_eq!(find_variant(&variants, &line(Some("X"), None), LookupMethod::Sku), None);
    }

    #[test]
    fn test_order_note_carries_channel_details() {
        let request = DispatchRequest {
            idempotency_key: "o:d".to_string(),
            order_id: OrderId::new(),
            source_order_number: "1001".to_string(),
            source_store_name: "Main".to_string(),
            lookup: LookupMethod::Sku,
            lines: vec![],
            payload: json!({}),
        };
        let note = order_note(&request);
        assert!(note.starts_with("ChannelName\nMain\n\nChannelOrderNo\n1001"));
        assert!(note.contains("IdempotencyKey\no:d"));
        assert!(note.ends_with("Integrator\norder-sync"));
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::UNAUTHORIZED, "").is_auth());
        assert!(classify_status(StatusCode::FORBIDDEN, "").is_auth());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, "").is_retryable());
        assert_eq!(
            classify_status(StatusCode::UNPROCESSABLE_ENTITY, "bad").kind(),
            "rejected"
        );
    }

    #[test]
    fn test_next_page_url() {
        let header = r#"<https://shop.example/admin/api/2024-01/orders.json?page_info=abc>; rel="previous", <https://shop.example/admin/api/2024-01/orders.json?page_info=def>; rel="next""#;
        assert_eq!(
            next_page_url(header).as_deref(),
            Some("https://shop.example/admin/api/2024-01/orders.json?page_info=def")
        );
        assert_eq!(next_page_url(r#"<https://x>; rel="previous""#), None);
    }

    fn shipped_line(source_line_id: &str, quantity: u32) -> DispatchLine {
        DispatchLine {
            source_line_id: Some(source_line_id.to_string()),
            quantity,
            ..line(Some("SKU"), None)
        }
    }

    fn fulfillment_orders() -> Value {
        json!({
            "fulfillment_orders": [
                {
                    "id": 1,
                    "status": "closed",
                    "line_items": [{"id": 10, "line_item_id": 9001, "fulfillable_quantity": 2}]
                },
                {
                    "id": 2,
                    "status": "open",
                    "line_items": [
                        {"id": 20, "line_item_id": 9001, "fulfillable_quantity": 2},
                        {"id": 21, "line_item_id": 9002, "fulfillable_quantity": 1}
                    ]
                },
                {
                    "id": 3,
                    "status": "in_progress",
                    "line_items": [{"id": 30, "line_item_id": 9001, "fulfillable_quantity": 5}]
                }
            ]
        })
    }

    #[test]
    fn test_fulfillment_covers_only_dispatched_lines() {
        let items = fulfillment_line_items(&fulfillment_orders(), &[shipped_line("9002", 1)]);

        assert_eq!(
            items,
            vec![json!({
                "fulfillment_order_id": 2,
                "fulfillment_order_line_items": [{"id": 21, "quantity": 1}]
            })]
        );
    }

    #[test]
    fn test_fulfillment_quantity_spreads_over_open_orders() {
        let items = fulfillment_line_items(&fulfillment_orders(), &[shipped_line("9001", 3)]);

        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["fulfillment_order_id"], json!(2));
        assert_eq!(items[0]["fulfillment_order_line_items"], json!([{"id": 20, "quantity": 2}]));
        assert_eq!(items[1]["fulfillment_order_id"], json!(3));
        assert_eq!(items[1]["fulfillment_order_line_items"], json!([{"id": 30, "quantity": 1}]));
    }

    #[test]
    fn test_fulfillment_skips_lines_without_source_ids() {
        let items = fulfillment_line_items(&fulfillment_orders(), &[line(Some("SKU"), None)]);
        assert!(items.is_empty());
    }

    #[test]
    fn test_fulfillment_body() {
        let items = fulfillment_line_items(&fulfillment_orders(), &[shipped_line("9002", 1)]);
        let body = fulfillment_body(items, &TrackingState::shipped("DHL", "JD1"));

        assert_eq!(body["fulfillment"]["notify_customer"], json!(false));
        assert_eq!(body["fulfillment"]["tracking_info"]["number"], json!("JD1"));
        assert_eq!(
            body["fulfillment"]["line_items_by_fulfillment_order"][0]["fulfillment_order_id"],
            json!(2)
        );
    }

    #[test]
    fn test_idempotency_key_lookup() {
        let order = json!({
            "id": 7,
            "note_attributes": [
                {"name": "gift", "value": "yes"},
                {"name": "IdempotencyKey", "value": "o:d"}
            ]
        });
        assert!(carries_idempotency_key(&order, "o:d"));
        assert!(!carries_idempotency_key(&order, "o:x"));
        assert!(!carries_idempotency_key(&json!({"id": 8}), "o:d"));
    }

    #[test]
    fn test_cursor_ordering() {
        assert!(later_than("2024-05-01T10:00:00Z", "2024-05-01T11:00:00+02:00"));
        assert!(!later_than("2024-05-01T08:00:00Z", "2024-05-01T09:00:00Z"));
    }
}
