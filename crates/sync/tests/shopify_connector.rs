//! Shopify connector tests against a local stub of the Admin REST API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use common::{Cursor, LineId, OrderId};
use domain::{FulfillmentStatus, LookupMethod, Store, StoreRole, TrackingState};
use serde_json::{Value, json};
use sync::{
    ConnectorError, DispatchLine, DispatchRequest, ShopifyConnector, StoreConnector, TrackingPush,
};

const TOKEN: &str = "shpat_test";

/// A request as seen by the stub shop.
#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: HashMap<String, String>,
    token: Option<String>,
    body: Value,
}

struct Reply {
    status: StatusCode,
    body: Value,
    link: Option<String>,
    delay: Option<Duration>,
}

impl Reply {
    fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
            link: None,
            delay: None,
        }
    }

    fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: json!({ "errors": status.canonical_reason() }),
            link: None,
            delay: None,
        }
    }

    fn with_link(mut self, link: String) -> Self {
        self.link = Some(link);
        self
    }

    fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

type Responder = dyn Fn(&Recorded, &str) -> Reply + Send + Sync;

#[derive(Clone)]
struct StubShop {
    base: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
    responder: Arc<Responder>,
}

impl StubShop {
    async fn start(responder: impl Fn(&Recorded, &str) -> Reply + Send + Sync + 'static) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let stub = Self {
            base: format!("http://{}", listener.local_addr().unwrap()),
            requests: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(responder),
        };

        let app = Router::new().fallback(handle).with_state(stub.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        stub
    }

    fn connector(&self, timeout: Duration) -> ShopifyConnector {
        let store = Store::new(
            "Warehouse",
            "shopify",
            StoreRole::Destination,
            "warehouse.example",
            TOKEN,
        );
        ShopifyConnector::new(&store, timeout)
            .unwrap()
            .with_base_url(self.base.clone())
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn requests_to(&self, method: Method, path: &str) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method && r.path == path)
            .collect()
    }
}

async fn handle(
    State(stub): State<StubShop>,
    method: Method,
    uri: Uri,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let recorded = Recorded {
        method,
        path: uri.path().to_string(),
        query,
        token: headers
            .get("x-shopify-access-token")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    };
    let reply = (stub.responder)(&recorded, &stub.base);
    stub.requests
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(recorded);

    if let Some(delay) = reply.delay {
        tokio::time::sleep(delay).await;
    }
    let mut response = (reply.status, axum::Json(reply.body)).into_response();
    if let Some(link) = reply.link {
        response
            .headers_mut()
            .insert(header::LINK, link.parse().unwrap());
    }
    response
}

fn shop_order(id: u64, updated_at: &str) -> Value {
    json!({
        "id": id,
        "order_number": id,
        "created_at": updated_at,
        "updated_at": updated_at,
        "financial_status": "paid",
        "cancelled_at": null,
        "line_items": [{ "id": id * 10, "sku": "PROD-A1", "quantity": 1 }]
    })
}

fn dispatch_request(key: &str) -> DispatchRequest {
    DispatchRequest {
        idempotency_key: key.to_string(),
        order_id: OrderId::new(),
        source_order_number: "1001".to_string(),
        source_store_name: "Main".to_string(),
        lookup: LookupMethod::Sku,
        lines: vec![dispatch_line("9001", "PROD-A1", 2)],
        payload: json!({ "email": "buyer@example.com" }),
    }
}

fn dispatch_line(source_line_id: &str, sku: &str, quantity: u32) -> DispatchLine {
    DispatchLine {
        line_id: LineId::new(),
        source_line_id: Some(source_line_id.to_string()),
        sku: Some(sku.to_string()),
        product_id: None,
        ean: None,
        title: None,
        quantity,
    }
}

fn products() -> Value {
    json!({
        "products": [
            { "id": 1, "variants": [{ "id": 111, "sku": "PROD-A1", "barcode": null }] }
        ]
    })
}

#[tokio::test]
async fn test_fetch_follows_pages_and_advances_cursor() {
    let shop = StubShop::start(|req, base| {
        if req.query.contains_key("page_info") {
            let mut cancelled = shop_order(1003, "2024-05-01T13:00:00Z");
            cancelled["cancelled_at"] = json!("2024-05-01T13:00:00Z");
            Reply::ok(json!({
                "orders": [shop_order(1002, "2024-05-01T12:00:00Z"), cancelled]
            }))
        } else {
            Reply::ok(json!({ "orders": [shop_order(1001, "2024-05-01T10:00:00Z")] }))
                .with_link(format!("<{base}/orders.json?page_info=p2>; rel=\"next\""))
        }
    })
    .await;
    let connector = shop.connector(Duration::from_secs(5));

    let fetched = connector
        .fetch_new_orders(Some(&Cursor::new("2024-05-01T09:00:00Z")))
        .await
        .unwrap();

    let ids: Vec<&str> = fetched.orders.iter().map(|o| o.native_id.as_str()).collect();
    assert_eq!(ids, vec!["1001", "1002"]);
    assert_eq!(fetched.orders[0].lines[0].source_line_id.as_deref(), Some("10010"));
    // Skipped orders still move the cursor forward.
    assert_eq!(
        fetched.next_cursor.as_ref().map(Cursor::as_str),
        Some("2024-05-01T13:00:00Z")
    );

    let requests = shop.requests_to(Method::GET, "/orders.json");
    assert_eq!(requests.len(), 2);
    let first = &requests[0].query;
    assert_eq!(first["status"], "any");
    assert_eq!(first["fulfillment_status"], "unfulfilled");
    assert_eq!(first["updated_at_min"], "2024-05-01T09:00:00Z");
    assert_eq!(first["limit"], "250");
    assert_eq!(requests[1].query["page_info"], "p2");
    assert!(requests.iter().all(|r| r.token.as_deref() == Some(TOKEN)));
}

#[tokio::test]
async fn test_fetch_without_new_orders_keeps_cursor() {
    let shop = StubShop::start(|_, _| Reply::ok(json!({ "orders": [] }))).await;

    let fetched = shop
        .connector(Duration::from_secs(5))
        .fetch_new_orders(None)
        .await
        .unwrap();

    assert!(fetched.orders.is_empty());
    assert!(fetched.next_cursor.is_none());
    assert!(shop.requests()[0].query.contains_key("updated_at_min"));
}

#[tokio::test]
async fn test_create_posts_matched_variants_with_idempotency_key() {
    let shop = StubShop::start(|req, _| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/orders.json") => Reply::ok(json!({ "orders": [] })),
        ("GET", "/products.json") => Reply::ok(products()),
        ("POST", "/orders.json") => Reply::ok(json!({ "order": { "id": 7001 } })),
        _ => Reply::status(StatusCode::NOT_FOUND),
    })
    .await;

    let remote_id = shop
        .connector(Duration::from_secs(5))
        .create_order(&dispatch_request("o1:d1"))
        .await
        .unwrap();
    assert_eq!(remote_id, "7001");

    let lookup = &shop.requests_to(Method::GET, "/orders.json")[0];
    assert_eq!(lookup.query["status"], "any");
    assert!(lookup.query.contains_key("created_at_min"));

    let posts = shop.requests_to(Method::POST, "/orders.json");
    assert_eq!(posts.len(), 1);
    let order = &posts[0].body["order"];
    assert_eq!(order["line_items"], json!([{ "variant_id": 111, "quantity": 2 }]));
    assert_eq!(
        order["note_attributes"],
        json!([{ "name": "IdempotencyKey", "value": "o1:d1" }])
    );
    assert_eq!(order["email"], json!("buyer@example.com"));
}

#[tokio::test]
async fn test_create_retried_after_timeout_returns_existing_order() {
    let created: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
    let shop_orders = created.clone();
    let shop = StubShop::start(move |req, _| {
        let mut orders = shop_orders.lock().unwrap_or_else(PoisonError::into_inner);
        match (req.method.as_str(), req.path.as_str()) {
            ("GET", "/orders.json") => Reply::ok(json!({ "orders": orders.clone() })),
            ("GET", "/products.json") => Reply::ok(products()),
            ("POST", "/orders.json") => {
                // The shop commits the order, but answers too late.
                let order = json!({
                    "id": 7001,
                    "note_attributes": req.body["order"]["note_attributes"].clone()
                });
                orders.push(order.clone());
                Reply::ok(json!({ "order": order })).after(Duration::from_secs(2))
            }
            _ => Reply::status(StatusCode::NOT_FOUND),
        }
    })
    .await;
    let connector = shop.connector(Duration::from_millis(300));
    let request = dispatch_request("o1:d1");

    let err = connector.create_order(&request).await.unwrap_err();
    assert!(matches!(err, ConnectorError::Timeout(_)));

    let remote_id = connector.create_order(&request).await.unwrap();
    assert_eq!(remote_id, "7001");
    assert_eq!(shop.requests_to(Method::POST, "/orders.json").len(), 1);
    assert_eq!(created.lock().unwrap().len(), 1);

    // A different key is not mistaken for the existing order.
    let other = connector.create_order(&dispatch_request("o2:d1")).await;
    assert!(other.is_err());
    assert_eq!(shop.requests_to(Method::POST, "/orders.json").len(), 2);
}

#[tokio::test]
async fn test_create_rejected_when_no_products_match() {
    let shop = StubShop::start(|req, _| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/orders.json") => Reply::ok(json!({ "orders": [] })),
        ("GET", "/products.json") => Reply::ok(json!({
            "products": [{ "id": 1, "variants": [{ "id": 222, "sku": "OTHER" }] }]
        })),
        _ => Reply::status(StatusCode::NOT_FOUND),
    })
    .await;

    let err = shop
        .connector(Duration::from_secs(5))
        .create_order(&dispatch_request("o1:d1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), "rejected");
    assert!(shop.requests_to(Method::POST, "/orders.json").is_empty());
}

#[tokio::test]
async fn test_fetch_tracking_reads_first_fulfillment() {
    let shop = StubShop::start(|req, _| match req.path.as_str() {
        "/orders/7001.json" => Reply::ok(json!({
            "order": {
                "id": 7001,
                "cancelled_at": null,
                "fulfillment_status": "fulfilled",
                "fulfillments": [{
                    "tracking_company": "UPS",
                    "tracking_number": "1Z999",
                    "tracking_url": "https://ups.example/1Z999"
                }]
            }
        })),
        _ => Reply::status(StatusCode::NOT_FOUND),
    })
    .await;
    let connector = shop.connector(Duration::from_secs(5));

    let tracking = connector.fetch_tracking("7001").await.unwrap();
    assert_eq!(
        tracking,
        TrackingState::shipped("UPS", "1Z999").with_url("https://ups.example/1Z999")
    );

    let missing = connector.fetch_tracking("404").await.unwrap_err();
    assert_eq!(missing.kind(), "rejected");
}

#[tokio::test]
async fn test_unauthorized_shop_is_an_auth_error() {
    let shop = StubShop::start(|_, _| Reply::status(StatusCode::UNAUTHORIZED)).await;

    let err = shop
        .connector(Duration::from_secs(5))
        .fetch_tracking("7001")
        .await
        .unwrap_err();
    assert!(err.is_auth());
}

fn source_fulfillment_orders() -> Value {
    json!({
        "fulfillment_orders": [{
            "id": 55,
            "status": "open",
            "line_items": [
                { "id": 501, "line_item_id": 9001, "fulfillable_quantity": 2 },
                { "id": 502, "line_item_id": 9002, "fulfillable_quantity": 1 }
            ]
        }]
    })
}

fn source_shop() -> impl Fn(&Recorded, &str) -> Reply + Send + Sync + 'static {
    |req: &Recorded, _: &str| match (req.method.as_str(), req.path.as_str()) {
        ("GET", "/orders/1001/fulfillment_orders.json") => Reply::ok(source_fulfillment_orders()),
        ("POST", "/fulfillments.json") => Reply::ok(json!({ "fulfillment": { "id": 1 } })),
        ("POST", "/orders/1001/cancel.json") => Reply::ok(json!({ "order": { "id": 1001 } })),
        _ => Reply::status(StatusCode::NOT_FOUND),
    }
}

#[tokio::test]
async fn test_split_order_fulfills_shipped_lines_and_leaves_cancelled_ones() {
    let shop = StubShop::start(source_shop()).await;
    let connector = shop.connector(Duration::from_secs(5));

    let shipped = TrackingPush {
        source_order_id: "1001".to_string(),
        lines: vec![dispatch_line("9001", "PROD-A1", 2)],
        covers_whole_order: false,
        tracking: TrackingState::shipped("UPS", "1Z-A"),
    };
    let cancelled = TrackingPush {
        source_order_id: "1001".to_string(),
        lines: vec![dispatch_line("9002", "PROD-B1", 1)],
        covers_whole_order: false,
        tracking: TrackingState::new(FulfillmentStatus::Cancelled),
    };
    connector.push_tracking_update(&shipped).await.unwrap();
    connector.push_tracking_update(&cancelled).await.unwrap();

    let fulfillments = shop.requests_to(Method::POST, "/fulfillments.json");
    assert_eq!(fulfillments.len(), 1);
    let fulfillment = &fulfillments[0].body["fulfillment"];
    assert_eq!(
        fulfillment["line_items_by_fulfillment_order"],
        json!([{
            "fulfillment_order_id": 55,
            "fulfillment_order_line_items": [{ "id": 501, "quantity": 2 }]
        }])
    );
    assert_eq!(fulfillment["tracking_info"]["number"], json!("1Z-A"));
    assert!(shop.requests_to(Method::POST, "/orders/1001/cancel.json").is_empty());
}

#[tokio::test]
async fn test_whole_order_cancellation_cancels_source_order() {
    let shop = StubShop::start(source_shop()).await;

    let push = TrackingPush {
        source_order_id: "1001".to_string(),
        lines: vec![
            dispatch_line("9001", "PROD-A1", 2),
            dispatch_line("9002", "PROD-B1", 1),
        ],
        covers_whole_order: true,
        tracking: TrackingState::new(FulfillmentStatus::Cancelled),
    };
    shop.connector(Duration::from_secs(5))
        .push_tracking_update(&push)
        .await
        .unwrap();

    assert_eq!(shop.requests_to(Method::POST, "/orders/1001/cancel.json").len(), 1);
    assert!(shop.requests_to(Method::POST, "/fulfillments.json").is_empty());
}

#[tokio::test]
async fn test_unshipped_tracking_is_not_pushed() {
    let shop = StubShop::start(source_shop()).await;

    let push = TrackingPush {
        source_order_id: "1001".to_string(),
        lines: vec![dispatch_line("9001", "PROD-A1", 2)],
        covers_whole_order: true,
        tracking: TrackingState::new(FulfillmentStatus::Partial),
    };
    shop.connector(Duration::from_secs(5))
        .push_tracking_update(&push)
        .await
        .unwrap();

    assert!(shop.requests().is_empty());
}
