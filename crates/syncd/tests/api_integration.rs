//! Integration tests for the daemon HTTP surface.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use common::StoreId;
use domain::{RawOrder, RawOrderLine, RoutingRule, RulePredicate, Store};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{InMemoryOrderRepository, OrderRepository};
use sync::{
    ConnectorRegistry, InMemoryConnector, InMemoryConnectorFactory, SyncConfig, SyncOrchestrator,
};
use syncd::{AppState, CycleRunner};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct Setup {
    app: axum::Router,
    source_conn: InMemoryConnector,
    dest_conn: InMemoryConnector,
}

async fn setup_with_source(source_override: Option<StoreId>) -> Setup {
    let repo = InMemoryOrderRepository::new();
    let source = Store::source("Main Shop", "memory");
    let dest = Store::destination("Warehouse", "memory");
    repo.save_store(source.clone()).await.unwrap();
    repo.save_store(dest.clone()).await.unwrap();
    repo.save_routing_rule(RoutingRule::new(source.id, dest.id, RulePredicate::any(), 0))
        .await
        .unwrap();

    let source_conn = InMemoryConnector::new();
    let dest_conn = InMemoryConnector::new();
    let factory = InMemoryConnectorFactory::new();
    factory.insert(source.id, source_conn.clone());
    factory.insert(dest.id, dest_conn.clone());
    let registry = ConnectorRegistry::new().register("memory", factory);

    let config = SyncConfig::new(source_override.unwrap_or(source.id))
        .with_min_order_age(Duration::ZERO)
        .with_tracking_delay(Duration::ZERO);
    let orchestrator = SyncOrchestrator::new(repo, Arc::new(registry), config);
    let state = Arc::new(AppState {
        runner: Arc::new(CycleRunner::new(orchestrator)),
    });

    Setup {
        app: syncd::create_app(state, get_metrics_handle()),
        source_conn,
        dest_conn,
    }
}

async fn setup() -> Setup {
    setup_with_source(None).await
}

fn sync_request() -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/sync")
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn order(native_id: &str) -> RawOrder {
    RawOrder {
        native_id: native_id.to_string(),
        order_number: Some(format!("#{native_id}")),
        placed_at: Utc::now(),
        payload: serde_json::json!({ "id": native_id }),
        lines: vec![RawOrderLine::new("SKU-001", 2)],
    }
}

#[tokio::test]
async fn test_health_check() {
    let s = setup().await;

    let response = s
        .app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_sync_returns_cycle_report() {
    let s = setup().await;
    s.source_conn.push_source_order(order("1001"));

    let response = s.app.oneshot(sync_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["poll"]["imported"], 1);
    assert_eq!(json["routing"]["routed"], 1);
    assert_eq!(json["dispatch"]["created"], 1);
    assert!(json["halted_stores"].as_array().unwrap().is_empty());
    assert_eq!(s.dest_conn.create_count(), 1);
}

#[tokio::test]
async fn test_sync_reports_aborted_cycle_as_500() {
    let s = setup_with_source(Some(StoreId::new())).await;

    let response = s.app.oneshot(sync_request()).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = body_json(response).await;
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn test_overlapping_sync_is_refused() {
    let s = setup().await;
    s.source_conn
        .set_delay(Some(Duration::from_millis(300)));

    let first = tokio::spawn(s.app.clone().oneshot(sync_request()));
    tokio::time::sleep(Duration::from_millis(50)).await;

    let second = s.app.clone().oneshot(sync_request()).await.unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
    let json = body_json(second).await;
    assert!(json["error"].as_str().is_some());

    let first = first.await.unwrap().unwrap();
    assert_eq!(first.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let s = setup().await;
    s.app.clone().oneshot(sync_request()).await.unwrap();

    let response = s
        .app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("sync_cycles_total"));
}
