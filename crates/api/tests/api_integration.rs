//! Integration tests for the API server.

use std::sync::OnceLock;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use ledger_store::InMemoryLedgerStore;
use metrics_exporter_prometheus::PrometheusHandle;
use registry::RegistryConfig;
use serde_json::{Value, json};
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

fn setup() -> axum::Router {
    let state = api::create_default_state(InMemoryLedgerStore::new(), &RegistryConfig::default());
    api::create_app(state, get_metrics_handle())
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

/// Creates a list owned by user 1 with one gift and returns the gift id.
async fn seed_gift(app: &axum::Router, stock: u32, is_group_gift: bool) -> i64 {
    let (status, list) = send(
        app,
        "POST",
        "/lists",
        Some(json!({ "owner_id": 1, "title": "Wedding" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, gift) = send(
        app,
        "POST",
        &format!("/lists/{}/gifts", list["id"]),
        Some(json!({
            "owner_id": 1,
            "name": "Dinner set",
            "price_cents": 4500,
            "currency": "eur",
            "stock": stock,
            "is_group_gift": is_group_gift,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    gift["id"].as_i64().unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let app = setup();
    let (status, json) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = setup();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_reserve_and_confirm() {
    let app = setup();
    let gift_id = seed_gift(&app, 1, false).await;

    let (status, receipt) = send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/reservations"),
        Some(json!({ "user_id": 2, "quantity": 1, "hold_secs": 600 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["reservation"]["status"], "active");
    assert_eq!(receipt["transaction"]["status"], "pending");
    assert_eq!(receipt["transaction"]["amount"], 4500);

    let (status, gift) = send(&app, "GET", &format!("/gifts/{gift_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(gift["availability"]["available"], 0);

    let (status, err) = send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/reservations"),
        Some(json!({ "user_id": 3, "quantity": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "insufficient_stock");

    let reservation_id = &receipt["reservation"]["id"];
    let (status, reservation) = send(
        &app,
        "POST",
        &format!("/reservations/{reservation_id}/confirm"),
        Some(json!({ "outcome": "succeeded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["status"], "completed");

    let transaction_id = &receipt["transaction"]["id"];
    let (status, err) = send(
        &app,
        "POST",
        &format!("/transactions/{transaction_id}/settle"),
        Some(json!({ "outcome": "failed" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "already_terminal");

    let (status, note) = send(
        &app,
        "POST",
        &format!("/transactions/{transaction_id}/thank-you"),
        Some(json!({ "author_id": 1, "message": "Thanks so much!" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(note["sent"], false);
}

#[tokio::test]
async fn test_cancel_requires_owner() {
    let app = setup();
    let gift_id = seed_gift(&app, 2, false).await;
    let (_, receipt) = send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/reservations"),
        Some(json!({ "user_id": 2, "quantity": 2 })),
    )
    .await;
    let reservation_id = &receipt["reservation"]["id"];

    let (status, err) = send(
        &app,
        "POST",
        &format!("/reservations/{reservation_id}/cancel"),
        Some(json!({ "user_id": 3 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(err["code"], "not_owner");

    let (status, reservation) = send(
        &app,
        "POST",
        &format!("/reservations/{reservation_id}/cancel"),
        Some(json!({ "user_id": 9, "admin": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reservation["status"], "cancelled");
}

#[tokio::test]
async fn test_group_gift_flow() {
    let app = setup();
    let gift_id = seed_gift(&app, 1, true).await;
    let expiry = Utc::now() + Duration::days(7);

    let (status, campaign) = send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/group-gift"),
        Some(json!({
            "target_cents": 10000,
            "min_contribution_cents": 1000,
            "expiry_date": expiry,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let group_gift_id = &campaign["id"];

    let (status, err) = send(
        &app,
        "POST",
        &format!("/group-gifts/{group_gift_id}/contributions"),
        Some(json!({ "user_id": 2, "amount_cents": 500 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "below_minimum");

    let (status, receipt) = send(
        &app,
        "POST",
        &format!("/group-gifts/{group_gift_id}/contributions"),
        Some(json!({ "user_id": 2, "amount_cents": 10000, "message": "From all of us" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let contribution_id = &receipt["contribution"]["id"];
    let (status, settlement) = send(
        &app,
        "POST",
        &format!("/contributions/{contribution_id}/settle"),
        Some(json!({ "outcome": "succeeded" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settlement["completed_campaign"], true);
    assert_eq!(settlement["group_gift"]["status"], "completed");

    let (status, view) = send(&app, "GET", &format!("/group-gifts/{group_gift_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["group_gift"]["current_amount"], 10000);
    assert_eq!(view["contributions"].as_array().unwrap().len(), 1);

    let (status, err) = send(
        &app,
        "POST",
        &format!("/group-gifts/{group_gift_id}/contributions"),
        Some(json!({ "user_id": 3, "amount_cents": 2000 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "campaign_not_active");
}

#[tokio::test]
async fn test_sweep_reports_nothing_due() {
    let app = setup();
    let gift_id = seed_gift(&app, 1, false).await;
    send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/reservations"),
        Some(json!({ "user_id": 2, "quantity": 1 })),
    )
    .await;

    let (status, report) = send(&app, "POST", "/sweep", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["reservations_expired"], 0);
    assert_eq!(report["campaigns_expired"], 0);
}

#[tokio::test]
async fn test_unknown_resources_are_404() {
    let app = setup();
    let (status, err) = send(&app, "GET", "/gifts/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(err["code"], "not_found");

    let (status, _) = send(&app, "GET", "/transactions/42", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_validation_errors() {
    let app = setup();
    let (status, err) = send(
        &app,
        "POST",
        "/lists",
        Some(json!({ "owner_id": 1, "title": "   " })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "validation");

    let gift_id = seed_gift(&app, 1, false).await;
    let (status, err) = send(
        &app,
        "POST",
        &format!("/gifts/{gift_id}/reservations"),
        Some(json!({ "user_id": 2, "quantity": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "invalid_quantity");
}

#[tokio::test]
async fn test_out_of_range_hold_is_rejected() {
    let app = setup();
    let gift_id = seed_gift(&app, 1, false).await;
    let uri = format!("/gifts/{gift_id}/reservations");

    let (status, err) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "user_id": 2, "quantity": 1, "hold_secs": i64::MAX })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["code"], "bad_request");

    // Representable as a duration but past the calendar range
    let (status, err) = send(
        &app,
        "POST",
        &uri,
        Some(json!({ "user_id": 2, "quantity": 1, "hold_secs": 9_000_000_000_000_i64 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(err["code"], "validation");

    let (_, gift) = send(&app, "GET", &format!("/gifts/{gift_id}"), None).await;
    assert_eq!(gift["availability"]["available"], 1);
}
