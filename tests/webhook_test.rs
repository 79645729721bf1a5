mod common;

use axum::http::StatusCode;
use rust_decimal_macros::dec;
use serde_json::json;

use common::{body_json, sign, TestApp};
use layaway_api::models::{PartialPaymentRecord, PaymentStatus};

fn seeded_record() -> PartialPaymentRecord {
    PartialPaymentRecord {
        session_id: "dep_1735689600000_k3v9x2a7q".into(),
        deposit_amount: dec!(300),
        remaining_amount: dec!(700),
        deposit_paid: true,
        remaining_paid: false,
        payment_status: PaymentStatus::PartialPaid,
        payment_link: None,
        plan: None,
    }
}

#[tokio::test]
async fn signed_notification_marks_remaining_paid() {
    let app = TestApp::new().await;
    app.gateway().seed_record("5001", seeded_record());

    let response = app
        .signed_webhook(&json!({
            "order": { "id": 5001 },
            "id": "txn_100",
            "amount": "700"
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["order_id"], "5001");
    assert_eq!(body["payment_status"], "fully_paid");
    assert_eq!(body["already_applied"], false);
    assert_eq!(app.gateway().set_remaining_paid_calls(), 1);
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let app = TestApp::new().await;
    app.gateway().seed_record("5001", seeded_record());

    let body = serde_json::to_vec(&json!({ "order": { "id": 5001 } })).unwrap();
    let response = app.webhook(&body, None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Nothing reached the gateway.
    assert_eq!(app.gateway().set_remaining_paid_calls(), 0);
}

#[tokio::test]
async fn invalid_signature_is_unauthorized_without_detail() {
    let app = TestApp::new().await;
    app.gateway().seed_record("5001", seeded_record());

    let body = serde_json::to_vec(&json!({ "order": { "id": 5001 } })).unwrap();
    let forged = sign("wrong_secret_sixteen_chars", &body);
    let response = app.webhook(&body, Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let payload = body_json(response).await;
    assert_eq!(payload["message"], "Unauthorized");
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let app = TestApp::new().await;
    app.gateway().seed_record("5001", seeded_record());

    let signed_body = serde_json::to_vec(&json!({ "order": { "id": 5001 } })).unwrap();
    let signature = sign(common::TEST_WEBHOOK_SECRET, &signed_body);
    let tampered = serde_json::to_vec(&json!({ "order": { "id": 5002 } })).unwrap();

    let response = app.webhook(&tampered, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn redelivered_notification_applies_once() {
    let app = TestApp::new().await;
    app.gateway().seed_record("5001", seeded_record());
    let notification = json!({ "order": { "id": 5001 }, "id": "txn_100" });

    let first = body_json(app.signed_webhook(&notification).await).await;
    assert_eq!(first["already_applied"], false);

    let second = app.signed_webhook(&notification).await;
    assert_eq!(second.status(), StatusCode::OK);
    let second = body_json(second).await;
    assert_eq!(second["already_applied"], true);
    assert_eq!(second["payment_status"], "fully_paid");

    assert_eq!(app.gateway().set_remaining_paid_calls(), 1);
}

#[tokio::test]
async fn unknown_order_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .signed_webhook(&json!({ "order": { "id": 404 } }))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unresolvable_order_is_bad_request() {
    let app = TestApp::new().await;

    let response = app.signed_webhook(&json!({ "amount": "700" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["code"], "order_not_resolved");
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let app = TestApp::new().await;

    let body = b"{not json";
    let signature = sign(common::TEST_WEBHOOK_SECRET, body);
    let response = app.webhook(body, Some(&signature)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notification_resolves_order_from_admin_graphql_id() {
    let app = TestApp::new().await;
    app.gateway()
        .seed_record("gid://shopify/Order/5001", seeded_record());

    let response = app
        .signed_webhook(&json!({
            "order": { "admin_graphql_api_id": "gid://shopify/Order/5001" },
            "transaction": { "id": "txn_200" }
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["order_id"], "gid://shopify/Order/5001");
}

#[tokio::test]
async fn full_deposit_flow_reconciles_through_webhook() {
    let app = TestApp::new().await;

    // Open a session; the in-memory gateway seeds the order record.
    let created = body_json(
        app.request(
            axum::http::Method::POST,
            "/api/v1/deposit-sessions",
            Some(json!({
                "items": [{ "variant_id": "gid://shopify/ProductVariant/11", "quantity": 1 }],
                "total_amount": "1000",
                "deposit_amount": "300"
            })),
        )
        .await,
    )
    .await;
    let draft_order_id = created["draft_order_id"].as_str().unwrap().to_string();

    let response = app
        .signed_webhook(&json!({
            "order": { "admin_graphql_api_id": draft_order_id },
            "id": "txn_300"
        }))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["order_id"], draft_order_id);
    assert_eq!(body["payment_status"], "fully_paid");
}

#[tokio::test]
async fn unsigned_webhook_allowed_only_with_development_fallback() {
    use layaway_api::{
        config::AppConfig,
        events::{self, EventSender},
        gateway::{CommerceGateway, InMemoryGateway},
        handlers::AppServices,
        store::ExpiringStore,
        AppState,
    };
    use std::{sync::Arc, time::Duration};
    use tokio::sync::mpsc;
    use tower::ServiceExt;

    let mut cfg = AppConfig::new("127.0.0.1", 18_080, "development");
    cfg.allow_unsigned_webhooks = true;

    let (event_tx, event_rx) = mpsc::channel(16);
    let event_sender = EventSender::new(event_tx);
    tokio::spawn(events::process_events(event_rx));

    let gateway = Arc::new(InMemoryGateway::new());
    gateway.seed_record("5001", seeded_record());
    let sessions = Arc::new(ExpiringStore::new());
    let services = AppServices::new(
        gateway.clone() as Arc<dyn CommerceGateway>,
        sessions.clone(),
        event_sender,
        Duration::from_secs(86_400),
    );
    let state = AppState {
        config: cfg,
        sessions,
        services,
    };
    let router = axum::Router::new()
        .nest("/api/v1", layaway_api::api_v1_routes())
        .with_state(state);

    let request = axum::http::Request::builder()
        .method(axum::http::Method::POST)
        .uri("/api/v1/webhooks/balance-paid")
        .header("content-type", "application/json")
        .body(axum::body::Body::from(
            serde_json::to_vec(&json!({ "order": { "id": 5001 } })).unwrap(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
