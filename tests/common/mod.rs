use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use base64::Engine;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tokio::sync::mpsc;
use tower::ServiceExt;

use layaway_api::{
    config::AppConfig,
    events::{self, EventSender},
    gateway::{CommerceGateway, InMemoryGateway},
    handlers::AppServices,
    store::ExpiringStore,
    AppState,
};

pub const TEST_WEBHOOK_SECRET: &str = "test_secret_key_for_testing_purposes_only";

/// Helper harness wiring the real router to an in-memory gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    gateway: Arc<InMemoryGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh in-memory state.
    pub async fn new() -> Self {
        Self::with_session_ttl(Duration::from_secs(86_400)).await
    }

    pub async fn with_session_ttl(session_ttl: Duration) -> Self {
        let mut cfg = AppConfig::new("127.0.0.1", 18_080, "test");
        cfg.webhook_secret = Some(TEST_WEBHOOK_SECRET.to_string());
        cfg.session_ttl_secs = session_ttl.as_secs();

        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(InMemoryGateway::new());
        let sessions = Arc::new(ExpiringStore::new());
        let services = AppServices::new(
            gateway.clone() as Arc<dyn CommerceGateway>,
            sessions.clone(),
            event_sender,
            session_ttl,
        );

        let state = AppState {
            config: cfg,
            sessions,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", layaway_api::api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Direct handle on the gateway double for seeding and call assertions.
    pub fn gateway(&self) -> Arc<InMemoryGateway> {
        self.gateway.clone()
    }

    /// Send a JSON request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a webhook body with the given raw bytes and signature header.
    pub async fn webhook(&self, body: &[u8], signature: Option<&str>) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/balance-paid")
            .header("content-type", "application/json");
        if let Some(sig) = signature {
            builder = builder.header("x-signature", sig);
        }

        let request = builder
            .body(Body::from(body.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send a correctly signed webhook body.
    pub async fn signed_webhook(&self, body: &Value) -> axum::response::Response {
        let bytes = serde_json::to_vec(body).expect("failed to serialize webhook body");
        let signature = sign(TEST_WEBHOOK_SECRET, &bytes);
        self.webhook(&bytes, Some(&signature)).await
    }
}

/// Base64 HMAC-SHA256 over the body, as the commerce backend signs webhooks.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response body was not valid json")
}
