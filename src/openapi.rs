use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Layaway API",
        version = "0.1.0",
        description = r#"
# Layaway API

Deferred-payment coordination for storefront checkouts.

- **Deposit Sessions**: open a session that charges a deposit up front and
  tracks the remaining balance against a draft order.
- **Checkout**: produce a payment link for a session's remaining balance.
- **Webhooks**: signed balance-paid notifications from the commerce backend,
  reconciled idempotently against the order's payment record.

Webhook requests must carry an `X-Signature` header: the base64-encoded
HMAC-SHA256 of the raw request body under the shared secret.
"#
    ),
    tags(
        (name = "Deposit Sessions", description = "Deposit session lifecycle"),
        (name = "Webhooks", description = "Inbound payment notifications")
    ),
    paths(
        crate::handlers::deposit_sessions::create_deposit_session,
        crate::handlers::deposit_sessions::get_deposit_session,
        crate::handlers::deposit_sessions::create_checkout,
        crate::handlers::payment_webhooks::balance_paid_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::handlers::deposit_sessions::CreateDepositSessionRequest,
            crate::handlers::deposit_sessions::DepositSessionResponse,
            crate::handlers::deposit_sessions::CheckoutResponse,
            crate::models::DepositSession,
            crate::models::DepositLineItem,
            crate::models::PaymentStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
