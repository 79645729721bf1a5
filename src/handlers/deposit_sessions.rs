//! Deposit session endpoints: create, view, and checkout for the remaining
//! balance.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

use crate::errors::ApiError;
use crate::models::{DepositLineItem, DepositSession};
use crate::services::deposits::NewDepositSession;
use crate::AppState;

use super::common::{created_response, success_response, validate_input};

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[validate(schema(
    function = "validate_deposit_below_total",
    skip_on_field_errors = false
))]
pub struct CreateDepositSessionRequest {
    /// Commerce customer id, when the buyer is signed in
    #[validate(length(min = 1, message = "customer_id must not be empty when provided"))]
    pub customer_id: Option<String>,
    /// Purchase lines the deposit covers
    #[validate(
        length(min = 1, message = "at least one item is required"),
        custom = "validate_items"
    )]
    pub items: Vec<DepositLineItem>,
    /// Full purchase amount
    #[validate(custom = "validate_positive_amount")]
    pub total_amount: Decimal,
    /// Amount charged up front; must be below the total
    #[validate(custom = "validate_positive_amount")]
    pub deposit_amount: Decimal,
}

fn validate_positive_amount(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount > Decimal::ZERO {
        Ok(())
    } else {
        let mut err = ValidationError::new("positive_amount");
        err.message = Some("must be greater than zero".into());
        Err(err)
    }
}

fn validate_items(items: &[DepositLineItem]) -> Result<(), ValidationError> {
    for item in items {
        if item.variant_id.trim().is_empty() {
            let mut err = ValidationError::new("variant_id");
            err.message = Some("every item needs a variant_id".into());
            return Err(err);
        }
        if item.quantity == 0 {
            let mut err = ValidationError::new("quantity");
            err.message = Some("every item quantity must be at least 1".into());
            return Err(err);
        }
    }
    Ok(())
}

fn validate_deposit_below_total(
    req: &CreateDepositSessionRequest,
) -> Result<(), ValidationError> {
    if req.deposit_amount >= req.total_amount {
        let mut err = ValidationError::new("deposit_amount");
        err.message = Some("deposit_amount must be less than total_amount".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DepositSessionResponse {
    #[serde(flatten)]
    pub session: DepositSession,
    /// Relative URL where the session can be viewed
    pub deposit_session_url: String,
}

impl From<DepositSession> for DepositSessionResponse {
    fn from(session: DepositSession) -> Self {
        let deposit_session_url = format!("/deposit-sessions/{}", session.session_id);
        Self {
            session,
            deposit_session_url,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
    /// Payment link for the session's remaining balance
    pub checkout_url: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/deposit-sessions",
    request_body = CreateDepositSessionRequest,
    responses(
        (status = 201, description = "Deposit session created", body = DepositSessionResponse),
        (status = 400, description = "Invalid input", body = crate::errors::ErrorResponse),
        (status = 502, description = "Commerce gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Deposit Sessions"
)]
pub async fn create_deposit_session(
    State(state): State<AppState>,
    Json(request): Json<CreateDepositSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&request)?;

    let session = state
        .services
        .deposits
        .create_deposit_session(NewDepositSession {
            customer_id: request.customer_id,
            items: request.items,
            total_amount: request.total_amount,
            deposit_amount: request.deposit_amount,
        })
        .await?;

    Ok(created_response(DepositSessionResponse::from(session)))
}

#[utoipa::path(
    get,
    path = "/api/v1/deposit-sessions/{session_id}",
    params(("session_id" = String, Path, description = "Deposit session id")),
    responses(
        (status = 200, description = "Deposit session", body = DepositSessionResponse),
        (status = 404, description = "Session unknown or expired", body = crate::errors::ErrorResponse)
    ),
    tag = "Deposit Sessions"
)]
pub async fn get_deposit_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let session = state.services.deposits.get_session(&session_id)?;
    Ok(success_response(DepositSessionResponse::from(session)))
}

#[utoipa::path(
    post,
    path = "/api/v1/deposit-sessions/{session_id}/checkout",
    params(("session_id" = String, Path, description = "Deposit session id")),
    responses(
        (status = 200, description = "Checkout link for the remaining balance", body = CheckoutResponse),
        (status = 404, description = "Session unknown or expired", body = crate::errors::ErrorResponse),
        (status = 502, description = "Commerce gateway failure", body = crate::errors::ErrorResponse)
    ),
    tag = "Deposit Sessions"
)]
pub async fn create_checkout(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let checkout_url = state.services.deposits.create_checkout(&session_id).await?;
    Ok(success_response(CheckoutResponse {
        session_id,
        checkout_url,
    }))
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_deposit_session))
        .route("/:session_id", get(get_deposit_session))
        .route("/:session_id/checkout", post(create_checkout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn request() -> CreateDepositSessionRequest {
        CreateDepositSessionRequest {
            customer_id: None,
            items: vec![DepositLineItem {
                variant_id: "gid://shopify/ProductVariant/11".into(),
                quantity: 1,
            }],
            total_amount: dec!(1000),
            deposit_amount: dec!(300),
        }
    }

    #[test]
    fn valid_request_passes() {
        assert!(validate_input(&request()).is_ok());
    }

    #[test]
    fn all_violations_are_collected() {
        let bad = CreateDepositSessionRequest {
            customer_id: None,
            items: vec![],
            total_amount: dec!(0),
            deposit_amount: dec!(0),
        };
        match validate_input(&bad).unwrap_err() {
            ApiError::Validation { errors } => {
                // Empty items, two non-positive amounts, and the schema rule
                // all reported together.
                assert!(errors.len() >= 3);
                assert!(errors.iter().any(|e| e.starts_with("items:")));
                assert!(errors.iter().any(|e| e.starts_with("total_amount:")));
                assert!(errors.iter().any(|e| e.starts_with("deposit_amount:")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn deposit_must_be_below_total() {
        let mut bad = request();
        bad.deposit_amount = dec!(1000);
        assert!(validate_input(&bad).is_err());
    }

    #[test]
    fn zero_quantity_item_is_rejected() {
        let mut bad = request();
        bad.items[0].quantity = 0;
        assert!(validate_input(&bad).is_err());
    }

    #[test]
    fn empty_customer_id_is_rejected_but_absent_is_fine() {
        let mut bad = request();
        bad.customer_id = Some(String::new());
        assert!(validate_input(&bad).is_err());
        assert!(validate_input(&request()).is_ok());
    }
}
