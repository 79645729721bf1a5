//! Shopify Admin GraphQL implementation of the commerce gateway.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::{DepositLineItem, PartialPaymentRecord, PaymentStatus};

use super::{CommerceGateway, DraftOrderCheckout};

/// Metafield namespace holding the partial-payment record on an order.
const PARTIAL_NAMESPACE: &str = "partial";

#[derive(Clone)]
pub struct ShopifyGateway {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl ShopifyGateway {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ServiceError> {
        let endpoint = cfg.commerce_api_url.clone().ok_or_else(|| {
            ServiceError::InternalError("commerce_api_url is not configured".into())
        })?;
        let token = cfg.commerce_api_token.clone().ok_or_else(|| {
            ServiceError::InternalError("commerce_api_token is not configured".into())
        })?;

        // Every gateway call suspends with this bounded timeout; no lock is
        // ever held across a call.
        let client = reqwest::Client::builder()
            .timeout(cfg.gateway_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            token,
        })
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, ServiceError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("X-Shopify-Access-Token", &self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {}",
                status
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway body: {}", e)))?;

        if let Some(errors) = body.get("errors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(ServiceError::ExternalServiceError(format!(
                    "gateway errors: {}",
                    Value::Array(errors.clone())
                )));
            }
        }

        body.get("data")
            .cloned()
            .ok_or_else(|| ServiceError::ExternalServiceError("gateway response had no data".into()))
    }

    fn check_user_errors(payload: &Value) -> Result<(), ServiceError> {
        if let Some(errors) = payload.get("userErrors").and_then(|e| e.as_array()) {
            if !errors.is_empty() {
                return Err(ServiceError::ExternalServiceError(format!(
                    "gateway user errors: {}",
                    Value::Array(errors.clone())
                )));
            }
        }
        Ok(())
    }

    fn order_gid(order_id: &str) -> String {
        if order_id.starts_with("gid://") {
            order_id.to_string()
        } else {
            format!("gid://shopify/Order/{}", order_id)
        }
    }

    fn record_from_metafields(nodes: &[Value]) -> Option<PartialPaymentRecord> {
        let field = |key: &str| -> Option<&str> {
            nodes
                .iter()
                .find(|node| node.get("key").and_then(Value::as_str) == Some(key))
                .and_then(|node| node.get("value").and_then(Value::as_str))
        };

        let session_id = field("session_id")?.to_string();
        let deposit_amount: Decimal = field("deposit_amount")?.parse().ok()?;
        let remaining_amount: Decimal = field("remaining_amount")?.parse().ok()?;
        let deposit_paid = field("deposit_paid").map(|v| v == "true").unwrap_or(false);
        let remaining_paid = field("remaining_paid").map(|v| v == "true").unwrap_or(false);
        let payment_status = field("payment_status")
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| PaymentStatus::derive(deposit_paid, remaining_paid));

        Some(PartialPaymentRecord {
            session_id,
            deposit_amount,
            remaining_amount,
            deposit_paid,
            remaining_paid,
            payment_status,
            payment_link: field("payment_link").map(str::to_string),
            plan: field("plan").map(str::to_string),
        })
    }

    /// Writes the initial partial-payment record onto a freshly created
    /// draft order. The paid flags start false; the deposit checkout flips
    /// `deposit_paid` when the commerce backend completes the order.
    async fn initialize_partial_record(
        &self,
        owner_id: &str,
        session_id: &str,
        deposit_amount: Decimal,
        remaining_amount: Decimal,
        payment_link: &str,
    ) -> Result<(), ServiceError> {
        let query = r#"
            mutation InitPartialPaymentRecord($metafields: [MetafieldsSetInput!]!) {
              metafieldsSet(metafields: $metafields) {
                metafields { key }
                userErrors { field message }
              }
            }
        "#;

        let text = |key: &str, value: &str| {
            json!({
                "ownerId": owner_id,
                "namespace": PARTIAL_NAMESPACE,
                "key": key,
                "type": "single_line_text_field",
                "value": value
            })
        };
        let flag = |key: &str, value: bool| {
            json!({
                "ownerId": owner_id,
                "namespace": PARTIAL_NAMESPACE,
                "key": key,
                "type": "boolean",
                "value": value.to_string()
            })
        };
        let metafields = json!([
            text("session_id", session_id),
            text("deposit_amount", &deposit_amount.to_string()),
            text("remaining_amount", &remaining_amount.to_string()),
            flag("deposit_paid", false),
            flag("remaining_paid", false),
            text("payment_status", PaymentStatus::PendingDeposit.as_str()),
            text("payment_link", payment_link),
        ]);

        let data = self
            .graphql(query, json!({ "metafields": metafields }))
            .await?;
        Self::check_user_errors(&data["metafieldsSet"])
    }
}

#[async_trait]
impl CommerceGateway for ShopifyGateway {
    #[instrument(skip(self, items))]
    async fn create_draft_order_checkout(
        &self,
        session_id: &str,
        items: &[DepositLineItem],
        customer_id: Option<&str>,
        deposit_amount: Decimal,
        remaining_amount: Decimal,
    ) -> Result<DraftOrderCheckout, ServiceError> {
        // The deposit is charged through a single custom line priced at the
        // deposit amount; the real purchase lines and the session id ride
        // along as custom attributes so they survive onto the final order.
        let items_json = serde_json::to_string(items)?;
        let mut input = json!({
            "lineItems": [{
                "title": "Deposit",
                "originalUnitPrice": deposit_amount.to_string(),
                "quantity": 1
            }],
            "tags": ["partial-payment"],
            "customAttributes": [
                { "key": "session_id", "value": session_id },
                { "key": "deposit_items", "value": items_json }
            ]
        });
        if let Some(customer) = customer_id {
            input["purchasingEntity"] = json!({ "customerId": customer });
        }

        let query = r#"
            mutation CreateDepositDraftOrder($input: DraftOrderInput!) {
              draftOrderCreate(input: $input) {
                draftOrder { id invoiceUrl }
                userErrors { field message }
              }
            }
        "#;

        let data = self.graphql(query, json!({ "input": input })).await?;
        let payload = &data["draftOrderCreate"];
        Self::check_user_errors(payload)?;

        let draft_order_id = payload["draftOrder"]["id"]
            .as_str()
            .ok_or_else(|| {
                ServiceError::ExternalServiceError("draftOrderCreate returned no id".into())
            })?
            .to_string();
        let checkout_url = payload["draftOrder"]["invoiceUrl"]
            .as_str()
            .ok_or_else(|| {
                ServiceError::ExternalServiceError("draftOrderCreate returned no invoiceUrl".into())
            })?
            .to_string();

        // Initialize the durable record up front so a balance notification
        // arriving later always finds amounts to reconcile against.
        self.initialize_partial_record(
            &draft_order_id,
            session_id,
            deposit_amount,
            remaining_amount,
            &checkout_url,
        )
        .await?;

        debug!(%draft_order_id, "Created draft order for deposit");
        Ok(DraftOrderCheckout {
            draft_order_id,
            checkout_url,
        })
    }

    #[instrument(skip(self))]
    async fn create_checkout_for_amount(
        &self,
        draft_order_id: &str,
        amount: Decimal,
    ) -> Result<String, ServiceError> {
        // The draft's invoice is payable for its outstanding amount; the
        // caller passes the expected amount for the audit trail only.
        debug!(%draft_order_id, %amount, "Requesting invoice for outstanding amount");

        let query = r#"
            mutation SendDraftOrderInvoice($id: ID!) {
              draftOrderInvoiceSend(id: $id) {
                draftOrder { id invoiceUrl }
                userErrors { field message }
              }
            }
        "#;

        let data = self
            .graphql(query, json!({ "id": draft_order_id }))
            .await?;
        let payload = &data["draftOrderInvoiceSend"];
        Self::check_user_errors(payload)?;

        payload["draftOrder"]["invoiceUrl"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::ExternalServiceError("invoice send returned no invoiceUrl".into())
            })
    }

    #[instrument(skip(self))]
    async fn get_partial_payment_record(
        &self,
        order_id: &str,
    ) -> Result<Option<PartialPaymentRecord>, ServiceError> {
        let query = r#"
            query PartialPaymentRecord($id: ID!) {
              order(id: $id) {
                metafields(namespace: "partial", first: 10) {
                  nodes { key value }
                }
              }
            }
        "#;

        let data = self
            .graphql(query, json!({ "id": Self::order_gid(order_id) }))
            .await?;

        let order = &data["order"];
        if order.is_null() {
            return Ok(None);
        }
        let nodes = order["metafields"]["nodes"]
            .as_array()
            .cloned()
            .unwrap_or_default();

        Ok(Self::record_from_metafields(&nodes))
    }

    #[instrument(skip(self))]
    async fn set_remaining_paid(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<PartialPaymentRecord, ServiceError> {
        let mut record = self
            .get_partial_payment_record(order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No partial payment record for order {}",
                    order_id
                ))
            })?;

        if !record.apply_remaining_paid() {
            // Flag already set; nothing to persist.
            return Ok(record);
        }

        if let Some(txn) = transaction_id {
            debug!(%order_id, transaction_id = %txn, "Recording remaining balance payment");
        }

        let query = r#"
            mutation MarkRemainingPaid($metafields: [MetafieldsSetInput!]!) {
              metafieldsSet(metafields: $metafields) {
                metafields { key }
                userErrors { field message }
              }
            }
        "#;
        let owner = Self::order_gid(order_id);
        let metafields = json!([
            {
                "ownerId": owner,
                "namespace": PARTIAL_NAMESPACE,
                "key": "remaining_paid",
                "type": "boolean",
                "value": "true"
            },
            {
                "ownerId": owner,
                "namespace": PARTIAL_NAMESPACE,
                "key": "payment_status",
                "type": "single_line_text_field",
                "value": record.payment_status.as_str()
            }
        ]);

        let data = self
            .graphql(query, json!({ "metafields": metafields }))
            .await?;
        Self::check_user_errors(&data["metafieldsSet"])?;

        Ok(record)
    }
}
