//! Order/checkout gateway collaborator interface.
//!
//! The core talks to the commerce platform exclusively through these four
//! operations. Identifiers returned by the gateway are propagated without
//! alteration, and the durable payment-progress record is mutated only
//! through `set_remaining_paid`, never directly by UI-facing code.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::errors::ServiceError;
use crate::models::{DepositLineItem, PartialPaymentRecord};

pub mod memory;
pub mod shopify;

pub use memory::InMemoryGateway;
pub use shopify::ShopifyGateway;

/// Draft order plus the payable checkout link for its deposit.
#[derive(Debug, Clone)]
pub struct DraftOrderCheckout {
    pub draft_order_id: String,
    pub checkout_url: String,
}

#[async_trait]
pub trait CommerceGateway: Send + Sync {
    /// Creates a draft order carrying the purchased items and returns a
    /// checkout link payable for `deposit_amount`. The session id is
    /// attached to the draft so the eventual order can be traced back, and
    /// the order's partial-payment record is initialized with both amounts
    /// so later balance reconciliation has something to read.
    async fn create_draft_order_checkout(
        &self,
        session_id: &str,
        items: &[DepositLineItem],
        customer_id: Option<&str>,
        deposit_amount: Decimal,
        remaining_amount: Decimal,
    ) -> Result<DraftOrderCheckout, ServiceError>;

    /// Produces a checkout URL for `amount` against an existing draft order.
    /// The URL is not assumed stable across calls.
    async fn create_checkout_for_amount(
        &self,
        draft_order_id: &str,
        amount: Decimal,
    ) -> Result<String, ServiceError>;

    /// Fetches the durable payment-progress record for an order, if one
    /// exists.
    async fn get_partial_payment_record(
        &self,
        order_id: &str,
    ) -> Result<Option<PartialPaymentRecord>, ServiceError>;

    /// Persists `remaining_paid = true` (and the recomputed status) on the
    /// order's record and returns the updated record. Failures are
    /// retryable by the caller.
    async fn set_remaining_paid(
        &self,
        order_id: &str,
        transaction_id: Option<&str>,
    ) -> Result<PartialPaymentRecord, ServiceError>;
}
