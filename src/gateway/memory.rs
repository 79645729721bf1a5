//! In-memory commerce gateway used in development and tests.
//!
//! Behaves like the real gateway from the service layer's point of view:
//! draft creation hands back an id and checkout link, and each draft gets a
//! partial-payment record that reconciliation can read and update.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::errors::ServiceError;
use crate::models::{DepositLineItem, PartialPaymentRecord, PaymentStatus};

use super::{CommerceGateway, DraftOrderCheckout};

#[derive(Default)]
pub struct InMemoryGateway {
    records: DashMap<String, PartialPaymentRecord>,
    next_id: AtomicU64,
    set_remaining_paid_calls: AtomicU64,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a record under an order id, replacing any existing one.
    pub fn seed_record(&self, order_id: &str, record: PartialPaymentRecord) {
        self.records.insert(order_id.to_string(), record);
    }

    /// Number of `set_remaining_paid` calls that reached persistence.
    pub fn set_remaining_paid_calls(&self) -> u64 {
        self.set_remaining_paid_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommerceGateway for InMemoryGateway {
    async fn create_draft_order_checkout(
        &self,
        session_id: &str,
        _items: &[DepositLineItem],
        _customer_id: Option<&str>,
        deposit_amount: Decimal,
        remaining_amount: Decimal,
    ) -> Result<DraftOrderCheckout, ServiceError> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let draft_order_id = format!("gid://shopify/DraftOrder/{}", n);
        let checkout_url = format!("https://checkout.invalid/drafts/{}", n);

        // A real deposit checkout marks the order's record deposit-paid once
        // the customer pays; the double seeds it up front so webhook flows
        // can run without a storefront in the loop. Amounts are copied as
        // given, so the record always carries the true remaining balance.
        self.records.insert(
            draft_order_id.clone(),
            PartialPaymentRecord {
                session_id: session_id.to_string(),
                deposit_amount,
                remaining_amount,
                deposit_paid: true,
                remaining_paid: false,
                payment_status: PaymentStatus::PartialPaid,
                payment_link: Some(checkout_url.clone()),
                plan: None,
            },
        );

        debug!(%draft_order_id, "Created in-memory draft order");
        Ok(DraftOrderCheckout {
            draft_order_id,
            checkout_url,
        })
    }

    async fn create_checkout_for_amount(
        &self,
        draft_order_id: &str,
        amount: Decimal,
    ) -> Result<String, ServiceError> {
        if !self.records.contains_key(draft_order_id) {
            return Err(ServiceError::NotFound(format!(
                "No draft order {}",
                draft_order_id
            )));
        }
        Ok(format!(
            "https://checkout.invalid/pay/{}?amount={}",
            draft_order_id.rsplit('/').next().unwrap_or(draft_order_id),
            amount
        ))
    }

    async fn get_partial_payment_record(
        &self,
        order_id: &str,
    ) -> Result<Option<PartialPaymentRecord>, ServiceError> {
        Ok(self.records.get(order_id).map(|r| r.value().clone()))
    }

    async fn set_remaining_paid(
        &self,
        order_id: &str,
        _transaction_id: Option<&str>,
    ) -> Result<PartialPaymentRecord, ServiceError> {
        let mut entry = self.records.get_mut(order_id).ok_or_else(|| {
            ServiceError::NotFound(format!("No partial payment record for order {}", order_id))
        })?;

        if entry.apply_remaining_paid() {
            self.set_remaining_paid_calls.fetch_add(1, Ordering::SeqCst);
        }
        Ok(entry.clone())
    }
}
