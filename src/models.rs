use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Derived lifecycle stage of a partially-paid order.
///
/// The ordering of the variants matters: reconciliation never moves the
/// status to a lower variant, so `fully_paid` is absorbing.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    PendingDeposit,
    PartialPaid,
    FullyPaid,
}

impl PaymentStatus {
    /// Status is fully determined by the two paid flags.
    pub fn derive(deposit_paid: bool, remaining_paid: bool) -> Self {
        match (deposit_paid, remaining_paid) {
            (true, true) => PaymentStatus::FullyPaid,
            (false, false) => PaymentStatus::PendingDeposit,
            _ => PaymentStatus::PartialPaid,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::PendingDeposit => "pending_deposit",
            PaymentStatus::PartialPaid => "partial_paid",
            PaymentStatus::FullyPaid => "fully_paid",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_deposit" => Ok(PaymentStatus::PendingDeposit),
            "partial_paid" => Ok(PaymentStatus::PartialPaid),
            "fully_paid" => Ok(PaymentStatus::FullyPaid),
            other => Err(format!("unknown payment status: {}", other)),
        }
    }
}

/// One line of the purchase the deposit covers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositLineItem {
    pub variant_id: String,
    pub quantity: u32,
}

/// Ephemeral record describing a pending deferred-payment purchase.
///
/// Owned exclusively by the session store; amounts are fixed at creation.
/// The durable record of payment progress lives on the order at the
/// commerce gateway, not here.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepositSession {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub items: Vec<DepositLineItem>,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
    pub remaining_amount: Decimal,
    pub draft_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Durable payment-progress record, owned by the commerce gateway and
/// referenced here by order id. Each paid flag moves false→true exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialPaymentRecord {
    pub session_id: String,
    pub deposit_amount: Decimal,
    pub remaining_amount: Decimal,
    pub deposit_paid: bool,
    pub remaining_paid: bool,
    pub payment_status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<String>,
}

impl PartialPaymentRecord {
    /// Marks the remaining leg paid. Returns `true` only when the flag was
    /// newly set, so callers can gate one-time side effects on the previous
    /// value rather than on "notification received".
    pub fn apply_remaining_paid(&mut self) -> bool {
        if self.remaining_paid {
            return false;
        }
        self.remaining_paid = true;
        self.recompute_status();
        true
    }

    /// Recomputes `payment_status` from the paid flags, never moving it
    /// backward.
    pub fn recompute_status(&mut self) {
        let derived = PaymentStatus::derive(self.deposit_paid, self.remaining_paid);
        if derived > self.payment_status {
            self.payment_status = derived;
        }
    }
}
