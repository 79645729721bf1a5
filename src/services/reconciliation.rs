//! Reconciles balance-paid notifications against the gateway's
//! partial-payment records.
//!
//! Redelivery safety comes from three layers working together: a dedup log
//! keyed by transaction id, a per-order async lock serializing concurrent
//! notifications for the same order, and the paid flag itself, which only
//! moves false to true once.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::CommerceGateway;
use crate::models::PaymentStatus;
use crate::store::ExpiringStore;

/// Redelivered transaction ids are recognized for this long.
const DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Balance-paid notification body as payment providers send it. Ids arrive
/// as either numbers or strings depending on the provider, so they are
/// captured as raw values and normalized during resolution.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BalancePaidNotification {
    #[serde(default)]
    pub order: Option<OrderRef>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub transaction: Option<TransactionRef>,
    #[serde(default)]
    pub amount: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OrderRef {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub admin_graphql_api_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionRef {
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub order_id: String,
    pub payment_status: PaymentStatus,
    /// True when the notification was a redelivery and nothing changed.
    pub already_applied: bool,
}

pub struct PaymentReconciler {
    gateway: Arc<dyn CommerceGateway>,
    event_sender: EventSender,
    seen_transactions: ExpiringStore<()>,
    // Entries are evicted once the last in-flight notification for the
    // order finishes, so the map stays bounded by concurrency, not history.
    order_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl PaymentReconciler {
    pub fn new(gateway: Arc<dyn CommerceGateway>, event_sender: EventSender) -> Self {
        Self {
            gateway,
            event_sender,
            seen_transactions: ExpiringStore::new(),
            order_locks: DashMap::new(),
        }
    }

    /// Applies a balance-paid notification to its order's payment record.
    ///
    /// Redeliveries succeed with `already_applied = true`; a notification
    /// that cannot be tied to an order is rejected, and one for an order
    /// without a partial-payment record is not found.
    #[instrument(skip(self, notification))]
    pub async fn process_balance_paid(
        &self,
        notification: &BalancePaidNotification,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let order_id = resolve_order_id(notification).ok_or(ServiceError::OrderNotResolved)?;
        let transaction_id = resolve_transaction_id(notification);

        if let Some(txn) = &transaction_id {
            if self.seen_transactions.get(&dedup_key(txn)).is_some() {
                // Only successfully applied transactions enter the log, so
                // the order is known fully paid.
                info!(%order_id, transaction_id = %txn, "Duplicate transaction, skipping");
                return Ok(ReconciliationOutcome {
                    order_id,
                    payment_status: PaymentStatus::FullyPaid,
                    already_applied: true,
                });
            }
        }

        // Clone the lock handle out before awaiting; the map guard must not
        // live across an await point.
        let lock = self
            .order_locks
            .entry(order_id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock().await;
            self.reconcile_order(&order_id, &transaction_id, notification)
                .await
        };
        drop(lock);
        // Evict the entry once no other task holds a handle; remove_if takes
        // the shard lock, so a concurrent entry() cannot clone the Arc in
        // between the count check and the removal.
        self.order_locks
            .remove_if(&order_id, |_, l| Arc::strong_count(l) == 1);

        result
    }

    async fn reconcile_order(
        &self,
        order_id: &str,
        transaction_id: &Option<String>,
        notification: &BalancePaidNotification,
    ) -> Result<ReconciliationOutcome, ServiceError> {
        let record = self
            .gateway
            .get_partial_payment_record(order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "No partial payment record for order {}",
                    order_id
                ))
            })?;

        if let Some(amount) = parse_amount(notification) {
            if amount != record.remaining_amount {
                warn!(
                    %order_id,
                    notified = %amount,
                    expected = %record.remaining_amount,
                    "Notification amount differs from remaining balance"
                );
            }
        }

        if record.remaining_paid {
            info!(%order_id, "Remaining balance already recorded");
            if let Some(txn) = transaction_id {
                self.seen_transactions.insert(dedup_key(txn), (), DEDUP_TTL);
            }
            return Ok(ReconciliationOutcome {
                order_id: order_id.to_owned(),
                payment_status: record.payment_status,
                already_applied: true,
            });
        }

        let updated = self
            .gateway
            .set_remaining_paid(order_id, transaction_id.as_deref())
            .await?;

        info!(%order_id, status = %updated.payment_status.as_str(), "Remaining balance applied");
        self.event_sender
            .send(Event::RemainingBalancePaid {
                order_id: order_id.to_owned(),
                transaction_id: transaction_id.clone(),
            })
            .await;

        // Inserted only after success so a failed attempt stays retryable.
        if let Some(txn) = transaction_id {
            self.seen_transactions.insert(dedup_key(txn), (), DEDUP_TTL);
        }

        Ok(ReconciliationOutcome {
            order_id: order_id.to_owned(),
            payment_status: updated.payment_status,
            already_applied: false,
        })
    }
}

fn dedup_key(transaction_id: &str) -> String {
    format!("txn:{}", transaction_id)
}

fn value_to_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Where the order identifier was found in the payload. Decoded into an
/// explicit variant so every shape the providers send is handled by name.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OrderIdentity {
    /// `order.id` — explicit order reference
    Explicit(String),
    /// `order.admin_graphql_api_id` — embedded object's gid
    EmbeddedGid(String),
    /// top-level `id` fallback
    TopLevel(String),
}

impl OrderIdentity {
    fn into_id(self) -> String {
        match self {
            OrderIdentity::Explicit(id)
            | OrderIdentity::EmbeddedGid(id)
            | OrderIdentity::TopLevel(id) => id,
        }
    }
}

fn resolve_order_identity(notification: &BalancePaidNotification) -> Option<OrderIdentity> {
    if let Some(order) = &notification.order {
        if let Some(id) = order.id.as_ref().and_then(value_to_id) {
            return Some(OrderIdentity::Explicit(id));
        }
        if let Some(gid) = &order.admin_graphql_api_id {
            if !gid.is_empty() {
                return Some(OrderIdentity::EmbeddedGid(gid.clone()));
            }
        }
    }
    notification
        .id
        .as_ref()
        .and_then(value_to_id)
        .map(OrderIdentity::TopLevel)
}

fn resolve_order_id(notification: &BalancePaidNotification) -> Option<String> {
    resolve_order_identity(notification).map(OrderIdentity::into_id)
}

/// Transaction id is the top-level notification id when present, otherwise
/// the nested transaction's id.
fn resolve_transaction_id(notification: &BalancePaidNotification) -> Option<String> {
    notification
        .id
        .as_ref()
        .and_then(value_to_id)
        .or_else(|| {
            notification
                .transaction
                .as_ref()
                .and_then(|t| t.id.as_ref())
                .and_then(value_to_id)
        })
}

fn parse_amount(notification: &BalancePaidNotification) -> Option<Decimal> {
    match notification.amount.as_ref()? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.to_string().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::InMemoryGateway;
    use crate::models::PartialPaymentRecord;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn reconciler() -> (PaymentReconciler, Arc<InMemoryGateway>, mpsc::Receiver<Event>) {
        let gateway = Arc::new(InMemoryGateway::new());
        let (tx, rx) = mpsc::channel(16);
        let reconciler = PaymentReconciler::new(gateway.clone(), EventSender::new(tx));
        (reconciler, gateway, rx)
    }

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

    fn notification(value: Value) -> BalancePaidNotification {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn order_id_resolution_chain() {
        let n = notification(json!({
            "order": { "id": 5001, "admin_graphql_api_id": "gid://shopify/Order/5001" },
            "id": "txn_1"
        }));
        assert_eq!(
            resolve_order_identity(&n).unwrap(),
            OrderIdentity::Explicit("5001".into())
        );

        let n = notification(json!({
            "order": { "admin_graphql_api_id": "gid://shopify/Order/5001" },
            "id": "txn_1"
        }));
        assert_eq!(
            resolve_order_identity(&n).unwrap(),
            OrderIdentity::EmbeddedGid("gid://shopify/Order/5001".into())
        );

        let n = notification(json!({ "id": 5001 }));
        assert_eq!(
            resolve_order_identity(&n).unwrap(),
            OrderIdentity::TopLevel("5001".into())
        );
        assert_eq!(resolve_order_id(&n).unwrap(), "5001");

        let n = notification(json!({ "transaction": { "id": "txn_1" } }));
        assert!(resolve_order_identity(&n).is_none());
    }

    #[test]
    fn transaction_id_prefers_top_level_id() {
        let n = notification(json!({ "id": "t1", "transaction": { "id": "t2" } }));
        assert_eq!(resolve_transaction_id(&n).unwrap(), "t1");

        let n = notification(json!({ "transaction": { "id": "t2" } }));
        assert_eq!(resolve_transaction_id(&n).unwrap(), "t2");
    }

    #[tokio::test]
    async fn first_application_persists_and_emits_event() {
        let (reconciler, gateway, mut rx) = reconciler();
        gateway.seed_record("5001", seeded_record());

        let outcome = reconciler
            .process_balance_paid(&notification(json!({
                "order": { "id": 5001 },
                "transaction": { "id": "txn_9" },
                "amount": "700"
            })))
            .await
            .unwrap();

        assert_eq!(outcome.order_id, "5001");
        assert_eq!(outcome.payment_status, PaymentStatus::FullyPaid);
        assert!(!outcome.already_applied);
        assert_eq!(gateway.set_remaining_paid_calls(), 1);

        match rx.recv().await.unwrap() {
            Event::RemainingBalancePaid {
                order_id,
                transaction_id,
            } => {
                assert_eq!(order_id, "5001");
                assert_eq!(transaction_id.as_deref(), Some("txn_9"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn redelivery_is_applied_once() {
        let (reconciler, gateway, mut rx) = reconciler();
        gateway.seed_record("5001", seeded_record());
        let body = json!({ "order": { "id": 5001 }, "id": "txn_9" });

        let first = reconciler
            .process_balance_paid(&notification(body.clone()))
            .await
            .unwrap();
        assert!(!first.already_applied);

        let second = reconciler
            .process_balance_paid(&notification(body))
            .await
            .unwrap();
        assert!(second.already_applied);
        assert_eq!(second.payment_status, PaymentStatus::FullyPaid);

        // One persistence call, one event.
        assert_eq!(gateway.set_remaining_paid_calls(), 1);
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_deliveries_for_one_order_apply_once() {
        let (reconciler, gateway, mut rx) = reconciler();
        gateway.seed_record("5001", seeded_record());

        // Distinct transaction ids bypass the dedup log entirely, so the
        // per-order lock and the paid flag must carry idempotency alone.
        let a = notification(json!({ "order": { "id": 5001 }, "id": "txn_a" }));
        let b = notification(json!({ "order": { "id": 5001 }, "id": "txn_b" }));
        let (first, second) = tokio::join!(
            reconciler.process_balance_paid(&a),
            reconciler.process_balance_paid(&b)
        );
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(gateway.set_remaining_paid_calls(), 1);
        assert_ne!(first.already_applied, second.already_applied);
        assert_eq!(first.payment_status, PaymentStatus::FullyPaid);
        assert_eq!(second.payment_status, PaymentStatus::FullyPaid);

        // Exactly one side effect for the pair.
        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn order_lock_is_released_after_processing() {
        let (reconciler, gateway, _rx) = reconciler();
        gateway.seed_record("5001", seeded_record());

        reconciler
            .process_balance_paid(&notification(json!({
                "order": { "id": 5001 },
                "id": "txn_9"
            })))
            .await
            .unwrap();
        assert!(reconciler.order_locks.is_empty());

        // Failed resolution to a record also leaves no entry behind.
        let _ = reconciler
            .process_balance_paid(&notification(json!({ "order": { "id": 404 } })))
            .await;
        assert!(reconciler.order_locks.is_empty());
    }

    #[tokio::test]
    async fn already_paid_record_short_circuits_without_transaction_id() {
        let (reconciler, gateway, _rx) = reconciler();
        let mut record = seeded_record();
        record.apply_remaining_paid();
        gateway.seed_record("5001", record);

        let outcome = reconciler
            .process_balance_paid(&notification(json!({ "order": { "id": 5001 } })))
            .await
            .unwrap();
        assert!(outcome.already_applied);
        assert_eq!(gateway.set_remaining_paid_calls(), 0);
    }

    #[tokio::test]
    async fn unknown_order_is_not_found() {
        let (reconciler, _gateway, _rx) = reconciler();
        let err = reconciler
            .process_balance_paid(&notification(json!({ "order": { "id": 404 } })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unresolvable_order_is_rejected() {
        let (reconciler, _gateway, _rx) = reconciler();
        let err = reconciler
            .process_balance_paid(&notification(json!({ "amount": "700" })))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::OrderNotResolved));
    }

    #[tokio::test]
    async fn amount_mismatch_still_applies() {
        let (reconciler, gateway, _rx) = reconciler();
        gateway.seed_record("5001", seeded_record());

        let outcome = reconciler
            .process_balance_paid(&notification(json!({
                "order": { "id": 5001 },
                "amount": "650"
            })))
            .await
            .unwrap();
        assert!(!outcome.already_applied);
        assert_eq!(outcome.payment_status, PaymentStatus::FullyPaid);
    }
}
