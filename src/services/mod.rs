pub mod deposits;
pub mod reconciliation;

pub use deposits::DepositService;
pub use reconciliation::{BalancePaidNotification, PaymentReconciler, ReconciliationOutcome};
