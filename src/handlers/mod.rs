pub mod common;
pub mod deposit_sessions;
pub mod payment_webhooks;

use std::sync::Arc;
use std::time::Duration;

use crate::events::EventSender;
use crate::gateway::CommerceGateway;
use crate::models::DepositSession;
use crate::services::{DepositService, PaymentReconciler};
use crate::store::ExpiringStore;

/// Service singletons shared by every handler.
#[derive(Clone)]
pub struct AppServices {
    pub deposits: Arc<DepositService>,
    pub reconciler: Arc<PaymentReconciler>,
}

impl AppServices {
    pub fn new(
        gateway: Arc<dyn CommerceGateway>,
        sessions: Arc<ExpiringStore<DepositSession>>,
        event_sender: EventSender,
        session_ttl: Duration,
    ) -> Self {
        Self {
            deposits: Arc::new(DepositService::new(
                gateway.clone(),
                sessions,
                event_sender.clone(),
                session_ttl,
            )),
            reconciler: Arc::new(PaymentReconciler::new(gateway, event_sender)),
        }
    }
}
