use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events emitted by the deposit and reconciliation services.
///
/// `RemainingBalancePaid` fires at most once per order: the reconciler gates
/// it on the paid flag's previous value, so redelivered notifications never
/// re-trigger downstream consumers (fulfillment, email).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    DepositSessionCreated {
        session_id: String,
        draft_order_id: String,
    },
    CheckoutCreated {
        session_id: String,
    },
    RemainingBalancePaid {
        order_id: String,
        transaction_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event; delivery is best-effort and never fails the request
    /// that produced it.
    pub async fn send(&self, event: Event) {
        if let Err(err) = self.sender.send(event).await {
            warn!("Failed to enqueue event: {}", err);
        }
    }
}

/// Drains the event channel. Runs as a spawned task for the lifetime of the
/// process.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match event {
            Event::DepositSessionCreated {
                session_id,
                draft_order_id,
            } => {
                info!(%session_id, %draft_order_id, "Deposit session created");
            }
            Event::CheckoutCreated { session_id } => {
                info!(%session_id, "Checkout created for deposit session");
            }
            Event::RemainingBalancePaid {
                order_id,
                transaction_id,
            } => {
                info!(%order_id, ?transaction_id, "Remaining balance collected");
            }
        }
    }
}
