//! Deposit session lifecycle: creation, lookup, and checkout links for the
//! remaining balance.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{info, instrument};

use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::CommerceGateway;
use crate::models::{DepositLineItem, DepositSession};
use crate::store::ExpiringStore;

/// Validated input for a new deposit session. Amount invariants are
/// re-checked here so the service is safe to call from any surface.
#[derive(Debug, Clone)]
pub struct NewDepositSession {
    pub customer_id: Option<String>,
    pub items: Vec<DepositLineItem>,
    pub total_amount: Decimal,
    pub deposit_amount: Decimal,
}

pub struct DepositService {
    gateway: Arc<dyn CommerceGateway>,
    sessions: Arc<ExpiringStore<DepositSession>>,
    event_sender: EventSender,
    session_ttl: Duration,
}

impl DepositService {
    pub fn new(
        gateway: Arc<dyn CommerceGateway>,
        sessions: Arc<ExpiringStore<DepositSession>>,
        event_sender: EventSender,
        session_ttl: Duration,
    ) -> Self {
        Self {
            gateway,
            sessions,
            event_sender,
            session_ttl,
        }
    }

    /// Opens a deposit session: creates the draft order at the gateway,
    /// stores the session under its generated id, and returns it.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn create_deposit_session(
        &self,
        input: NewDepositSession,
    ) -> Result<DepositSession, ServiceError> {
        if input.items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "A deposit session needs at least one item".into(),
            ));
        }
        if input.deposit_amount <= Decimal::ZERO || input.total_amount <= Decimal::ZERO {
            return Err(ServiceError::InvalidOperation(
                "Amounts must be positive".into(),
            ));
        }
        if input.deposit_amount >= input.total_amount {
            return Err(ServiceError::InvalidOperation(
                "Deposit amount must be less than the total".into(),
            ));
        }

        let session_id = generate_session_id();
        let remaining_amount = input.total_amount - input.deposit_amount;

        let checkout = self
            .gateway
            .create_draft_order_checkout(
                &session_id,
                &input.items,
                input.customer_id.as_deref(),
                input.deposit_amount,
                remaining_amount,
            )
            .await?;

        let now = Utc::now();
        let session = DepositSession {
            session_id: session_id.clone(),
            customer_id: input.customer_id,
            items: input.items,
            total_amount: input.total_amount,
            deposit_amount: input.deposit_amount,
            remaining_amount,
            draft_order_id: checkout.draft_order_id.clone(),
            checkout_url: Some(checkout.checkout_url),
            created_at: now,
            expires_at: crate::store::expiry_from_now(self.session_ttl),
        };

        if !self
            .sessions
            .insert(session_id.clone(), session.clone(), self.session_ttl)
        {
            // Generated ids carry a millisecond timestamp plus random
            // suffix; a live collision means the generator is broken.
            return Err(ServiceError::InternalError(format!(
                "Session id collision for {}",
                session_id
            )));
        }

        info!(%session_id, draft_order_id = %session.draft_order_id, "Deposit session created");
        self.event_sender
            .send(Event::DepositSessionCreated {
                session_id,
                draft_order_id: session.draft_order_id.clone(),
            })
            .await;

        Ok(session)
    }

    /// Looks up a live session; expired sessions read as absent.
    pub fn get_session(&self, session_id: &str) -> Result<DepositSession, ServiceError> {
        self.sessions.get(session_id).ok_or_else(|| {
            ServiceError::NotFound(format!("Deposit session {} not found", session_id))
        })
    }

    /// Produces a checkout link for the session's remaining balance and
    /// records it on the session.
    #[instrument(skip(self))]
    pub async fn create_checkout(&self, session_id: &str) -> Result<String, ServiceError> {
        let session = self.get_session(session_id)?;

        let checkout_url = self
            .gateway
            .create_checkout_for_amount(&session.draft_order_id, session.remaining_amount)
            .await?;

        // The session may have expired during the gateway call; the link is
        // still valid for the caller either way.
        self.sessions.update(session_id, |s| {
            s.checkout_url = Some(checkout_url.clone());
        });

        self.event_sender
            .send(Event::CheckoutCreated {
                session_id: session_id.to_string(),
            })
            .await;

        Ok(checkout_url)
    }

    pub fn live_session_count(&self) -> usize {
        self.sessions.len()
    }
}

/// Session ids are `dep_<unix-millis>_<9 random lowercase alphanumerics>`.
fn generate_session_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(|c| (c as char).to_ascii_lowercase())
        .collect();
    format!("dep_{}_{}", Utc::now().timestamp_millis(), suffix)
}
