use metrics::counter;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order_status::{OrderStatus, PaymentOutcome};
use crate::repositories::OrderRepository;
use crate::services::order_status::apply_outcome;
use crate::services::payment_gateway::PaymentGateway;

/// What happened to a verified webhook event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
    pub event_id: String,
    pub event_type: String,
    /// Whether the event referred to an order we know.
    pub matched: bool,
    /// Whether the matched order was written.
    pub changed: bool,
    pub order_id: Option<Uuid>,
    pub status: Option<OrderStatus>,
}

/// Reconciles orders from gateway-pushed events.
#[derive(Clone)]
pub struct PaymentWebhookService {
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentWebhookService {
    pub fn new(repository: Arc<dyn OrderRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            repository,
            gateway,
        }
    }

    /// Verifies and applies one inbound event.
    ///
    /// Unverifiable events are rejected before storage is touched. Events for
    /// unknown authorizations are acknowledged so the gateway stops retrying.
    #[instrument(skip_all, fields(payload_len = raw_payload.len()))]
    pub async fn process_event(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookAck, ServiceError> {
        let Some(event) = self
            .gateway
            .verify_inbound_event(raw_payload, signature_header)
        else {
            warn!(target: "security", "Payment webhook signature verification failed");
            counter!("order_payments.webhooks.rejected", 1);
            return Err(ServiceError::InvalidSignature);
        };

        let unmatched = |event_id: String, event_type: String| WebhookAck {
            event_id,
            event_type,
            matched: false,
            changed: false,
            order_id: None,
            status: None,
        };

        let Some(external_ref) = event.external_ref.as_deref() else {
            info!(event_id = %event.event_id, event_type = %event.event_type, "Event carries no payment reference, ignoring");
            counter!("order_payments.webhooks.unmatched", 1);
            return Ok(unmatched(event.event_id, event.event_type));
        };

        let Some(order) = self.repository.find_by_payment_ref(external_ref).await? else {
            info!(
                event_id = %event.event_id,
                external_ref = %external_ref,
                "Order not found, ignoring event"
            );
            counter!("order_payments.webhooks.unmatched", 1);
            return Ok(unmatched(event.event_id, event.event_type));
        };

        let outcome = PaymentOutcome::from_event(&event.event_type, event.failure_message.as_deref());
        let (order, transition) = apply_outcome(self.repository.as_ref(), order, &outcome).await?;

        counter!("order_payments.webhooks.applied", 1);
        info!(
            event_id = %event.event_id,
            event_type = %event.event_type,
            order_id = %order.id(),
            status = %order.status(),
            changed = transition.changed,
            "Payment webhook processed"
        );

        Ok(WebhookAck {
            event_id: event.event_id,
            event_type: event.event_type,
            matched: true,
            changed: transition.changed,
            order_id: Some(order.id()),
            status: Some(order.status()),
        })
    }
}
