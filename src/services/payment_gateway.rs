use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors surfaced by a payment gateway adapter.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The gateway answered and refused the operation.
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    /// The gateway could not be reached or the connection broke.
    #[error("gateway transport failure: {0}")]
    Transport(String),
    /// The gateway answered with something we could not understand.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAuthorizationRequest {
    pub amount_minor_units: i64,
    pub currency: String,
    pub receipt_email: Option<String>,
    /// Always carries `order_id` so webhook events can be traced back.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentAuthorization {
    pub external_ref: String,
    /// Handed to the browser to complete payment; never persisted.
    pub client_secret: String,
    pub raw_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationSnapshot {
    pub raw_status: String,
    pub amount_minor_units: i64,
    pub currency: String,
    pub receipt_url: Option<String>,
    pub failure_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub raw_status: String,
    pub amount_minor_units: i64,
}

/// An inbound gateway event whose signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub event_id: String,
    pub event_type: String,
    pub external_ref: Option<String>,
    pub raw_status: Option<String>,
    pub failure_message: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Adapter over an external payment processor.
///
/// All amounts are integer minor units of `currency`.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn open_authorization(
        &self,
        request: OpenAuthorizationRequest,
    ) -> Result<PaymentAuthorization, GatewayError>;

    async fn fetch_authorization(
        &self,
        external_ref: &str,
    ) -> Result<AuthorizationSnapshot, GatewayError>;

    async fn cancel_authorization(&self, external_ref: &str) -> Result<(), GatewayError>;

    async fn create_refund(
        &self,
        external_ref: &str,
        amount_minor_units: Option<i64>,
        reason: Option<&str>,
    ) -> Result<RefundReceipt, GatewayError>;

    /// Returns `None` for any bad signature or malformed payload.
    fn verify_inbound_event(&self, raw_payload: &[u8], signature_header: &str)
        -> Option<ParsedEvent>;
}
