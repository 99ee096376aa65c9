use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::services::payment_gateway::{
    AuthorizationSnapshot, GatewayError, OpenAuthorizationRequest, ParsedEvent, PaymentAuthorization,
    PaymentGateway, RefundReceipt,
};
use crate::webhooks::WebhookVerifier;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Payment gateway backed by the Stripe REST API (or anything speaking it).
pub struct StripeGateway {
    client: Client,
    api_base: String,
    secret_key: String,
    /// Without a verifier every inbound event is rejected.
    verifier: Option<WebhookVerifier>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentBody {
    id: String,
    status: String,
    client_secret: Option<String>,
    #[serde(default)]
    amount: i64,
    #[serde(default)]
    currency: String,
    latest_charge: Option<Value>,
    last_payment_error: Option<LastPaymentError>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    id: String,
    status: Option<String>,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        verifier: Option<WebhookVerifier>,
    ) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            verifier,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let response = request
            .basic_auth(&self.secret_key, Option::<&str>::None)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(error_from_response(status, &body));
        }

        serde_json::from_slice(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
    }
}

fn error_from_response(status: StatusCode, body: &[u8]) -> GatewayError {
    let detail = serde_json::from_slice::<ErrorEnvelope>(body)
        .ok()
        .map(|envelope| match (envelope.error.message, envelope.error.code) {
            (Some(message), _) => message,
            (None, Some(code)) => code,
            (None, None) => status.to_string(),
        })
        .unwrap_or_else(|| status.to_string());

    if status.is_server_error() {
        GatewayError::Transport(detail)
    } else {
        GatewayError::Rejected(detail)
    }
}

fn open_authorization_form(request: &OpenAuthorizationRequest) -> Vec<(String, String)> {
    let mut form = vec![
        ("amount".to_string(), request.amount_minor_units.to_string()),
        ("currency".to_string(), request.currency.to_ascii_lowercase()),
        (
            "automatic_payment_methods[enabled]".to_string(),
            "true".to_string(),
        ),
    ];
    if let Some(email) = &request.receipt_email {
        form.push(("receipt_email".to_string(), email.clone()));
    }
    let mut metadata: Vec<_> = request.metadata.iter().collect();
    metadata.sort();
    for (key, value) in metadata {
        form.push((format!("metadata[{key}]"), value.clone()));
    }
    form
}

fn receipt_url(latest_charge: Option<&Value>) -> Option<String> {
    latest_charge?
        .get("receipt_url")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn snapshot_from(intent: PaymentIntentBody) -> AuthorizationSnapshot {
    AuthorizationSnapshot {
        receipt_url: receipt_url(intent.latest_charge.as_ref()),
        failure_message: intent.last_payment_error.and_then(|e| e.message),
        raw_status: intent.status,
        amount_minor_units: intent.amount,
        currency: intent.currency.to_ascii_uppercase(),
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[instrument(skip(self, request), fields(amount = request.amount_minor_units))]
    async fn open_authorization(
        &self,
        request: OpenAuthorizationRequest,
    ) -> Result<PaymentAuthorization, GatewayError> {
        let form = open_authorization_form(&request);
        let intent: PaymentIntentBody = self
            .send(self.client.post(self.url("/v1/payment_intents")).form(&form))
            .await?;

        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse("payment intent has no client_secret".to_string())
        })?;
        debug!(external_ref = %intent.id, status = %intent.status, "Opened payment intent");

        Ok(PaymentAuthorization {
            external_ref: intent.id,
            client_secret,
            raw_status: intent.status,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_authorization(
        &self,
        external_ref: &str,
    ) -> Result<AuthorizationSnapshot, GatewayError> {
        let intent: PaymentIntentBody = self
            .send(
                self.client
                    .get(self.url(&format!("/v1/payment_intents/{external_ref}")))
                    .query(&[("expand[]", "latest_charge")]),
            )
            .await?;
        Ok(snapshot_from(intent))
    }

    #[instrument(skip(self))]
    async fn cancel_authorization(&self, external_ref: &str) -> Result<(), GatewayError> {
        let _: PaymentIntentBody = self
            .send(
                self.client
                    .post(self.url(&format!("/v1/payment_intents/{external_ref}/cancel"))),
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_refund(
        &self,
        external_ref: &str,
        amount_minor_units: Option<i64>,
        reason: Option<&str>,
    ) -> Result<RefundReceipt, GatewayError> {
        let mut form = vec![("payment_intent".to_string(), external_ref.to_string())];
        if let Some(amount) = amount_minor_units {
            form.push(("amount".to_string(), amount.to_string()));
        }
        if let Some(reason) = reason {
            form.push(("reason".to_string(), reason.to_string()));
        }

        let refund: RefundBody = self
            .send(self.client.post(self.url("/v1/refunds")).form(&form))
            .await?;

        Ok(RefundReceipt {
            refund_id: refund.id,
            raw_status: refund.status.unwrap_or_else(|| "pending".to_string()),
            amount_minor_units: refund.amount,
        })
    }

    fn verify_inbound_event(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Option<ParsedEvent> {
        match &self.verifier {
            Some(verifier) => verifier.verify(raw_payload, signature_header),
            None => {
                warn!(target: "security", "Webhook secret not configured; rejecting event");
                None
            }
        }
    }
}
