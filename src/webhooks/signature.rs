//! Verification of `Stripe-Signature` style webhook headers.
//!
//! The header looks like `t=1700000000,v1=<hex>,v1=<hex>`; the signature is
//! HMAC-SHA256 over `"{t}.{raw body}"` keyed with the endpoint secret. Any
//! `v1` entry may match, which lets the secret be rolled without downtime.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use std::time::Duration;

use crate::services::payment_gateway::ParsedEvent;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature on inbound payment webhooks.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

#[derive(Debug, Clone, PartialEq, Eq)]
struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<Vec<u8>>,
}

fn parse_header(header: &str) -> Option<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        match key {
            "t" => timestamp = Some(value.parse::<i64>().ok()?),
            // unparseable candidates are skipped, another v1 may still match
            "v1" => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    if signatures.is_empty() {
        return None;
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

fn mac_for(secret: &str, timestamp: i64, payload: &[u8]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(mac)
}

/// Computes the hex `v1` signature for a payload. Used by tests and tooling
/// that need to produce validly signed events.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
    let mac = mac_for(secret, timestamp, payload)?;
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Builds a complete signature header value.
pub fn signature_header(secret: &str, timestamp: i64, payload: &[u8]) -> Option<String> {
    sign_payload(secret, timestamp, payload).map(|sig| format!("t={timestamp},v1={sig}"))
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: EventObject,
}

#[derive(Debug, Deserialize)]
struct EventObject {
    id: Option<String>,
    object: Option<String>,
    status: Option<String>,
    payment_intent: Option<Value>,
    last_payment_error: Option<LastPaymentError>,
    #[serde(default)]
    metadata: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct LastPaymentError {
    message: Option<String>,
}

fn parse_event(payload: &[u8]) -> Option<ParsedEvent> {
    let envelope: EventEnvelope = serde_json::from_slice(payload).ok()?;
    let object = envelope.data.object;

    // Charges and refunds point at their payment intent instead of being one.
    let external_ref = match object.object.as_deref() {
        None | Some("payment_intent") => object.id,
        Some(_) => object.payment_intent.and_then(|pi| match pi {
            Value::String(id) => Some(id),
            Value::Object(map) => map.get("id").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }),
    };

    let metadata = object
        .metadata
        .into_iter()
        .filter_map(|(k, v)| match v {
            Value::String(s) => Some((k, s)),
            Value::Null => None,
            other => Some((k, other.to_string())),
        })
        .collect();

    Some(ParsedEvent {
        event_id: envelope.id,
        event_type: envelope.event_type,
        external_ref,
        raw_status: object.status,
        failure_message: object.last_payment_error.and_then(|e| e.message),
        metadata,
    })
}

/// Checks signatures of inbound events against one endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: String,
    tolerance: Duration,
}

impl std::fmt::Debug for WebhookVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookVerifier")
            .field("secret", &"<redacted>")
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl WebhookVerifier {
    pub fn new(secret: impl Into<String>, tolerance: Duration) -> Self {
        Self {
            secret: secret.into(),
            tolerance,
        }
    }

    pub fn verify(&self, payload: &[u8], header: &str) -> Option<ParsedEvent> {
        self.verify_at(payload, header, Utc::now())
    }

    /// Verifies the signature as of `now` and then parses the event.
    pub fn verify_at(&self, payload: &[u8], header: &str, now: DateTime<Utc>) -> Option<ParsedEvent> {
        let parsed = parse_header(header)?;

        let age = now.timestamp().checked_sub(parsed.timestamp)?;
        if age.unsigned_abs() > self.tolerance.as_secs() {
            return None;
        }

        let matched = parsed.signatures.iter().any(|candidate| {
            mac_for(&self.secret, parsed.timestamp, payload)
                .map(|mac| mac.verify_slice(candidate).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return None;
        }

        parse_event(payload)
    }
}
