//! Order payment status machine.
//!
//! Both reconciliation channels (client confirmation and gateway webhooks)
//! translate what they observed into a [`PaymentOutcome`] and hand it to
//! [`decide`]; no other code decides where an order's status goes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use crate::errors::ServiceError;

/// Lifecycle of an order with respect to its payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum OrderStatus {
    /// Built in memory, no gateway authorization yet. Never persisted.
    Pending,
    /// Authorization opened with the gateway; waiting for an outcome.
    AuthorizationPending,
    Confirmed,
    Failed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Confirmed | OrderStatus::Failed | OrderStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::AuthorizationPending => "AuthorizationPending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Failed => "Failed",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(OrderStatus::Pending),
            "AuthorizationPending" => Ok(OrderStatus::AuthorizationPending),
            "Confirmed" => Ok(OrderStatus::Confirmed),
            "Failed" => Ok(OrderStatus::Failed),
            "Cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ServiceError::InternalError(format!(
                "unknown stored order status: {other}"
            ))),
        }
    }
}

/// What the gateway reported about an authorization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded,
    Processing,
    RequiresAction,
    RequiresPaymentMethod,
    Canceled,
    PaymentFailed { message: Option<String> },
    Unrecognized(String),
}

const EVENT_PREFIX: &str = "payment_intent.";

impl PaymentOutcome {
    /// Parses the raw `status` of an authorization as returned by a fetch.
    pub fn from_raw_status(raw: &str) -> Self {
        match raw {
            "succeeded" => PaymentOutcome::Succeeded,
            "processing" => PaymentOutcome::Processing,
            "requires_action" => PaymentOutcome::RequiresAction,
            "requires_payment_method" => PaymentOutcome::RequiresPaymentMethod,
            "canceled" => PaymentOutcome::Canceled,
            "payment_failed" => PaymentOutcome::PaymentFailed { message: None },
            other => PaymentOutcome::Unrecognized(other.to_string()),
        }
    }

    /// Parses a webhook event type such as `payment_intent.succeeded`.
    ///
    /// Event types outside the `payment_intent.` family are kept whole so the
    /// recorded diagnostic status says which event arrived.
    pub fn from_event(event_type: &str, failure_message: Option<&str>) -> Self {
        match event_type.strip_prefix(EVENT_PREFIX) {
            Some("payment_failed") => PaymentOutcome::PaymentFailed {
                message: failure_message.map(str::to_string),
            },
            Some(status) => match Self::from_raw_status(status) {
                PaymentOutcome::Unrecognized(_) => {
                    PaymentOutcome::Unrecognized(event_type.to_string())
                }
                known => known,
            },
            None => PaymentOutcome::Unrecognized(event_type.to_string()),
        }
    }

    /// The string recorded as the order's external payment status.
    pub fn raw_status(&self) -> &str {
        match self {
            PaymentOutcome::Succeeded => "succeeded",
            PaymentOutcome::Processing => "processing",
            PaymentOutcome::RequiresAction => "requires_action",
            PaymentOutcome::RequiresPaymentMethod => "requires_payment_method",
            PaymentOutcome::Canceled => "canceled",
            PaymentOutcome::PaymentFailed { .. } => "payment_failed",
            PaymentOutcome::Unrecognized(raw) => raw,
        }
    }

    /// Human-readable message shown to the customer after a confirmation.
    pub fn message(&self) -> String {
        match self {
            PaymentOutcome::Succeeded => "Payment confirmed successfully".to_string(),
            PaymentOutcome::Processing => "Payment is being processed".to_string(),
            PaymentOutcome::RequiresAction => {
                "Additional action required to complete payment".to_string()
            }
            PaymentOutcome::RequiresPaymentMethod => "Payment method required".to_string(),
            PaymentOutcome::Canceled => "Payment was cancelled".to_string(),
            PaymentOutcome::PaymentFailed { .. } => "Payment failed".to_string(),
            PaymentOutcome::Unrecognized(raw) => format!("Payment status: {raw}"),
        }
    }
}

/// Result of running an outcome through the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub next: OrderStatus,
    /// Set only when the order moves into `Failed`.
    pub error_message: Option<String>,
    /// Set when the outcome was not understood.
    pub warning: Option<String>,
}

/// The transition table. Terminal states absorb every outcome.
pub fn decide(current: OrderStatus, outcome: &PaymentOutcome) -> Decision {
    let stay = |warning: Option<String>| Decision {
        next: current,
        error_message: None,
        warning,
    };

    if current.is_terminal() {
        return stay(None);
    }
    if current == OrderStatus::Pending {
        return stay(Some(format!(
            "'{}' observed before any authorization was opened",
            outcome.raw_status()
        )));
    }

    match outcome {
        PaymentOutcome::Succeeded => Decision {
            next: OrderStatus::Confirmed,
            error_message: None,
            warning: None,
        },
        PaymentOutcome::Canceled => Decision {
            next: OrderStatus::Cancelled,
            error_message: None,
            warning: None,
        },
        PaymentOutcome::PaymentFailed { message } => Decision {
            next: OrderStatus::Failed,
            error_message: Some(
                message
                    .clone()
                    .unwrap_or_else(|| "Payment failed".to_string()),
            ),
            warning: None,
        },
        PaymentOutcome::Processing
        | PaymentOutcome::RequiresAction
        | PaymentOutcome::RequiresPaymentMethod => stay(None),
        PaymentOutcome::Unrecognized(raw) => {
            stay(Some(format!("unrecognized payment status '{raw}'")))
        }
    }
}
