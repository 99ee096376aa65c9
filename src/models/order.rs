use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;
use crate::models::order_status::{decide, OrderStatus, PaymentOutcome};
use crate::models::totals::{calculate_totals, OrderTotals};

/// Postal address copied onto the order when it is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Address {
    pub full_name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: Option<String>,
}

/// One product/quantity/price entry owned by an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_size: Option<String>,
    pub product_image_url: Option<String>,
    pub unit_price: Decimal,
    pub quantity: i32,
}

impl LineItem {
    /// `None` when the product does not fit in a `Decimal`.
    pub fn checked_sub_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }

    /// Saturates instead of panicking; priced orders never reach the bound.
    pub fn sub_total(&self) -> Decimal {
        self.unit_price.saturating_mul(Decimal::from(self.quantity))
    }
}

/// Everything needed to price a new order.
#[derive(Debug, Clone)]
pub struct OrderDraft {
    pub customer_id: Option<Uuid>,
    pub customer_email: String,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub line_items: Vec<LineItem>,
    pub shipping_cost: Decimal,
    pub currency: String,
    pub tax_rate: Decimal,
}

/// What changed when a payment outcome was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
    /// False when the order already reflected the outcome; nothing to persist.
    pub changed: bool,
    pub message: String,
    pub warning: Option<String>,
}

/// Order aggregate root.
///
/// Status and payment fields are only reachable through
/// [`Order::attach_authorization`] and [`Order::apply_payment_outcome`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub(crate) id: Uuid,
    pub(crate) order_number: String,
    pub(crate) customer_id: Option<Uuid>,
    pub(crate) customer_email: String,
    pub(crate) status: OrderStatus,
    pub(crate) totals: OrderTotals,
    pub(crate) currency: String,
    pub(crate) external_payment_ref: Option<String>,
    pub(crate) external_payment_status: Option<String>,
    pub(crate) payment_error_message: Option<String>,
    pub(crate) shipping_address: Address,
    pub(crate) billing_address: Option<Address>,
    pub(crate) line_items: Vec<LineItem>,
    pub(crate) created_date: DateTime<Utc>,
    pub(crate) updated_date: DateTime<Utc>,
    pub(crate) version: i32,
}

impl Order {
    /// Prices the draft and returns an order in `Pending`.
    pub fn new_pending(
        draft: OrderDraft,
        order_number: String,
        now: DateTime<Utc>,
    ) -> Result<Self, ServiceError> {
        let totals = calculate_totals(&draft.line_items, draft.tax_rate, draft.shipping_cost)?;

        Ok(Self {
            id: Uuid::new_v4(),
            order_number,
            customer_id: draft.customer_id,
            customer_email: draft.customer_email,
            status: OrderStatus::Pending,
            totals,
            currency: draft.currency.to_ascii_uppercase(),
            external_payment_ref: None,
            external_payment_status: None,
            payment_error_message: None,
            shipping_address: draft.shipping_address,
            billing_address: draft.billing_address,
            line_items: draft.line_items,
            created_date: now,
            updated_date: now,
            version: 1,
        })
    }

    /// Records the gateway authorization opened for this order.
    ///
    /// Allowed exactly once, while the order is still `Pending`.
    pub fn attach_authorization(
        &mut self,
        external_ref: String,
        raw_status: String,
        now: DateTime<Utc>,
    ) -> Result<(), ServiceError> {
        if self.status != OrderStatus::Pending || self.external_payment_ref.is_some() {
            return Err(ServiceError::Conflict(format!(
                "order {} already has a payment authorization",
                self.order_number
            )));
        }
        self.external_payment_ref = Some(external_ref);
        self.external_payment_status = Some(raw_status);
        self.status = OrderStatus::AuthorizationPending;
        self.updated_date = now;
        Ok(())
    }

    /// Feeds a gateway outcome through the status machine.
    ///
    /// The observed raw status is recorded even when the order is terminal.
    pub fn apply_payment_outcome(
        &mut self,
        outcome: &PaymentOutcome,
        now: DateTime<Utc>,
    ) -> StatusTransition {
        let from = self.status;
        let decision = decide(from, outcome);
        let mut changed = false;

        let raw = outcome.raw_status();
        if self.external_payment_status.as_deref() != Some(raw) {
            self.external_payment_status = Some(raw.to_string());
            changed = true;
        }

        if decision.next != from {
            self.status = decision.next;
            changed = true;
        }

        if let Some(message) = decision.error_message {
            if self.payment_error_message.as_deref() != Some(message.as_str()) {
                self.payment_error_message = Some(message);
                changed = true;
            }
        }

        if changed {
            self.updated_date = now;
        }

        StatusTransition {
            from,
            to: self.status,
            changed,
            message: outcome.message(),
            warning: decision.warning,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn customer_id(&self) -> Option<Uuid> {
        self.customer_id
    }

    pub fn customer_email(&self) -> &str {
        &self.customer_email
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn totals(&self) -> &OrderTotals {
        &self.totals
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn external_payment_ref(&self) -> Option<&str> {
        self.external_payment_ref.as_deref()
    }

    pub fn external_payment_status(&self) -> Option<&str> {
        self.external_payment_status.as_deref()
    }

    pub fn payment_error_message(&self) -> Option<&str> {
        self.payment_error_message.as_deref()
    }

    pub fn shipping_address(&self) -> &Address {
        &self.shipping_address
    }

    pub fn billing_address(&self) -> Option<&Address> {
        self.billing_address.as_ref()
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn created_date(&self) -> DateTime<Utc> {
        self.created_date
    }

    pub fn updated_date(&self) -> DateTime<Utc> {
        self.updated_date
    }

    pub fn version(&self) -> i32 {
        self.version
    }
}

/// Short customer-facing code, e.g. `ORD-20241016-482913`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..1_000_000);
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}
