use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::order::{generate_order_number, Address, LineItem, Order, OrderDraft};
use crate::models::order_status::PaymentOutcome;
use crate::models::totals::to_minor_units;
use crate::repositories::OrderRepository;
use crate::services::order_status::{apply_outcome, with_gateway_deadline};
use crate::services::payment_gateway::{OpenAuthorizationRequest, PaymentGateway};

/// Attempts at drawing an unused order number before giving up.
const ORDER_NUMBER_ATTEMPTS: usize = 5;

/// Request/Response types for the order service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LineItemRequest {
    pub product_id: Uuid,
    pub product_name: String,
    pub product_size: Option<String>,
    pub product_image_url: Option<String>,
    #[schema(value_type = String, example = "25.00")]
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub customer_id: Option<Uuid>,
    pub customer_email: String,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub line_items: Vec<LineItemRequest>,
    #[serde(default)]
    #[schema(value_type = String, example = "10.00")]
    pub shipping_cost: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPaymentRequest {
    pub external_ref: String,
}

/// A freshly created order plus what the client needs to complete payment.
#[derive(Debug, Clone)]
pub struct CreatedOrder {
    pub order: Order,
    pub client_secret: String,
    pub external_ref: String,
}

#[derive(Debug, Clone)]
pub struct ConfirmedPayment {
    pub order: Order,
    pub message: String,
}

/// Pricing and gateway settings applied to every order.
#[derive(Debug, Clone)]
pub struct OrderSettings {
    pub tax_rate: Decimal,
    pub currency: String,
    pub gateway_timeout: Duration,
}

impl From<&AppConfig> for OrderSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            tax_rate: config.tax_rate,
            currency: config.default_currency.clone(),
            gateway_timeout: config.gateway_timeout(),
        }
    }
}

fn require(value: &str, message: &str, errors: &mut Vec<String>) {
    if value.trim().is_empty() {
        errors.push(message.to_string());
    }
}

fn validate_address(address: &Address, label: &str, errors: &mut Vec<String>) {
    require(&address.full_name, &format!("{label} name is required"), errors);
    require(&address.line1, &format!("{label} address is required"), errors);
    require(&address.city, &format!("{label} city is required"), errors);
    require(&address.province, &format!("{label} province is required"), errors);
    require(&address.postal_code, &format!("{label} postal code is required"), errors);
    require(&address.country, &format!("{label} country is required"), errors);
}

fn is_whole_cents(amount: Decimal) -> bool {
    amount.normalize().scale() <= 2
}

/// Collects every structural problem with a create request.
pub fn validate_create_request(request: &CreateOrderRequest) -> Vec<String> {
    let mut errors = Vec::new();

    if request.customer_email.trim().is_empty() {
        errors.push("Customer email is required".to_string());
    } else if !validator::validate_email(request.customer_email.trim()) {
        errors.push("Customer email is invalid".to_string());
    }

    validate_address(&request.shipping_address, "Shipping", &mut errors);
    if let Some(billing) = &request.billing_address {
        validate_address(billing, "Billing", &mut errors);
    }

    if request.line_items.is_empty() {
        errors.push("At least one line item is required".to_string());
    }
    for (index, item) in request.line_items.iter().enumerate() {
        let label = if item.product_name.trim().is_empty() {
            errors.push(format!("Product name is required for line item {}", index + 1));
            format!("line item {}", index + 1)
        } else {
            item.product_name.clone()
        };
        if item.quantity <= 0 {
            errors.push(format!("Invalid quantity for product {label}"));
        }
        if item.unit_price <= Decimal::ZERO {
            errors.push(format!("Invalid price for product {label}"));
        } else if !is_whole_cents(item.unit_price) {
            errors.push(format!("Price for product {label} has more than 2 decimal places"));
        }
    }

    if request.shipping_cost.is_sign_negative() {
        errors.push("Shipping cost cannot be negative".to_string());
    } else if !is_whole_cents(request.shipping_cost) {
        errors.push("Shipping cost has more than 2 decimal places".to_string());
    }

    errors
}

/// Service for creating orders and confirming their payment.
#[derive(Clone)]
pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    gateway: Arc<dyn PaymentGateway>,
    settings: OrderSettings,
}

impl OrderService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        gateway: Arc<dyn PaymentGateway>,
        settings: OrderSettings,
    ) -> Self {
        Self {
            repository,
            gateway,
            settings,
        }
    }

    async fn unused_order_number(&self) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = generate_order_number(Utc::now());
            if self
                .repository
                .find_by_order_number(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
            warn!(order_number = %candidate, "Order number collision, drawing another");
        }
        Err(ServiceError::Conflict(
            "could not allocate a unique order number".to_string(),
        ))
    }

    /// Validates, prices, authorizes, and persists a new order.
    ///
    /// Nothing is stored unless the gateway opened an authorization.
    #[instrument(skip(self, request), fields(customer_email = %request.customer_email, items = request.line_items.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreatedOrder, ServiceError> {
        let errors = validate_create_request(&request);
        if !errors.is_empty() {
            info!(error_count = errors.len(), "Order request rejected by validation");
            return Err(ServiceError::Validation(errors));
        }

        let now = Utc::now();
        let draft = OrderDraft {
            customer_id: request.customer_id,
            customer_email: request.customer_email.trim().to_string(),
            shipping_address: request.shipping_address,
            billing_address: request.billing_address,
            line_items: request
                .line_items
                .into_iter()
                .map(|item| LineItem {
                    id: Uuid::new_v4(),
                    product_id: item.product_id,
                    product_name: item.product_name,
                    product_size: item.product_size,
                    product_image_url: item.product_image_url,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                })
                .collect(),
            shipping_cost: request.shipping_cost,
            currency: self.settings.currency.clone(),
            tax_rate: self.settings.tax_rate,
        };

        let order_number = self.unused_order_number().await?;
        let mut order = Order::new_pending(draft, order_number, now)?;

        let authorization_request = OpenAuthorizationRequest {
            amount_minor_units: to_minor_units(order.totals().total)?,
            currency: order.currency().to_string(),
            receipt_email: Some(order.customer_email().to_string()),
            metadata: HashMap::from([
                ("order_id".to_string(), order.id().to_string()),
                ("order_number".to_string(), order.order_number().to_string()),
            ]),
        };

        let authorization = with_gateway_deadline(
            self.settings.gateway_timeout,
            "open_authorization",
            self.gateway.open_authorization(authorization_request),
        )
        .await?;

        order.attach_authorization(
            authorization.external_ref.clone(),
            authorization.raw_status,
            Utc::now(),
        )?;

        if let Err(e) = self.repository.insert(&order).await {
            error!(error = %e, order_id = %order.id(), "Failed to persist authorized order");
            // Leave no authorization behind that no order points at.
            if let Err(cancel_err) = with_gateway_deadline(
                self.settings.gateway_timeout,
                "cancel_authorization",
                self.gateway.cancel_authorization(&authorization.external_ref),
            )
            .await
            {
                error!(
                    error = %cancel_err,
                    external_ref = %authorization.external_ref,
                    "Failed to cancel orphaned payment authorization"
                );
            }
            return Err(e);
        }

        counter!("order_payments.orders.created", 1);
        info!(
            order_id = %order.id(),
            order_number = %order.order_number(),
            total = %order.totals().total,
            "Order created successfully"
        );

        Ok(CreatedOrder {
            external_ref: authorization.external_ref,
            client_secret: authorization.client_secret,
            order,
        })
    }

    /// Reconciles an order with what the gateway reports for its authorization.
    #[instrument(skip(self, external_ref), fields(order_id = %order_id))]
    pub async fn confirm_payment(
        &self,
        order_id: Uuid,
        external_ref: &str,
    ) -> Result<ConfirmedPayment, ServiceError> {
        let order = self
            .repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))?;

        if order.external_payment_ref() != Some(external_ref) {
            warn!(order_id = %order_id, "Payment reference does not match the order");
            return Err(ServiceError::PaymentRefMismatch);
        }

        let snapshot = with_gateway_deadline(
            self.settings.gateway_timeout,
            "fetch_authorization",
            self.gateway.fetch_authorization(external_ref),
        )
        .await?;

        let outcome = match PaymentOutcome::from_raw_status(&snapshot.raw_status) {
            PaymentOutcome::PaymentFailed { .. } => PaymentOutcome::PaymentFailed {
                message: snapshot.failure_message,
            },
            other => other,
        };

        let (order, transition) = apply_outcome(self.repository.as_ref(), order, &outcome).await?;
        counter!("order_payments.payments.confirmed", 1);

        Ok(ConfirmedPayment {
            order,
            message: transition.message,
        })
    }

    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, ServiceError> {
        self.repository
            .find_by_id(order_id)
            .await?
            .ok_or(ServiceError::OrderNotFound(order_id))
    }

    #[instrument(skip(self))]
    pub async fn get_order_by_number(&self, order_number: &str) -> Result<Order, ServiceError> {
        self.repository
            .find_by_order_number(order_number)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_number} not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn address() -> Address {
        Address {
            full_name: "Jane Doe".into(),
            line1: "1 King St W".into(),
            line2: None,
            city: "Toronto".into(),
            province: "ON".into(),
            postal_code: "M5H 1A1".into(),
            country: "CA".into(),
            phone: None,
        }
    }

    fn request() -> CreateOrderRequest {
        CreateOrderRequest {
            customer_id: None,
            customer_email: "jane@example.com".into(),
            shipping_address: address(),
            billing_address: None,
            line_items: vec![LineItemRequest {
                product_id: Uuid::new_v4(),
                product_name: "Hoodie".into(),
                product_size: None,
                product_image_url: None,
                unit_price: dec!(25.00),
                quantity: 2,
            }],
            shipping_cost: dec!(10.00),
        }
    }

    #[test]
    fn valid_request_has_no_errors() {
        assert!(validate_create_request(&request()).is_empty());
    }

    #[test]
    fn errors_are_itemized() {
        let mut req = request();
        req.customer_email = "not-an-email".into();
        req.shipping_address.city = " ".into();
        req.line_items[0].quantity = 0;
        req.line_items[0].unit_price = dec!(-1);

        let errors = validate_create_request(&req);
        assert_eq!(
            errors,
            vec![
                "Customer email is invalid".to_string(),
                "Shipping city is required".to_string(),
                "Invalid quantity for product Hoodie".to_string(),
                "Invalid price for product Hoodie".to_string(),
            ]
        );
    }

    #[test]
    fn billing_address_is_checked_only_when_present() {
        let mut req = request();
        let mut billing = address();
        billing.postal_code = String::new();
        req.billing_address = Some(billing);

        assert_eq!(
            validate_create_request(&req),
            vec!["Billing postal code is required".to_string()]
        );
    }

    #[test]
    fn sub_cent_amounts_are_itemized() {
        let mut req = request();
        req.line_items[0].unit_price = dec!(25.005);
        req.shipping_cost = dec!(9.999);

        assert_eq!(
            validate_create_request(&req),
            vec![
                "Price for product Hoodie has more than 2 decimal places".to_string(),
                "Shipping cost has more than 2 decimal places".to_string(),
            ]
        );

        // trailing zeros are fine
        req.line_items[0].unit_price = dec!(25.000);
        req.shipping_cost = dec!(10.0000);
        assert!(validate_create_request(&req).is_empty());
    }

    #[test]
    fn empty_items_and_missing_email() {
        let mut req = request();
        req.customer_email = String::new();
        req.line_items.clear();

        let errors = validate_create_request(&req);
        assert!(errors.contains(&"Customer email is required".to_string()));
        assert!(errors.contains(&"At least one line item is required".to_string()));
    }
}
