use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::ServiceError;
use crate::models::order::LineItem;

const MONEY_SCALE: u32 = 2;

/// Authoritative monetary totals of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OrderTotals {
    pub sub_total: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

/// Computes subtotal, tax, and total for a set of line items.
///
/// Only the tax is rounded (half away from zero, 2 places); the subtotal and
/// shipping are exact sums of 2-decimal inputs.
pub fn calculate_totals(
    items: &[LineItem],
    tax_rate: Decimal,
    shipping_cost: Decimal,
) -> Result<OrderTotals, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::InvalidLineItem(
            "an order needs at least one line item".to_string(),
        ));
    }
    if shipping_cost.is_sign_negative() {
        return Err(ServiceError::InvalidLineItem(format!(
            "shipping cost cannot be negative ({shipping_cost})"
        )));
    }

    let mut sub_total = Decimal::ZERO;
    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::InvalidLineItem(format!(
                "invalid quantity {} for product {}",
                item.quantity, item.product_name
            )));
        }
        if item.unit_price <= Decimal::ZERO {
            return Err(ServiceError::InvalidLineItem(format!(
                "invalid price {} for product {}",
                item.unit_price, item.product_name
            )));
        }
        sub_total = item
            .checked_sub_total()
            .and_then(|line| sub_total.checked_add(line))
            .ok_or_else(|| {
                ServiceError::InvalidLineItem(format!(
                    "amount out of range for product {}",
                    item.product_name
                ))
            })?;
    }

    let tax = sub_total
        .checked_mul(tax_rate)
        .ok_or_else(|| out_of_range("tax"))?
        .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    let total = sub_total
        .checked_add(tax)
        .and_then(|t| t.checked_add(shipping_cost))
        .ok_or_else(|| out_of_range("order total"))?;

    Ok(OrderTotals {
        sub_total,
        tax,
        shipping_cost,
        total,
    })
}

fn out_of_range(what: &str) -> ServiceError {
    ServiceError::InvalidLineItem(format!("{what} is out of range"))
}

/// Converts a 2-decimal amount into integer minor units (cents).
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount.round_dp(MONEY_SCALE) != amount {
        return Err(ServiceError::ValidationError(format!(
            "amount {amount} has more than {MONEY_SCALE} decimal places"
        )));
    }
    amount
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.trunc().to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {amount} is out of range")))
}
