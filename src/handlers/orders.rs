use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::{ServiceError, WorkflowError};
use crate::models::order::{Address, Order};
use crate::models::order_status::OrderStatus;
use crate::services::orders::{ConfirmPaymentRequest, CreateOrderRequest};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LineItemResponse {
    pub id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub product_size: Option<String>,
    pub product_image_url: Option<String>,
    #[schema(value_type = String)]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[schema(value_type = String)]
    pub sub_total: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Option<Uuid>,
    pub customer_email: String,
    pub status: OrderStatus,
    #[schema(value_type = String)]
    pub sub_total: Decimal,
    #[schema(value_type = String)]
    pub tax: Decimal,
    #[schema(value_type = String)]
    pub shipping_cost: Decimal,
    #[schema(value_type = String)]
    pub total: Decimal,
    pub currency: String,
    pub external_payment_ref: Option<String>,
    pub external_payment_status: Option<String>,
    pub payment_error_message: Option<String>,
    pub shipping_address: Address,
    pub billing_address: Option<Address>,
    pub line_items: Vec<LineItemResponse>,
    pub created_date: DateTime<Utc>,
    pub updated_date: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        let totals = order.totals();
        Self {
            id: order.id(),
            order_number: order.order_number().to_string(),
            customer_id: order.customer_id(),
            customer_email: order.customer_email().to_string(),
            status: order.status(),
            sub_total: totals.sub_total,
            tax: totals.tax,
            shipping_cost: totals.shipping_cost,
            total: totals.total,
            currency: order.currency().to_string(),
            external_payment_ref: order.external_payment_ref().map(str::to_string),
            external_payment_status: order.external_payment_status().map(str::to_string),
            payment_error_message: order.payment_error_message().map(str::to_string),
            shipping_address: order.shipping_address().clone(),
            billing_address: order.billing_address().cloned(),
            line_items: order
                .line_items()
                .iter()
                .map(|item| LineItemResponse {
                    id: item.id,
                    product_id: item.product_id,
                    product_name: item.product_name.clone(),
                    product_size: item.product_size.clone(),
                    product_image_url: item.product_image_url.clone(),
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    sub_total: item.sub_total(),
                })
                .collect(),
            created_date: order.created_date(),
            updated_date: order.updated_date(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateOrderResponse {
    pub success: bool,
    pub order: OrderResponse,
    /// Secret the browser uses to complete payment with the gateway
    pub client_secret: String,
    pub external_ref: String,
    pub errors: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderEnvelope {
    pub success: bool,
    pub order: OrderResponse,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConfirmPaymentResponse {
    pub success: bool,
    pub order: OrderResponse,
    pub message: String,
    pub errors: Vec<String>,
}

/// Creates the router for order endpoints
pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_order))
        .route("/:id", get(get_order))
        .route("/by-number/:order_number", get(get_order_by_number))
        .route("/:id/confirm-payment", post(confirm_payment))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    description = "Validate and price an order, then open a payment authorization for its total",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created and awaiting payment", body = CreateOrderResponse),
        (status = 400, description = "Invalid request data", body = crate::errors::WorkflowFailureResponse),
        (status = 502, description = "Payment gateway rejected the authorization", body = crate::errors::WorkflowFailureResponse),
        (status = 504, description = "Payment gateway timed out", body = crate::errors::WorkflowFailureResponse)
    ),
    tag = "orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), WorkflowError> {
    let created = state.orders.create_order(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(CreateOrderResponse {
            success: true,
            order: OrderResponse::from(&created.order),
            client_secret: created.client_secret,
            external_ref: created.external_ref,
            errors: Vec::new(),
        }),
    ))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order ID")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = OrderEnvelope),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order = state.orders.get_order(id).await?;
    Ok(Json(OrderEnvelope {
        success: true,
        order: OrderResponse::from(&order),
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/orders/by-number/{order_number}",
    summary = "Get order by number",
    description = "Retrieve an order by its public order number (e.g., ORD-20240101-123456)",
    params(("order_number" = String, Path, description = "Public order number")),
    responses(
        (status = 200, description = "Order retrieved successfully", body = OrderEnvelope),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse)
    ),
    tag = "orders"
)]
pub async fn get_order_by_number(
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderEnvelope>, ServiceError> {
    let order = state.orders.get_order_by_number(&order_number).await?;
    Ok(Json(OrderEnvelope {
        success: true,
        order: OrderResponse::from(&order),
    }))
}

#[utoipa::path(
    post,
    path = "/api/v1/orders/{id}/confirm-payment",
    summary = "Confirm payment",
    description = "Ask the gateway for the authorization's current state and apply it to the order",
    params(("id" = Uuid, Path, description = "Order ID")),
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 200, description = "Order reconciled with the gateway", body = ConfirmPaymentResponse),
        (status = 400, description = "Payment reference does not match the order", body = crate::errors::WorkflowFailureResponse),
        (status = 404, description = "Order not found", body = crate::errors::WorkflowFailureResponse),
        (status = 409, description = "Order changed concurrently, retry", body = crate::errors::WorkflowFailureResponse),
        (status = 502, description = "Payment gateway error", body = crate::errors::WorkflowFailureResponse),
        (status = 504, description = "Payment gateway timed out", body = crate::errors::WorkflowFailureResponse)
    ),
    tag = "orders"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<ConfirmPaymentRequest>,
) -> Result<Json<ConfirmPaymentResponse>, WorkflowError> {
    let confirmed = state
        .orders
        .confirm_payment(id, &request.external_ref)
        .await?;

    Ok(Json(ConfirmPaymentResponse {
        success: true,
        order: OrderResponse::from(&confirmed.order),
        message: confirmed.message,
        errors: Vec::new(),
    }))
}
