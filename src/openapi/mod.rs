use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Order Payments API",
        version = "1.0.0",
        description = r#"
# Order Payments API

Creates customer orders, opens a payment authorization for each one, and keeps
the order status in step with the payment gateway.

## Payment flow

1. `POST /api/v1/orders` prices the order and returns a `client_secret`.
2. The browser completes payment with the gateway using that secret.
3. Either `POST /api/v1/orders/{id}/confirm-payment` or the gateway's webhook
   moves the order to `Confirmed`, `Failed`, or `Cancelled`. Both paths are
   safe to repeat.

## Error Handling

Order creation and payment confirmation fail with the same envelope they
succeed with:

```json
{
  "success": false,
  "errors": ["Customer email is required", "At least one line item is required"]
}
```

Other endpoints use:

```json
{
  "error": "Bad Request",
  "message": "Validation failed: Customer email is required",
  "details": ["Customer email is required"],
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "orders", description = "Order creation and payment confirmation"),
        (name = "webhooks", description = "Inbound payment gateway events")
    ),
    paths(
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_number,
        crate::handlers::orders::confirm_payment,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::handlers::orders::OrderResponse,
            crate::handlers::orders::LineItemResponse,
            crate::handlers::orders::CreateOrderResponse,
            crate::handlers::orders::OrderEnvelope,
            crate::handlers::orders::ConfirmPaymentResponse,
            crate::handlers::payment_webhooks::WebhookReceipt,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::LineItemRequest,
            crate::services::orders::ConfirmPaymentRequest,
            crate::models::order::Address,
            crate::models::order_status::OrderStatus,
            crate::errors::ErrorResponse,
            crate::errors::WorkflowFailureResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDocV1::openapi())
}
