// Order workflows
pub mod order_status;
pub mod orders;
pub mod payment_webhooks;

// Payment gateway adapters
pub mod payment_gateway;
pub mod stripe_gateway;
