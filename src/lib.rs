//! Order Payments Library
//!
//! Order creation, payment authorization, and reconciliation of order status
//! from client confirmations and gateway webhooks.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod health;
pub mod middleware_helpers;
pub mod migrator;
pub mod models;
pub mod openapi;
pub mod repositories;
pub mod services;
pub mod tracing;
pub mod webhooks;

use axum::{routing::get, Router};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::services::orders::OrderService;
use crate::services::payment_webhooks::PaymentWebhookService;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub orders: Arc<OrderService>,
    pub webhooks: Arc<PaymentWebhookService>,
    /// Present only for the database storage backend
    pub db: Option<Arc<DatabaseConnection>>,
}

/// Versioned API routes
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .nest("/orders", handlers::orders::orders_routes())
        .nest("/webhooks", handlers::payment_webhooks::payment_webhook_routes())
}

/// Builds the complete HTTP application: health, v1 API, and Swagger UI.
pub fn build_router(state: AppState) -> Router {
    let cors_layer = if state.config.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    };

    Router::<AppState>::new()
        .route("/", get(|| async { "order-payments up" }))
        .nest("/health", health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_ui())
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(cors_layer)
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
