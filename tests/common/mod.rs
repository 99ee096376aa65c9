#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use order_payments::{
    config::AppConfig,
    errors::ServiceError,
    models::order::Order,
    repositories::{InMemoryOrderRepository, OrderRepository},
    services::{
        orders::{OrderService, OrderSettings},
        payment_gateway::{
            AuthorizationSnapshot, GatewayError, OpenAuthorizationRequest, ParsedEvent,
            PaymentAuthorization, PaymentGateway, RefundReceipt,
        },
        payment_webhooks::PaymentWebhookService,
    },
    webhooks::{signature_header, WebhookVerifier},
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test_secret";

/// How the next `open_authorization` call should behave.
#[derive(Debug, Clone)]
pub enum OpenScript {
    Succeed,
    Reject(String),
    Transport(String),
}

/// Scripted in-process payment gateway that records every call.
pub struct FakeGateway {
    verifier: WebhookVerifier,
    next_ref: AtomicUsize,
    open_script: Mutex<OpenScript>,
    statuses: Mutex<HashMap<String, (String, Option<String>)>>,
    delay: Mutex<Option<Duration>>,
    cancel_delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<String>>,
    opened: Mutex<Vec<OpenAuthorizationRequest>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            verifier: WebhookVerifier::new(WEBHOOK_SECRET, Duration::from_secs(300)),
            next_ref: AtomicUsize::new(1),
            open_script: Mutex::new(OpenScript::Succeed),
            statuses: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            cancel_delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    pub fn script_open(&self, script: OpenScript) {
        *self.open_script.lock().unwrap() = script;
    }

    /// Sets what `fetch_authorization` reports for an authorization.
    pub fn set_status(&self, external_ref: &str, raw_status: &str, failure: Option<&str>) {
        self.statuses.lock().unwrap().insert(
            external_ref.to_string(),
            (raw_status.to_string(), failure.map(str::to_string)),
        );
    }

    /// Delays every subsequent call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Delays only `cancel_authorization`, on top of any `set_delay`.
    pub fn set_cancel_delay(&self, delay: Duration) {
        *self.cancel_delay.lock().unwrap() = Some(delay);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_named(&self, name: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(':').next() == Some(name))
            .count()
    }

    pub fn opened(&self) -> Vec<OpenAuthorizationRequest> {
        self.opened.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    async fn pause(&self) {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn open_authorization(
        &self,
        request: OpenAuthorizationRequest,
    ) -> Result<PaymentAuthorization, GatewayError> {
        self.record("open_authorization".to_string());
        self.pause().await;

        let script = self.open_script.lock().unwrap().clone();
        match script {
            OpenScript::Succeed => {
                let n = self.next_ref.fetch_add(1, Ordering::SeqCst);
                let external_ref = format!("pi_test_{n}");
                self.opened.lock().unwrap().push(request);
                self.set_status(&external_ref, "requires_payment_method", None);
                Ok(PaymentAuthorization {
                    client_secret: format!("{external_ref}_secret_abc"),
                    external_ref,
                    raw_status: "requires_payment_method".to_string(),
                })
            }
            OpenScript::Reject(message) => Err(GatewayError::Rejected(message)),
            OpenScript::Transport(message) => Err(GatewayError::Transport(message)),
        }
    }

    async fn fetch_authorization(
        &self,
        external_ref: &str,
    ) -> Result<AuthorizationSnapshot, GatewayError> {
        self.record(format!("fetch_authorization:{external_ref}"));
        self.pause().await;

        let status = self.statuses.lock().unwrap().get(external_ref).cloned();
        let (raw_status, failure_message) = status
            .ok_or_else(|| GatewayError::Rejected(format!("No such payment_intent: {external_ref}")))?;
        Ok(AuthorizationSnapshot {
            raw_status,
            amount_minor_units: 0,
            currency: "CAD".to_string(),
            receipt_url: None,
            failure_message,
        })
    }

    async fn cancel_authorization(&self, external_ref: &str) -> Result<(), GatewayError> {
        self.record(format!("cancel_authorization:{external_ref}"));
        self.pause().await;
        let cancel_delay = *self.cancel_delay.lock().unwrap();
        if let Some(delay) = cancel_delay {
            tokio::time::sleep(delay).await;
        }
        self.set_status(external_ref, "canceled", None);
        Ok(())
    }

    async fn create_refund(
        &self,
        external_ref: &str,
        amount_minor_units: Option<i64>,
        _reason: Option<&str>,
    ) -> Result<RefundReceipt, GatewayError> {
        self.record(format!("create_refund:{external_ref}"));
        Ok(RefundReceipt {
            refund_id: format!("re_{external_ref}"),
            raw_status: "succeeded".to_string(),
            amount_minor_units: amount_minor_units.unwrap_or_default(),
        })
    }

    fn verify_inbound_event(
        &self,
        raw_payload: &[u8],
        signature_header: &str,
    ) -> Option<ParsedEvent> {
        self.record("verify_inbound_event".to_string());
        self.verifier.verify(raw_payload, signature_header)
    }
}

/// Wraps the in-memory repository, counting calls and injecting failures.
#[derive(Default)]
pub struct CountingRepository {
    inner: InMemoryOrderRepository,
    pub reads: AtomicUsize,
    pub writes: AtomicUsize,
    fail_inserts: AtomicBool,
    conflicts_to_inject: AtomicUsize,
}

impl CountingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.reads() + self.writes()
    }

    pub fn order_count(&self) -> usize {
        self.inner.len()
    }

    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// The next `n` updates fail as if another writer got there first.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    pub fn reset_counts(&self) {
        self.reads.store(0, Ordering::SeqCst);
        self.writes.store(0, Ordering::SeqCst);
    }

    pub async fn stored(&self, id: Uuid) -> Order {
        self.inner.find_by_id(id).await.unwrap().unwrap()
    }
}

#[async_trait]
impl OrderRepository for CountingRepository {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_id(id).await
    }

    async fn find_by_order_number(
        &self,
        order_number: &str,
    ) -> Result<Option<Order>, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_order_number(order_number).await
    }

    async fn find_by_payment_ref(
        &self,
        external_ref: &str,
    ) -> Result<Option<Order>, ServiceError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.find_by_payment_ref(external_ref).await
    }

    async fn insert(&self, order: &Order) -> Result<(), ServiceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(ServiceError::DatabaseError(sea_orm::DbErr::Custom(
                "disk full".to_string(),
            )));
        }
        self.inner.insert(order).await
    }

    async fn update(&self, order: &Order) -> Result<Order, ServiceError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .conflicts_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(ServiceError::ConcurrentModification(order.id()));
        }
        self.inner.update(order).await
    }
}

/// Helper harness wiring the real services to fakes.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub repository: Arc<CountingRepository>,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_gateway_timeout(Duration::from_secs(2))
    }

    pub fn with_gateway_timeout(gateway_timeout: Duration) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.storage_backend = "in-memory".to_string();

        let repository = Arc::new(CountingRepository::new());
        let gateway = Arc::new(FakeGateway::new());

        let settings = OrderSettings {
            tax_rate: dec!(0.13),
            currency: "CAD".to_string(),
            gateway_timeout,
        };

        let state = AppState {
            config: cfg,
            orders: Arc::new(OrderService::new(
                repository.clone(),
                gateway.clone(),
                settings,
            )),
            webhooks: Arc::new(PaymentWebhookService::new(
                repository.clone(),
                gateway.clone(),
            )),
            db: None,
        };

        Self {
            router: order_payments::build_router(state.clone()),
            state,
            repository,
            gateway,
        }
    }

    /// Send a request against the router.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        self.request_with_headers(method, uri, body, &[]).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Posts a raw webhook body with an optional signature header.
    pub async fn post_webhook(
        &self,
        payload: &[u8],
        signature: Option<&str>,
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/webhooks/payments")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header("Stripe-Signature", signature);
        }
        let request = builder
            .body(Body::from(payload.to_vec()))
            .expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }
}

pub async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    serde_json::from_slice(&bytes).expect("body is not json")
}

/// Two hoodies at 25.00 and one cap at 50.00 with 10.00 shipping.
pub fn create_order_body() -> Value {
    json!({
        "customer_email": "jane@example.com",
        "shipping_address": {
            "full_name": "Jane Doe",
            "line1": "1 King St W",
            "city": "Toronto",
            "province": "ON",
            "postal_code": "M5H 1A1",
            "country": "CA"
        },
        "line_items": [
            {
                "product_id": Uuid::new_v4(),
                "product_name": "Hoodie",
                "product_size": "M",
                "unit_price": "25.00",
                "quantity": 2
            },
            {
                "product_id": Uuid::new_v4(),
                "product_name": "Cap",
                "unit_price": "50.00",
                "quantity": 1
            }
        ],
        "shipping_cost": "10.00"
    })
}

/// A `payment_intent.*` event body for the given authorization.
pub fn event_payload(event_type: &str, external_ref: &str, failure: Option<&str>) -> Vec<u8> {
    let mut object = json!({
        "id": external_ref,
        "object": "payment_intent",
        "status": event_type.trim_start_matches("payment_intent."),
        "metadata": {}
    });
    if let Some(message) = failure {
        object["last_payment_error"] = json!({ "message": message });
    }
    serde_json::to_vec(&json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": object }
    }))
    .expect("event serializes")
}

pub fn sign(payload: &[u8]) -> String {
    signature_header(WEBHOOK_SECRET, Utc::now().timestamp(), payload).expect("hmac accepts key")
}
