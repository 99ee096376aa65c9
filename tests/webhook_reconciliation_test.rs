mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use common::{create_order_body, event_payload, json_body, sign, TestApp, WEBHOOK_SECRET};
use order_payments::models::order_status::OrderStatus;
use order_payments::webhooks::signature_header;

/// Creates an order and returns its id and authorization reference.
async fn authorized_order(app: &TestApp) -> (Uuid, String) {
    let response = app
        .request(Method::POST, "/api/v1/orders", Some(create_order_body()))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body: Value = json_body(response).await;
    (
        body["order"]["id"].as_str().unwrap().parse().unwrap(),
        body["external_ref"].as_str().unwrap().to_string(),
    )
}

#[tokio::test]
async fn succeeded_event_confirms_the_order() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    let response = app.post_webhook(&payload, Some(&sign(&payload))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["received"], json!(true));
    assert_eq!(body["matched"], json!(true));
    assert_eq!(body["event_type"], json!("payment_intent.succeeded"));

    let stored = app.repository.stored(id).await;
    assert_eq!(stored.status(), OrderStatus::Confirmed);
    assert_eq!(stored.external_payment_status(), Some("succeeded"));
}

#[tokio::test]
async fn payment_failed_event_records_the_reason() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let payload = event_payload(
        "payment_intent.payment_failed",
        &external_ref,
        Some("Your card has insufficient funds."),
    );
    let response = app.post_webhook(&payload, Some(&sign(&payload))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.repository.stored(id).await;
    assert_eq!(stored.status(), OrderStatus::Failed);
    assert_eq!(
        stored.payment_error_message(),
        Some("Your card has insufficient funds.")
    );
}

#[tokio::test]
async fn canceled_event_cancels_the_order() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let payload = event_payload("payment_intent.canceled", &external_ref, None);
    let response = app.post_webhook(&payload, Some(&sign(&payload))).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        app.repository.stored(id).await.status(),
        OrderStatus::Cancelled
    );
}

#[tokio::test]
async fn bad_signature_is_rejected_before_storage() {
    let app = TestApp::new();
    let (_, external_ref) = authorized_order(&app).await;
    app.repository.reset_counts();

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    let forged = signature_header("whsec_wrong", Utc::now().timestamp(), &payload).unwrap();

    let response = app.post_webhook(&payload, Some(&forged)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.repository.total_calls(), 0);
}

#[tokio::test]
async fn missing_signature_is_rejected_before_storage() {
    let app = TestApp::new();
    let (_, external_ref) = authorized_order(&app).await;
    app.repository.reset_counts();

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    let response = app.post_webhook(&payload, None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.repository.total_calls(), 0);
}

#[tokio::test]
async fn tampered_body_is_rejected() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let payload = event_payload("payment_intent.payment_failed", &external_ref, None);
    let header = sign(&payload);
    let tampered = event_payload("payment_intent.succeeded", &external_ref, None);

    let response = app.post_webhook(&tampered, Some(&header)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        app.repository.stored(id).await.status(),
        OrderStatus::AuthorizationPending
    );
}

#[tokio::test]
async fn stale_timestamp_is_rejected() {
    let app = TestApp::new();
    let (_, external_ref) = authorized_order(&app).await;

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    let stale = signature_header(WEBHOOK_SECRET, Utc::now().timestamp() - 3_600, &payload).unwrap();

    let response = app.post_webhook(&payload, Some(&stale)).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_payment_reference_is_acknowledged() {
    let app = TestApp::new();
    app.repository.reset_counts();

    let payload = event_payload("payment_intent.succeeded", "pi_not_ours", None);
    let response = app.post_webhook(&payload, Some(&sign(&payload))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["received"], json!(true));
    assert_eq!(body["matched"], json!(false));
    assert_eq!(app.repository.writes(), 0);
}

#[tokio::test]
async fn duplicate_delivery_writes_once() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;
    app.repository.reset_counts();

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    let header = sign(&payload);
    for _ in 0..3 {
        let response = app.post_webhook(&payload, Some(&header)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    assert_eq!(app.repository.writes(), 1);
    assert_eq!(app.repository.stored(id).await.version(), 2);
}

#[tokio::test]
async fn terminal_orders_are_not_reopened() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let succeeded = event_payload("payment_intent.succeeded", &external_ref, None);
    app.post_webhook(&succeeded, Some(&sign(&succeeded))).await;

    let failed = event_payload(
        "payment_intent.payment_failed",
        &external_ref,
        Some("late decline"),
    );
    let response = app.post_webhook(&failed, Some(&sign(&failed))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let stored = app.repository.stored(id).await;
    assert_eq!(stored.status(), OrderStatus::Confirmed);
    assert_eq!(stored.payment_error_message(), None);
    assert_eq!(stored.external_payment_status(), Some("payment_failed"));
}

#[tokio::test]
async fn webhook_and_confirmation_agree() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;
    app.gateway.set_status(&external_ref, "succeeded", None);

    let payload = event_payload("payment_intent.succeeded", &external_ref, None);
    app.post_webhook(&payload, Some(&sign(&payload))).await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{id}/confirm-payment"),
            Some(json!({ "external_ref": external_ref })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["order"]["status"], json!("Confirmed"));
    assert_eq!(app.repository.stored(id).await.version(), 2);
}

#[tokio::test]
async fn charge_events_resolve_to_their_payment_intent() {
    let app = TestApp::new();
    let (id, external_ref) = authorized_order(&app).await;

    let payload = serde_json::to_vec(&json!({
        "id": "evt_charge_1",
        "type": "charge.refunded",
        "data": {
            "object": {
                "id": "ch_123",
                "object": "charge",
                "payment_intent": external_ref,
                "status": "succeeded"
            }
        }
    }))
    .unwrap();
    let response = app.post_webhook(&payload, Some(&sign(&payload))).await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["matched"], json!(true));
    let stored = app.repository.stored(id).await;
    assert_eq!(stored.status(), OrderStatus::AuthorizationPending);
    assert_eq!(stored.external_payment_status(), Some("charge.refunded"));
}
