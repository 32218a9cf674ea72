//! Razorpay checkout verification and Stripe webhook settlement.

mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{response_json, TestApp, RAZORPAY_KEY_ID, RAZORPAY_SECRET, STRIPE_WEBHOOK_SECRET};
use serde_json::{json, Value};
use storefront_api::services::payments::signatures::{razorpay_signature, stripe_signature_header};

/// Places a gateway order for two units at 450 and returns (token, placed order body)
async fn gateway_order(app: &TestApp, email: &str, method: &str) -> (String, Value) {
    let product = app.seed_product(&format!("Gateway item {}", email), 450, 10).await;
    let (_, token) = app.signup_and_login(email).await;
    let address_id = app.add_address(&token).await;
    app.add_to_cart(&token, product.id, 2).await;

    let placed = app.place_order(&token, address_id, method).await;
    assert_eq!(placed.status(), StatusCode::CREATED);
    (token, response_json(placed).await["data"].clone())
}

async fn order_view(app: &TestApp, token: &str, order_id: &str) -> Value {
    let response = app
        .request(
            Method::GET,
            &format!("/user/order/{}", order_id),
            None,
            Some(token),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    response_json(response).await["data"].clone()
}

async fn verify(app: &TestApp, razor_id: &str, payment_id: &str, signature: &str) -> axum::response::Response {
    app.post_form(
        "/order/payment/verify",
        &[
            ("signature", signature),
            ("razorId", razor_id),
            ("paymentId", payment_id),
        ],
    )
    .await
}

fn stripe_event(event_id: &str, kind: &str, intent_id: &str) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": event_id,
        "type": kind,
        "data": { "object": { "id": intent_id } },
    }))
    .expect("event payload")
}

async fn deliver(app: &TestApp, payload: Vec<u8>, secret: &str) -> axum::response::Response {
    let header = stripe_signature_header(secret, Utc::now().timestamp(), &payload);
    app.post_raw(
        "/webhook",
        payload,
        &[
            ("content-type", "application/json"),
            ("Stripe-Signature", header.as_str()),
        ],
    )
    .await
}

#[tokio::test]
async fn razorpay_order_exposes_checkout_details_and_keeps_cart() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-open@example.com", "razorpay").await;

    assert_eq!(placed["order"]["status"], "pending");
    assert_eq!(placed["order"]["payment_method"], "razorpay");
    assert_eq!(placed["payment"]["provider"], "razorpay");
    assert_eq!(placed["payment"]["amount"], 90_000);
    assert_eq!(placed["payment"]["key_id"], RAZORPAY_KEY_ID);
    assert!(placed["payment"]["external_id"]
        .as_str()
        .is_some_and(|id| id.starts_with("order_")));

    // The cart is emptied only once the payment settles
    let cart = response_json(
        app.request(Method::GET, "/user/cart", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(cart["data"]["total_price"], 900);
}

#[tokio::test]
async fn razorpay_bad_signature_fails_payment_but_not_order() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-bad@example.com", "razorpay").await;
    let razor_id = placed["payment"]["external_id"].as_str().expect("razor id");
    let order_id = placed["order"]["id"].as_str().expect("order id");

    let response = verify(&app, razor_id, "pay_123", "deadbeef").await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = response_json(response).await;
    assert_eq!(body["error"], "Payment Required");

    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["order"]["status"], "pending");
    assert_eq!(view["order"]["payment_status"], "failed");
    assert_eq!(view["invoice"]["status"], "failed");
}

#[tokio::test]
async fn razorpay_good_signature_confirms_order_once() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-good@example.com", "razorpay").await;
    let razor_id = placed["payment"]["external_id"].as_str().expect("razor id");
    let order_id = placed["order"]["id"].as_str().expect("order id");
    let signature = razorpay_signature(RAZORPAY_SECRET, razor_id, "pay_777");

    let response = verify(&app, razor_id, "pay_777", &signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["payment_status"], "successful");
    assert_eq!(body["data"]["payment_id"], "pay_777");

    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["invoice"]["status"], "successful");
    assert_eq!(view["invoice"]["payment_id"], "pay_777");

    let cart = response_json(
        app.request(Method::GET, "/user/cart", None, Some(&token))
            .await,
    )
    .await;
    assert_eq!(cart["data"]["total_price"], 0);

    let again = verify(&app, razor_id, "pay_777", &signature).await;
    assert_eq!(again.status(), StatusCode::OK);
    let again = response_json(again).await;
    assert_eq!(again["data"]["status"], "confirmed");
    assert_eq!(again["data"]["version"], body["data"]["version"]);
}

#[tokio::test]
async fn razorpay_verification_for_unknown_payment_is_not_found() {
    let app = TestApp::new().await;
    let signature = razorpay_signature(RAZORPAY_SECRET, "order_missing", "pay_1");
    let response = verify(&app, "order_missing", "pay_1", &signature).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn payment_after_cancellation_is_refunded_to_wallet() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-late@example.com", "razorpay").await;
    let razor_id = placed["payment"]["external_id"].as_str().expect("razor id");
    let order_id = placed["order"]["id"].as_str().expect("order id");

    let cancelled = app
        .request(
            Method::PATCH,
            &format!("/user/order/cancel/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(cancelled.status(), StatusCode::OK);
    assert_eq!(app.wallet_of(&token).await, 0);

    let signature = razorpay_signature(RAZORPAY_SECRET, razor_id, "pay_late");
    let response = verify(&app, razor_id, "pay_late", &signature).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "cancelled");
    assert_eq!(body["data"]["payment_status"], "refund");
    assert_eq!(app.wallet_of(&token).await, 900);

    let replayed = verify(&app, razor_id, "pay_late", &signature).await;
    assert_eq!(replayed.status(), StatusCode::OK);
    assert_eq!(app.wallet_of(&token).await, 900);
}

#[tokio::test]
async fn replayed_verification_after_refund_credits_wallet_once() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-replay@example.com", "razorpay").await;
    let razor_id = placed["payment"]["external_id"].as_str().expect("razor id");
    let order_id = placed["order"]["id"].as_str().expect("order id");
    let signature = razorpay_signature(RAZORPAY_SECRET, razor_id, "pay_once");

    let settled = verify(&app, razor_id, "pay_once", &signature).await;
    assert_eq!(settled.status(), StatusCode::OK);

    let cancelled = app
        .request(
            Method::PATCH,
            &format!("/user/order/cancel/{}", order_id),
            None,
            Some(&token),
        )
        .await;
    assert_eq!(cancelled.status(), StatusCode::OK);
    assert_eq!(app.wallet_of(&token).await, 900);

    for _ in 0..3 {
        let replayed = verify(&app, razor_id, "pay_once", &signature).await;
        assert_eq!(replayed.status(), StatusCode::OK);
        let body = response_json(replayed).await;
        assert_eq!(body["data"]["status"], "cancelled");
        assert_eq!(body["data"]["payment_status"], "refund");
    }
    assert_eq!(app.wallet_of(&token).await, 900);

    // A forged callback cannot reopen the refunded payment either
    let forged = verify(&app, razor_id, "pay_once", "deadbeef").await;
    assert_eq!(forged.status(), StatusCode::PAYMENT_REQUIRED);
    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["order"]["payment_status"], "refund");

    let replayed = verify(&app, razor_id, "pay_once", &signature).await;
    assert_eq!(replayed.status(), StatusCode::OK);
    assert_eq!(app.wallet_of(&token).await, 900);
}

#[tokio::test]
async fn bad_signature_after_settlement_keeps_payment_successful() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "rzp-settled@example.com", "razorpay").await;
    let razor_id = placed["payment"]["external_id"].as_str().expect("razor id");
    let order_id = placed["order"]["id"].as_str().expect("order id");
    let signature = razorpay_signature(RAZORPAY_SECRET, razor_id, "pay_good");

    let settled = verify(&app, razor_id, "pay_good", &signature).await;
    assert_eq!(settled.status(), StatusCode::OK);

    let forged = verify(&app, razor_id, "pay_good", "deadbeef").await;
    assert_eq!(forged.status(), StatusCode::PAYMENT_REQUIRED);

    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["order"]["status"], "confirmed");
    assert_eq!(view["order"]["payment_status"], "successful");
    assert_eq!(view["invoice"]["status"], "successful");
    assert_eq!(app.wallet_of(&token).await, 0);
}

#[tokio::test]
async fn stripe_webhook_settles_intent_and_ignores_repeats() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "stripe-paid@example.com", "stripe").await;
    let intent_id = placed["payment"]["external_id"].as_str().expect("intent id");
    let order_id = placed["order"]["id"].as_str().expect("order id");
    assert!(placed["payment"]["client_secret"].as_str().is_some());

    let payload = stripe_event("evt_1", "payment_intent.succeeded", intent_id);
    let applied = deliver(&app, payload.clone(), STRIPE_WEBHOOK_SECRET).await;
    assert_eq!(applied.status(), StatusCode::OK);
    let applied = response_json(applied).await;
    assert_eq!(applied["data"]["received"], true);
    assert_eq!(applied["data"]["outcome"], "applied");

    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["order"]["status"], "confirmed");
    assert_eq!(view["order"]["payment_status"], "successful");

    let redelivered = response_json(deliver(&app, payload, STRIPE_WEBHOOK_SECRET).await).await;
    assert_eq!(redelivered["data"]["outcome"], "duplicate");

    let second_success = stripe_event("evt_2", "payment_intent.succeeded", intent_id);
    let second = response_json(deliver(&app, second_success, STRIPE_WEBHOOK_SECRET).await).await;
    assert_eq!(second["data"]["outcome"], "duplicate");
}

#[tokio::test]
async fn stripe_failure_event_marks_payment_failed() {
    let app = TestApp::new().await;
    let (token, placed) = gateway_order(&app, "stripe-failed@example.com", "stripe").await;
    let intent_id = placed["payment"]["external_id"].as_str().expect("intent id");
    let order_id = placed["order"]["id"].as_str().expect("order id");

    let payload = stripe_event("evt_fail", "payment_intent.payment_failed", intent_id);
    let response = response_json(deliver(&app, payload, STRIPE_WEBHOOK_SECRET).await).await;
    assert_eq!(response["data"]["outcome"], "applied");

    let view = order_view(&app, &token, order_id).await;
    assert_eq!(view["order"]["status"], "pending");
    assert_eq!(view["order"]["payment_status"], "failed");
}

#[tokio::test]
async fn stripe_unknown_events_are_acknowledged() {
    let app = TestApp::new().await;

    let unknown_type = stripe_event("evt_x", "charge.refunded", "pi_whatever");
    let body = response_json(deliver(&app, unknown_type, STRIPE_WEBHOOK_SECRET).await).await;
    assert_eq!(body["data"]["outcome"], "ignored");

    let unknown_intent = stripe_event("evt_y", "payment_intent.succeeded", "pi_unknown");
    let body = response_json(deliver(&app, unknown_intent, STRIPE_WEBHOOK_SECRET).await).await;
    assert_eq!(body["data"]["outcome"], "ignored");
}

#[tokio::test]
async fn stripe_signature_problems_are_rejected() {
    let app = TestApp::new().await;
    let payload = stripe_event("evt_sig", "payment_intent.succeeded", "pi_sig");

    let wrong_secret = deliver(&app, payload.clone(), "whsec_someone_else").await;
    assert_eq!(wrong_secret.status(), StatusCode::UNAUTHORIZED);

    let stale = stripe_signature_header(
        STRIPE_WEBHOOK_SECRET,
        Utc::now().timestamp() - 3_600,
        &payload,
    );
    let expired = app
        .post_raw("/webhook", payload.clone(), &[("Stripe-Signature", stale.as_str())])
        .await;
    assert_eq!(expired.status(), StatusCode::UNAUTHORIZED);

    let malformed = app
        .post_raw("/webhook", payload.clone(), &[("Stripe-Signature", "garbage")])
        .await;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);

    let missing = app.post_raw("/webhook", payload, &[]).await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
}
