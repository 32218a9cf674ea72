//! Gateway HTTP clients against a mock provider.

use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use storefront_api::{
    middleware_helpers::RetryConfig,
    services::payments::{
        GatewayError, GatewayPaymentRequest, PaymentGateway, RazorpayGateway, StripeGateway,
    },
};
use uuid::Uuid;
use wiremock::{
    matchers::{basic_auth, body_partial_json, body_string_contains, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_factor: 2.0,
    }
}

fn request(amount: i64) -> GatewayPaymentRequest {
    GatewayPaymentRequest {
        order_id: Uuid::new_v4(),
        user_id: Uuid::new_v4(),
        amount,
        currency: "INR".to_string(),
    }
}

fn razorpay(server: &MockServer) -> RazorpayGateway {
    RazorpayGateway::new(
        server.uri(),
        "rzp_key",
        "rzp_secret",
        Duration::from_secs(5),
        fast_retry(),
    )
    .expect("razorpay client")
}

#[tokio::test]
async fn razorpay_order_is_created_in_paise() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .and(basic_auth("rzp_key", "rzp_secret"))
        .and(body_partial_json(json!({ "amount": 90_000, "currency": "INR" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_Abc123",
            "amount": 90_000,
            "currency": "INR",
            "status": "created",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payment = razorpay(&server)
        .create_payment(&request(900))
        .await
        .expect("razorpay order");
    assert_eq!(payment.external_id, "order_Abc123");
    assert_eq!(payment.amount, 90_000);
    assert!(payment.client_secret.is_none());
}

#[tokio::test]
async fn razorpay_retries_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "order_retry",
            "amount": 10_000,
            "currency": "INR",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let payment = razorpay(&server)
        .create_payment(&request(100))
        .await
        .expect("succeeds on retry");
    assert_eq!(payment.external_id, "order_retry");
}

#[tokio::test]
async fn razorpay_client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad amount"))
        .expect(1)
        .mount(&server)
        .await;

    let err = razorpay(&server)
        .create_payment(&request(100))
        .await
        .expect_err("rejected");
    assert_matches!(err, GatewayError::Status { status: 400, ref body } if body == "bad amount");
}

#[tokio::test]
async fn razorpay_gives_up_after_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/orders"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let err = razorpay(&server)
        .create_payment(&request(100))
        .await
        .expect_err("exhausted");
    assert_matches!(err, GatewayError::Status { status: 502, .. });
}

#[tokio::test]
async fn stripe_intent_is_created_with_idempotency_key() {
    let server = MockServer::start().await;
    let req = request(450);
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .and(header("Idempotency-Key", req.order_id.to_string().as_str()))
        .and(body_string_contains("amount=45000"))
        .and(body_string_contains("currency=inr"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "pi_123",
            "object": "payment_intent",
            "amount": 45_000,
            "currency": "inr",
            "client_secret": "pi_123_secret_abc",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(
        server.uri(),
        "sk_test_123",
        Duration::from_secs(5),
        fast_retry(),
    )
    .expect("stripe client");
    let payment = gateway.create_payment(&req).await.expect("intent");
    assert_eq!(payment.external_id, "pi_123");
    assert_eq!(payment.client_secret.as_deref(), Some("pi_123_secret_abc"));
}

#[tokio::test]
async fn malformed_gateway_response_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/payment_intents"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .expect(1)
        .mount(&server)
        .await;

    let gateway = StripeGateway::new(
        server.uri(),
        "sk_test_123",
        Duration::from_secs(5),
        fast_retry(),
    )
    .expect("stripe client");
    let err = gateway
        .create_payment(&request(10))
        .await
        .expect_err("decode failure");
    assert_matches!(err, GatewayError::Decode(_));
}
