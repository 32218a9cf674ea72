use axum::{
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    routing::post,
    Form, Router,
};
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use super::common::{ok, HandlerResult};
use crate::{
    entities::order,
    errors::{ApiError, ServiceError},
    services::payments::{RazorpayVerification, WebhookOutcome},
    AppState,
};

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Stripe event payloads are small; anything larger is rejected before parsing
pub const WEBHOOK_BODY_LIMIT: usize = 64 * 1024;

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: WebhookOutcome,
}

pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/order/payment/verify", post(verify_razorpay_payment))
        .route(
            "/webhook",
            post(stripe_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
}

// POST /order/payment/verify
pub async fn verify_razorpay_payment(
    State(state): State<AppState>,
    Form(input): Form<RazorpayVerification>,
) -> HandlerResult<order::Model> {
    let order = state.services.payments.verify_razorpay(input).await?;
    ok(order)
}

// POST /webhook
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> HandlerResult<WebhookAck> {
    let signature = headers
        .get(STRIPE_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("Stripe webhook without signature header");
            ApiError::ServiceError(ServiceError::BadRequest(format!(
                "missing {} header",
                STRIPE_SIGNATURE_HEADER
            )))
        })?;

    let outcome = state
        .services
        .payments
        .handle_stripe_event(&body, signature)
        .await?;
    info!(?outcome, "Stripe webhook processed");
    ok(WebhookAck {
        received: true,
        outcome,
    })
}
