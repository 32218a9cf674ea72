//! Settles gateway payments from Razorpay checkout callbacks and Stripe
//! webhooks.
//!
//! The `payment_correlations` row ties a gateway id to the local order and
//! carries the settlement state, so repeated callbacks are harmless.

use chrono::Utc;
use metrics::counter;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::{
    signatures::{verify_razorpay, verify_stripe, SignatureError},
    PaymentSettings,
};
use crate::{
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        payment_correlation::{self, CorrelationStatus, PaymentProvider},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        cart::reset_user_cart,
        orders::{credit_wallet, find_order, write_invoice, write_order},
    },
};

/// Form posted by the Razorpay checkout page
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RazorpayVerification {
    #[validate(length(min = 1, message = "signature is required"))]
    pub signature: String,
    #[serde(rename = "razorId")]
    #[validate(length(min = 1, message = "razorId is required"))]
    pub razor_id: String,
    #[serde(rename = "paymentId")]
    #[validate(length(min = 1, message = "paymentId is required"))]
    pub payment_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookOutcome {
    Applied,
    Duplicate,
    Ignored,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: StripeEventObject,
}

#[derive(Debug, Deserialize)]
struct StripeEventObject {
    id: String,
    #[serde(default)]
    last_payment_error: Option<StripePaymentError>,
}

#[derive(Debug, Deserialize)]
struct StripePaymentError {
    message: Option<String>,
}

#[derive(Debug)]
enum StripeAction {
    Created,
    Succeeded,
    Failed(String),
}

fn classify(event: &StripeEvent) -> Option<StripeAction> {
    match event.kind.as_str() {
        "payment_intent.created" => Some(StripeAction::Created),
        "payment_intent.succeeded" => Some(StripeAction::Succeeded),
        "payment_intent.payment_failed" | "payment_intent.failed" => {
            let reason = event
                .data
                .object
                .last_payment_error
                .as_ref()
                .and_then(|e| e.message.clone())
                .unwrap_or_else(|| "Payment failed at Stripe".to_string());
            Some(StripeAction::Failed(reason))
        }
        _ => None,
    }
}

/// What a settlement changed, for events after commit
enum Settled {
    Paid {
        order: order::Model,
        payment_id: String,
        cart_id: Option<uuid::Uuid>,
    },
    /// Payment arrived for an order cancelled in the meantime
    PaidAfterCancel { order: order::Model },
    Failed { order: order::Model, reason: String },
}

#[derive(Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    settings: PaymentSettings,
}

impl PaymentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            settings,
        }
    }

    /// Verifies the checkout signature and settles the order.
    ///
    /// A bad signature marks the payment failed (unless it was already
    /// settled) and returns `PaymentFailed`. Verifying a settled payment
    /// again, including one refunded after cancellation, succeeds without
    /// side effects.
    #[instrument(skip(self, input), fields(razor_id = %input.razor_id))]
    pub async fn verify_razorpay(
        &self,
        input: RazorpayVerification,
    ) -> Result<order::Model, ServiceError> {
        input.validate()?;
        let secret = self.settings.razorpay_key_secret.as_deref().ok_or_else(|| {
            ServiceError::BadRequest("razorpay payments are not available".to_string())
        })?;

        let txn = self.db.begin().await?;
        let correlation =
            find_correlation(&txn, PaymentProvider::Razorpay, &input.razor_id)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Payment {} not found", input.razor_id))
                })?;
        let order = find_order(&txn, correlation.order_id).await?;

        let verified = verify_razorpay(
            secret,
            &input.razor_id,
            &input.payment_id,
            &input.signature,
        );

        // Settled once, either still paid or already refunded to the wallet
        let already_settled = correlation.status == CorrelationStatus::Succeeded
            || matches!(
                order.payment_status,
                PaymentStatus::Successful | PaymentStatus::Refund
            );

        if let Err(err) = verified {
            warn!(order_id = %order.id, error = %err, "Razorpay signature rejected");
            counter!("storefront.payments.signature_rejected", 1, "provider" => "razorpay");
            if !already_settled {
                let settled = settle_failure(
                    &txn,
                    &order,
                    &correlation,
                    None,
                    "Payment signature verification failed".to_string(),
                )
                .await?;
                txn.commit().await?;
                self.emit(settled).await;
            }
            return Err(ServiceError::PaymentFailed(
                "Payment signature verification failed".to_string(),
            ));
        }

        if already_settled {
            info!(order_id = %order.id, "Payment already verified");
            return Ok(order);
        }

        let settled =
            settle_success(&txn, &order, &correlation, None, input.payment_id.clone()).await?;
        txn.commit().await?;

        let updated = settled.order().clone();
        self.emit(settled).await;
        Ok(updated)
    }

    /// Applies a signed Stripe webhook delivery.
    ///
    /// Unknown event types and intents that belong to no order are
    /// acknowledged so the provider stops redelivering them.
    #[instrument(skip(self, payload, signature_header), fields(bytes = payload.len()))]
    pub async fn handle_stripe_event(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookOutcome, ServiceError> {
        let secret = self.settings.stripe_webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::BadRequest("stripe webhooks are not configured".to_string())
        })?;

        verify_stripe(
            secret,
            signature_header,
            payload,
            Utc::now().timestamp(),
            self.settings.webhook_tolerance_secs,
        )
        .map_err(|err| {
            warn!(error = %err, "Stripe webhook signature rejected");
            counter!("storefront.payments.signature_rejected", 1, "provider" => "stripe");
            match err {
                SignatureError::Malformed => {
                    ServiceError::BadRequest("Malformed Stripe-Signature header".to_string())
                }
                SignatureError::Expired | SignatureError::Mismatch => {
                    ServiceError::Unauthorized("Invalid webhook signature".to_string())
                }
            }
        })?;

        let event: StripeEvent = serde_json::from_slice(payload)
            .map_err(|e| ServiceError::BadRequest(format!("Invalid webhook payload: {}", e)))?;

        let Some(action) = classify(&event) else {
            info!(event_id = %event.id, kind = %event.kind, "Ignoring Stripe event type");
            return Ok(WebhookOutcome::Ignored);
        };

        let txn = self.db.begin().await?;
        let Some(correlation) =
            find_correlation(&txn, PaymentProvider::Stripe, &event.data.object.id).await?
        else {
            warn!(intent_id = %event.data.object.id, "Stripe event for unknown payment intent");
            return Ok(WebhookOutcome::Ignored);
        };

        if correlation.last_event_id.as_deref() == Some(event.id.as_str()) {
            return Ok(WebhookOutcome::Duplicate);
        }

        let order = find_order(&txn, correlation.order_id).await?;
        let settled = match action {
            StripeAction::Created => {
                record_event(&txn, &correlation, correlation.status, &event.id).await?;
                None
            }
            StripeAction::Succeeded => {
                if correlation.status == CorrelationStatus::Succeeded {
                    return Ok(WebhookOutcome::Duplicate);
                }
                Some(
                    settle_success(
                        &txn,
                        &order,
                        &correlation,
                        Some(&event.id),
                        event.data.object.id.clone(),
                    )
                    .await?,
                )
            }
            StripeAction::Failed(reason) => {
                if correlation.status != CorrelationStatus::Created {
                    return Ok(WebhookOutcome::Duplicate);
                }
                Some(settle_failure(&txn, &order, &correlation, Some(&event.id), reason).await?)
            }
        };
        txn.commit().await?;

        info!(event_id = %event.id, kind = %event.kind, order_id = %order.id, "Stripe event applied");
        if let Some(settled) = settled {
            self.emit(settled).await;
        }
        Ok(WebhookOutcome::Applied)
    }

    async fn emit(&self, settled: Settled) {
        match settled {
            Settled::Paid {
                order,
                payment_id,
                cart_id,
            } => {
                counter!("storefront.payments.settled", 1, "method" => order.payment_method.to_string());
                self.event_sender
                    .send_or_log(Event::PaymentSucceeded {
                        order_id: order.id,
                        payment_id,
                    })
                    .await;
                self.event_sender
                    .send_or_log(Event::OrderStatusChanged {
                        order_id: order.id,
                        old_status: OrderStatus::Pending,
                        new_status: order.status,
                    })
                    .await;
                if let Some(cart_id) = cart_id {
                    self.event_sender
                        .send_or_log(Event::CartCleared(cart_id))
                        .await;
                }
            }
            Settled::PaidAfterCancel { order } => {
                self.event_sender
                    .send_or_log(Event::PaymentRefunded {
                        order_id: order.id,
                        amount: order.total,
                    })
                    .await;
            }
            Settled::Failed { order, reason } => {
                counter!("storefront.payments.failed", 1, "method" => order.payment_method.to_string());
                self.event_sender
                    .send_or_log(Event::PaymentFailed {
                        order_id: order.id,
                        reason,
                    })
                    .await;
            }
        }
    }
}

impl Settled {
    fn order(&self) -> &order::Model {
        match self {
            Settled::Paid { order, .. }
            | Settled::PaidAfterCancel { order }
            | Settled::Failed { order, .. } => order,
        }
    }
}

async fn find_correlation<C: ConnectionTrait>(
    conn: &C,
    provider: PaymentProvider,
    external_id: &str,
) -> Result<Option<payment_correlation::Model>, ServiceError> {
    Ok(payment_correlation::Entity::find()
        .filter(payment_correlation::Column::Provider.eq(provider))
        .filter(payment_correlation::Column::ExternalId.eq(external_id))
        .one(conn)
        .await?)
}

async fn record_event<C: ConnectionTrait>(
    conn: &C,
    correlation: &payment_correlation::Model,
    status: CorrelationStatus,
    event_id: &str,
) -> Result<(), ServiceError> {
    let result = payment_correlation::Entity::update_many()
        .set(payment_correlation::ActiveModel {
            status: Set(status),
            last_event_id: Set(Some(event_id.to_string())),
            updated_at: Set(Utc::now()),
            ..Default::default()
        })
        .filter(payment_correlation::Column::Id.eq(correlation.id))
        .filter(payment_correlation::Column::Status.eq(correlation.status))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(correlation.id));
    }
    Ok(())
}

async fn mark_correlation<C: ConnectionTrait>(
    conn: &C,
    correlation: &payment_correlation::Model,
    status: CorrelationStatus,
    event_id: Option<&str>,
) -> Result<(), ServiceError> {
    match event_id {
        Some(event_id) => record_event(conn, correlation, status, event_id).await,
        None => {
            payment_correlation::Entity::update_many()
                .set(payment_correlation::ActiveModel {
                    status: Set(status),
                    updated_at: Set(Utc::now()),
                    ..Default::default()
                })
                .filter(payment_correlation::Column::Id.eq(correlation.id))
                .exec(conn)
                .await?;
            Ok(())
        }
    }
}

/// Marks the payment successful, confirms a pending order and empties the
/// buyer's cart. A payment for an order cancelled in the meantime goes
/// straight back to the wallet.
async fn settle_success<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    correlation: &payment_correlation::Model,
    event_id: Option<&str>,
    payment_id: String,
) -> Result<Settled, ServiceError> {
    mark_correlation(conn, correlation, CorrelationStatus::Succeeded, event_id).await?;

    if order.status == OrderStatus::Cancelled {
        let updated = write_order(
            conn,
            order,
            OrderStatus::Cancelled,
            PaymentStatus::Refund,
            Some(payment_id.clone()),
        )
        .await?;
        credit_wallet(conn, order.user_id, order.total).await?;
        write_invoice(
            conn,
            order.id,
            PaymentStatus::Refund,
            Some(payment_id),
            Some("Paid after cancellation, refunded to wallet".to_string()),
        )
        .await?;
        warn!(order_id = %order.id, "Payment settled for a cancelled order; refunded to wallet");
        return Ok(Settled::PaidAfterCancel { order: updated });
    }

    let status = if order.status == OrderStatus::Pending {
        OrderStatus::Confirmed
    } else {
        order.status
    };
    let updated = write_order(
        conn,
        order,
        status,
        PaymentStatus::Successful,
        Some(payment_id.clone()),
    )
    .await?;
    write_invoice(
        conn,
        order.id,
        PaymentStatus::Successful,
        Some(payment_id.clone()),
        None,
    )
    .await?;
    let cart_id = reset_user_cart(conn, order.user_id).await?;

    info!(order_id = %order.id, "Payment settled");
    Ok(Settled::Paid {
        order: updated,
        payment_id,
        cart_id,
    })
}

async fn settle_failure<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    correlation: &payment_correlation::Model,
    event_id: Option<&str>,
    reason: String,
) -> Result<Settled, ServiceError> {
    mark_correlation(conn, correlation, CorrelationStatus::Failed, event_id).await?;
    let updated = write_order(
        conn,
        order,
        order.status,
        PaymentStatus::Failed,
        order.payment_id.clone(),
    )
    .await?;
    write_invoice(conn, order.id, PaymentStatus::Failed, None, Some(reason.clone())).await?;

    Ok(Settled::Failed {
        order: updated,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn event(kind: &str, error: Option<&str>) -> StripeEvent {
        let mut object = serde_json::json!({ "id": "pi_123" });
        if let Some(message) = error {
            object["last_payment_error"] = serde_json::json!({ "message": message });
        }
        serde_json::from_value(serde_json::json!({
            "id": "evt_1",
            "type": kind,
            "data": { "object": object }
        }))
        .unwrap()
    }

    #[test]
    fn event_types_are_classified() {
        assert_matches!(classify(&event("payment_intent.created", None)), Some(StripeAction::Created));
        assert_matches!(
            classify(&event("payment_intent.succeeded", None)),
            Some(StripeAction::Succeeded)
        );
        assert_matches!(
            classify(&event("payment_intent.failed", None)),
            Some(StripeAction::Failed(reason)) if reason == "Payment failed at Stripe"
        );
        assert_matches!(
            classify(&event("payment_intent.payment_failed", Some("card declined"))),
            Some(StripeAction::Failed(reason)) if reason == "card declined"
        );
        assert_matches!(classify(&event("charge.refunded", None)), None);
    }

    #[test]
    fn verification_form_uses_checkout_field_names() {
        let form: RazorpayVerification = serde_json::from_value(serde_json::json!({
            "signature": "abc",
            "razorId": "order_1",
            "paymentId": "pay_1"
        }))
        .unwrap();
        assert_eq!(form.razor_id, "order_1");
        assert!(form.validate().is_ok());
    }
}
