use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::entities::order::{OrderStatus, PaymentMethod};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    ///
    /// Events are emitted after the owning transaction has committed, so a
    /// closed channel must never turn a successful request into an error.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(err) = self.sender.try_send(event) {
            match err {
                mpsc::error::TrySendError::Full(event) => {
                    warn!("Event channel full, waiting for capacity");
                    if let Err(e) = self.sender.send(event).await {
                        warn!(error = %e, "Dropping event, channel closed");
                    }
                }
                mpsc::error::TrySendError::Closed(event) => {
                    warn!(?event, "Dropping event, channel closed");
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Account events
    UserRegistered(Uuid),
    UserBlockToggled { user_id: Uuid, blocked: bool },

    // Catalog events
    ProductCreated(Uuid),
    ProductUpdated(Uuid),
    StockChanged {
        product_id: Uuid,
        quantity: i32,
    },

    // Cart events
    CartItemAdded { cart_id: Uuid, product_id: Uuid },
    CartItemRemoved { cart_id: Uuid, product_id: Uuid },
    CouponApplied {
        cart_id: Uuid,
        coupon_id: Uuid,
        discount: i64,
    },
    CartCleared(Uuid),

    // Order events
    OrderPlaced {
        order_id: Uuid,
        user_id: Uuid,
        total: i64,
        payment_method: PaymentMethod,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderCancelled { order_id: Uuid, refunded: i64 },

    // Payment events
    PaymentSucceeded { order_id: Uuid, payment_id: String },
    PaymentFailed { order_id: Uuid, reason: String },
    PaymentRefunded { order_id: Uuid, amount: i64 },
    WalletDebited { user_id: Uuid, amount: i64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::UserRegistered(_) => "user.registered",
            Event::UserBlockToggled { .. } => "user.block_toggled",
            Event::ProductCreated(_) => "product.created",
            Event::ProductUpdated(_) => "product.updated",
            Event::StockChanged { .. } => "inventory.stock_changed",
            Event::CartItemAdded { .. } => "cart.item_added",
            Event::CartItemRemoved { .. } => "cart.item_removed",
            Event::CouponApplied { .. } => "cart.coupon_applied",
            Event::CartCleared(_) => "cart.cleared",
            Event::OrderPlaced { .. } => "order.placed",
            Event::OrderStatusChanged { .. } => "order.status_changed",
            Event::OrderCancelled { .. } => "order.cancelled",
            Event::PaymentSucceeded { .. } => "payment.succeeded",
            Event::PaymentFailed { .. } => "payment.failed",
            Event::PaymentRefunded { .. } => "payment.refunded",
            Event::WalletDebited { .. } => "wallet.debited",
        }
    }
}

/// Envelope used when events are logged as structured JSON
#[derive(Debug, Serialize)]
struct LoggedEvent<'a> {
    name: &'static str,
    received_at: DateTime<Utc>,
    event: &'a Event,
}

/// Consumes the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, low_stock_threshold: i32) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let envelope = LoggedEvent {
            name: event.name(),
            received_at: Utc::now(),
            event: &event,
        };
        match serde_json::to_string(&envelope) {
            Ok(json) => debug!(event = %json, "event received"),
            Err(e) => warn!(error = %e, "failed to serialize event"),
        }

        match &event {
            Event::StockChanged {
                product_id,
                quantity,
            } if *quantity <= low_stock_threshold => {
                warn!(%product_id, quantity, "Low stock");
            }
            Event::OrderPlaced {
                order_id,
                total,
                payment_method,
                ..
            } => {
                info!(%order_id, total, %payment_method, "Order placed");
            }
            Event::OrderCancelled { order_id, refunded } => {
                info!(%order_id, refunded, "Order cancelled");
            }
            Event::PaymentFailed { order_id, reason } => {
                warn!(%order_id, reason = %reason, "Payment failed");
            }
            Event::PaymentRefunded { order_id, amount } => {
                info!(%order_id, amount, "Payment refunded to wallet");
            }
            other => {
                info!(event = other.name(), "Event processed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_survives_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        sender.send_or_log(Event::CartCleared(Uuid::new_v4())).await;
        assert!(sender.send(Event::CartCleared(Uuid::new_v4())).await.is_err());
    }

    #[tokio::test]
    async fn processing_loop_drains_and_exits() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        sender
            .send_or_log(Event::StockChanged {
                product_id: Uuid::new_v4(),
                quantity: 1,
            })
            .await;
        sender.send_or_log(Event::UserRegistered(Uuid::new_v4())).await;
        drop(sender);
        process_events(rx, 5).await;
    }
}
