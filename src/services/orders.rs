use crate::{
    entities::{
        invoice,
        order::{self, OrderStatus, PaymentMethod, PaymentStatus},
        order_item,
        payment_correlation::{self, CorrelationStatus, PaymentProvider},
        user, user_address,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::{with_retry, RetryConfig},
    services::{
        cart::{find_cart, load_items, reset_cart},
        inventory::{decrement_stock, restock},
        payments::{GatewayPayment, GatewayPaymentRequest, PaymentGateways, PaymentSettings},
        Paged, RetryOnConcurrentModification,
    },
};
use chrono::Utc;
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusInput {
    pub status: OrderStatus,
}

/// What the client needs to finish paying at a gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayCheckout {
    pub provider: PaymentProvider,
    /// Razorpay order id or Stripe payment intent id
    pub external_id: String,
    /// Minor units
    pub amount: i64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PlacedOrder {
    pub order: order::Model,
    pub invoice: invoice::Model,
    pub items: Vec<order_item::Model>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<GatewayCheckout>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub invoice: Option<invoice::Model>,
}

/// Rows written by a committed checkout
struct Checkout {
    order: order::Model,
    invoice: invoice::Model,
    items: Vec<order_item::Model>,
    cart_id: Uuid,
    cart_cleared: bool,
    stock_levels: Vec<(Uuid, i32)>,
}

fn gateway_provider(method: PaymentMethod) -> Option<PaymentProvider> {
    match method {
        PaymentMethod::Razorpay => Some(PaymentProvider::Razorpay),
        PaymentMethod::Stripe => Some(PaymentProvider::Stripe),
        PaymentMethod::Cod | PaymentMethod::Wallet => None,
    }
}

/// Checkout, cancellation and order administration.
///
/// Checkout writes the order, its invoice and lines, and takes stock for
/// every line in a single transaction. Gateway payments are opened before
/// the transaction starts; if the cart changes in between, checkout fails
/// with a conflict and nothing is written.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    gateways: PaymentGateways,
    settings: PaymentSettings,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        gateways: PaymentGateways,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            db,
            event_sender,
            gateways,
            settings,
        }
    }

    #[instrument(skip(self))]
    pub async fn place_order(
        &self,
        user_id: Uuid,
        address_id: Uuid,
        method: PaymentMethod,
    ) -> Result<PlacedOrder, ServiceError> {
        let db = &*self.db;
        let snapshot = find_cart(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
        if snapshot.product_quantity <= 0 {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        find_address(db, user_id, address_id).await?;

        let order_id = Uuid::new_v4();
        let total = snapshot.payable();

        let gateway_payment = match gateway_provider(method) {
            Some(provider) => {
                if total <= 0 {
                    return Err(ServiceError::ValidationError(format!(
                        "Nothing to charge through {}; use cod or wallet",
                        provider
                    )));
                }
                let gateway = self.gateways.get(provider)?;
                let request = GatewayPaymentRequest {
                    order_id,
                    user_id,
                    amount: total,
                    currency: self.settings.currency.clone(),
                };
                let payment = gateway.create_payment(&request).await.map_err(|e| {
                    warn!(error = %e, %order_id, %provider, "Gateway payment could not be opened");
                    counter!("storefront.payments.gateway_errors", 1, "provider" => provider.to_string());
                    ServiceError::from(e)
                })?;
                Some((provider, payment))
            }
            None => None,
        };

        let checkout = self
            .commit_checkout(
                order_id,
                user_id,
                address_id,
                method,
                snapshot.version,
                gateway_payment.as_ref(),
            )
            .await
            .map_err(|e| {
                if let Some((provider, payment)) = &gateway_payment {
                    warn!(
                        error = %e,
                        %provider,
                        external_id = %payment.external_id,
                        "Checkout rolled back after the gateway payment was opened"
                    );
                }
                e
            })?;

        info!(
            order_id = %checkout.order.id,
            total = checkout.order.total,
            status = %checkout.order.status,
            "Order placed"
        );
        counter!("storefront.orders.placed", 1, "method" => method.to_string());

        self.event_sender
            .send_or_log(Event::OrderPlaced {
                order_id: checkout.order.id,
                user_id,
                total: checkout.order.total,
                payment_method: method,
            })
            .await;
        for (product_id, quantity) in &checkout.stock_levels {
            self.event_sender
                .send_or_log(Event::StockChanged {
                    product_id: *product_id,
                    quantity: *quantity,
                })
                .await;
        }
        if method == PaymentMethod::Wallet {
            self.event_sender
                .send_or_log(Event::WalletDebited {
                    user_id,
                    amount: checkout.order.total,
                })
                .await;
            self.event_sender
                .send_or_log(Event::PaymentSucceeded {
                    order_id: checkout.order.id,
                    payment_id: "wallet".to_string(),
                })
                .await;
        }
        if checkout.cart_cleared {
            self.event_sender
                .send_or_log(Event::CartCleared(checkout.cart_id))
                .await;
        }

        let payment = gateway_payment.map(|(provider, payment)| GatewayCheckout {
            provider,
            external_id: payment.external_id,
            amount: payment.amount,
            currency: payment.currency,
            client_secret: payment.client_secret,
            key_id: match provider {
                PaymentProvider::Razorpay => self.settings.razorpay_key_id.clone(),
                PaymentProvider::Stripe => None,
            },
        });

        Ok(PlacedOrder {
            order: checkout.order,
            invoice: checkout.invoice,
            items: checkout.items,
            payment,
        })
    }

    async fn commit_checkout(
        &self,
        order_id: Uuid,
        user_id: Uuid,
        address_id: Uuid,
        method: PaymentMethod,
        expected_cart_version: i32,
        gateway_payment: Option<&(PaymentProvider, GatewayPayment)>,
    ) -> Result<Checkout, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;
        if cart.version != expected_cart_version {
            return Err(ServiceError::Conflict(
                "Cart changed during checkout, please retry".to_string(),
            ));
        }
        let lines = load_items(&txn, cart.id).await?;
        if lines.is_empty() {
            return Err(ServiceError::ValidationError("Cart is empty".to_string()));
        }
        let address = find_address(&txn, user_id, address_id).await?;

        let total = cart.payable();
        let quantity: i32 = lines.iter().map(|l| l.quantity).sum();
        let (status, payment_status) = match method {
            PaymentMethod::Wallet => (OrderStatus::Confirmed, PaymentStatus::Successful),
            _ => (OrderStatus::Pending, PaymentStatus::Pending),
        };
        let payment_id = gateway_payment.map(|(_, p)| p.external_id.clone());
        let now = Utc::now();

        let order = order::ActiveModel {
            id: Set(order_id),
            user_id: Set(user_id),
            address_id: Set(address.id),
            total: Set(total),
            status: Set(status),
            payment_method: Set(method),
            payment_status: Set(payment_status),
            payment_id: Set(payment_id.clone()),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let invoice = invoice::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            user_id: Set(user_id),
            address_type: Set(address.address_type),
            quantity: Set(quantity),
            price: Set(total),
            payment_method: Set(method),
            status: Set(payment_status),
            payment_id: Set(payment_id),
            remark: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        let mut items = Vec::with_capacity(lines.len());
        let mut stock_levels = Vec::with_capacity(lines.len());
        for line in &lines {
            let item = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                category_id: Set(line.category_id),
                product_name: Set(line.product_name.clone()),
                quantity: Set(line.quantity),
                price: Set(line.price),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
            let remaining =
                decrement_stock(&txn, line.product_id, line.category_id, line.quantity).await?;
            stock_levels.push((line.product_id, remaining));
            items.push(item);
        }

        let cart_cleared = match (method, gateway_payment) {
            (PaymentMethod::Wallet, _) => {
                debit_wallet(&txn, user_id, total).await?;
                reset_cart(&txn, cart.id, Some(cart.version)).await?;
                true
            }
            (PaymentMethod::Cod, _) => {
                reset_cart(&txn, cart.id, Some(cart.version)).await?;
                true
            }
            (_, Some((provider, payment))) => {
                payment_correlation::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    provider: Set(*provider),
                    external_id: Set(payment.external_id.clone()),
                    order_id: Set(order_id),
                    status: Set(CorrelationStatus::Created),
                    last_event_id: Set(None),
                    created_at: Set(now),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;
                false
            }
            (_, None) => {
                return Err(ServiceError::InternalError(format!(
                    "{} checkout without a gateway payment",
                    method
                )));
            }
        };

        txn.commit().await?;

        Ok(Checkout {
            order,
            invoice,
            items,
            cart_id: cart.id,
            cart_cleared,
            stock_levels,
        })
    }

    /// Buyer cancellation; only the owner may cancel
    #[instrument(skip(self))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        self.cancel(Some(user_id), order_id).await
    }

    #[instrument(skip(self))]
    pub async fn admin_cancel_order(&self, order_id: Uuid) -> Result<order::Model, ServiceError> {
        self.cancel(None, order_id).await
    }

    async fn cancel(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<order::Model, ServiceError> {
        let (previous, cancelled, refunded) = with_retry(
            &RetryConfig::optimistic(),
            RetryOnConcurrentModification,
            || self.try_cancel(owner, order_id),
        )
        .await?;

        info!(%order_id, refunded, "Order cancelled");
        self.emit_cancellation(previous, &cancelled, refunded).await;
        Ok(cancelled)
    }

    async fn try_cancel(
        &self,
        owner: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<(OrderStatus, order::Model, i64), ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        if let Some(user_id) = owner {
            if order.user_id != user_id {
                return Err(ServiceError::Unauthorized(
                    "Order does not belong to this user".to_string(),
                ));
            }
        }
        if !order.status.is_cancellable() {
            return Err(ServiceError::OrderNotCancellable(order.id));
        }

        let (cancelled, refunded) = apply_cancellation(&txn, &order).await?;
        txn.commit().await?;
        Ok((order.status, cancelled, refunded))
    }

    async fn emit_cancellation(&self, previous: OrderStatus, cancelled: &order::Model, refunded: i64) {
        counter!("storefront.orders.cancelled", 1);
        self.event_sender
            .send_or_log(Event::OrderStatusChanged {
                order_id: cancelled.id,
                old_status: previous,
                new_status: OrderStatus::Cancelled,
            })
            .await;
        self.event_sender
            .send_or_log(Event::OrderCancelled {
                order_id: cancelled.id,
                refunded,
            })
            .await;
        if cancelled.payment_status == PaymentStatus::Refund && refunded > 0 {
            self.event_sender
                .send_or_log(Event::PaymentRefunded {
                    order_id: cancelled.id,
                    amount: refunded,
                })
                .await;
        }
    }

    /// Admin status change along the allowed transitions
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        let (previous, updated, refunded) = with_retry(
            &RetryConfig::optimistic(),
            RetryOnConcurrentModification,
            || self.try_update_status(order_id, next),
        )
        .await?;

        info!(%order_id, from = %previous, to = %next, "Order status updated");
        if next == OrderStatus::Cancelled {
            self.emit_cancellation(previous, &updated, refunded).await;
        } else {
            self.event_sender
                .send_or_log(Event::OrderStatusChanged {
                    order_id,
                    old_status: previous,
                    new_status: next,
                })
                .await;
        }
        Ok(updated)
    }

    async fn try_update_status(
        &self,
        order_id: Uuid,
        next: OrderStatus,
    ) -> Result<(OrderStatus, order::Model, i64), ServiceError> {
        let txn = self.db.begin().await?;
        let order = find_order(&txn, order_id).await?;
        if !order.status.can_transition_to(next) {
            return Err(ServiceError::InvalidTransition {
                from: order.status.to_string(),
                to: next.to_string(),
            });
        }

        let (updated, refunded) = if next == OrderStatus::Cancelled {
            apply_cancellation(&txn, &order).await?
        } else {
            // Cash is collected on delivery.
            let collected = next == OrderStatus::Delivered
                && order.payment_method == PaymentMethod::Cod
                && order.payment_status == PaymentStatus::Pending;
            let payment_status = if collected {
                write_invoice(&txn, order.id, PaymentStatus::Successful, None, None).await?;
                PaymentStatus::Successful
            } else {
                order.payment_status
            };
            let updated =
                write_order(&txn, &order, next, payment_status, order.payment_id.clone()).await?;
            (updated, 0)
        };

        txn.commit().await?;
        Ok((order.status, updated, refunded))
    }

    pub async fn history(
        &self,
        user_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<Paged<order::Model>, ServiceError> {
        let query = order::Entity::find().filter(order::Column::UserId.eq(user_id));
        self.page_of(query, page, per_page).await
    }

    pub async fn admin_list(
        &self,
        status: Option<OrderStatus>,
        page: u64,
        per_page: u64,
    ) -> Result<Paged<order::Model>, ServiceError> {
        let mut query = order::Entity::find();
        if let Some(status) = status {
            query = query.filter(order::Column::Status.eq(status));
        }
        self.page_of(query, page, per_page).await
    }

    async fn page_of(
        &self,
        query: sea_orm::Select<order::Entity>,
        page: u64,
        per_page: u64,
    ) -> Result<Paged<order::Model>, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let paginator = query
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page - 1).await?;

        Ok(Paged {
            items,
            page,
            per_page,
            total,
        })
    }

    /// Order with its lines; a user may only read their own orders
    pub async fn order_details(
        &self,
        user_id: Option<Uuid>,
        order_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, order_id).await?;
        ensure_owner(&order, user_id)?;

        let items = order_lines(db, order.id).await?;
        let invoice = invoice::Entity::find()
            .filter(invoice::Column::OrderId.eq(order.id))
            .one(db)
            .await?;

        Ok(OrderDetails {
            order,
            items,
            invoice,
        })
    }

    pub async fn invoice(
        &self,
        user_id: Uuid,
        order_id: Uuid,
    ) -> Result<invoice::Model, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, order_id).await?;
        ensure_owner(&order, Some(user_id))?;

        invoice::Entity::find()
            .filter(invoice::Column::OrderId.eq(order.id))
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice for order {} not found", order_id)))
    }
}

fn ensure_owner(order: &order::Model, user_id: Option<Uuid>) -> Result<(), ServiceError> {
    match user_id {
        Some(user_id) if order.user_id != user_id => Err(ServiceError::Unauthorized(
            "Order does not belong to this user".to_string(),
        )),
        _ => Ok(()),
    }
}

async fn find_address<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    address_id: Uuid,
) -> Result<user_address::Model, ServiceError> {
    user_address::Entity::find_by_id(address_id)
        .filter(user_address::Column::UserId.eq(user_id))
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))
}

pub(crate) async fn find_order<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<order::Model, ServiceError> {
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))
}

async fn order_lines<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
) -> Result<Vec<order_item::Model>, ServiceError> {
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Writes order state guarded by its version
pub(crate) async fn write_order<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    status: OrderStatus,
    payment_status: PaymentStatus,
    payment_id: Option<String>,
) -> Result<order::Model, ServiceError> {
    let now = Utc::now();
    let result = order::Entity::update_many()
        .set(order::ActiveModel {
            status: Set(status),
            payment_status: Set(payment_status),
            payment_id: Set(payment_id.clone()),
            version: Set(order.version + 1),
            updated_at: Set(now),
            ..Default::default()
        })
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(order.id));
    }

    Ok(order::Model {
        status,
        payment_status,
        payment_id,
        version: order.version + 1,
        updated_at: now,
        ..order.clone()
    })
}

/// Mirrors a payment status change onto the order's invoice
pub(crate) async fn write_invoice<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: PaymentStatus,
    payment_id: Option<String>,
    remark: Option<String>,
) -> Result<(), ServiceError> {
    let mut update = invoice::Entity::update_many()
        .col_expr(invoice::Column::Status, Expr::value(status))
        .col_expr(invoice::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(invoice::Column::OrderId.eq(order_id));
    if let Some(payment_id) = payment_id {
        update = update.col_expr(invoice::Column::PaymentId, Expr::value(payment_id));
    }
    if let Some(remark) = remark {
        update = update.col_expr(invoice::Column::Remark, Expr::value(remark));
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        error!(%order_id, "Order has no invoice");
        return Err(ServiceError::NotFound(format!(
            "Invoice for order {} not found",
            order_id
        )));
    }
    Ok(())
}

/// Cancels an order: refunds a settled payment to the wallet and restocks every line
pub(crate) async fn apply_cancellation<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
) -> Result<(order::Model, i64), ServiceError> {
    let paid = order.payment_status == PaymentStatus::Successful;
    let payment_status = if paid {
        PaymentStatus::Refund
    } else {
        order.payment_status
    };

    let cancelled = write_order(
        conn,
        order,
        OrderStatus::Cancelled,
        payment_status,
        order.payment_id.clone(),
    )
    .await?;

    let refunded = if paid {
        credit_wallet(conn, order.user_id, order.total).await?;
        write_invoice(
            conn,
            order.id,
            PaymentStatus::Refund,
            None,
            Some("Refunded to wallet".to_string()),
        )
        .await?;
        order.total
    } else {
        0
    };

    for line in order_lines(conn, order.id).await? {
        restock(conn, line.product_id, line.quantity).await?;
    }

    Ok((cancelled, refunded))
}

/// Takes `amount` from the wallet, failing when the balance is short
pub(crate) async fn debit_wallet<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
) -> Result<(), ServiceError> {
    let result = user::Entity::update_many()
        .col_expr(
            user::Column::Wallet,
            Expr::col(user::Column::Wallet).sub(amount),
        )
        .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user::Column::Id.eq(user_id))
        .filter(user::Column::Wallet.gte(amount))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        let available = user::Entity::find_by_id(user_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))?
            .wallet;
        return Err(ServiceError::InsufficientWalletBalance {
            required: amount,
            available,
        });
    }
    Ok(())
}

pub(crate) async fn credit_wallet<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
    amount: i64,
) -> Result<(), ServiceError> {
    let result = user::Entity::update_many()
        .col_expr(
            user::Column::Wallet,
            Expr::col(user::Column::Wallet).add(amount),
        )
        .col_expr(user::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(user::Column::Id.eq(user_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!("User {} not found", user_id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_gateway_methods_map_to_providers() {
        assert_eq!(
            gateway_provider(PaymentMethod::Razorpay),
            Some(PaymentProvider::Razorpay)
        );
        assert_eq!(
            gateway_provider(PaymentMethod::Stripe),
            Some(PaymentProvider::Stripe)
        );
        assert_eq!(gateway_provider(PaymentMethod::Cod), None);
        assert_eq!(gateway_provider(PaymentMethod::Wallet), None);
    }

    #[test]
    fn other_users_cannot_read_an_order() {
        let owner = Uuid::new_v4();
        let now = Utc::now();
        let order = order::Model {
            id: Uuid::new_v4(),
            user_id: owner,
            address_id: Uuid::new_v4(),
            total: 900,
            status: OrderStatus::Pending,
            payment_method: PaymentMethod::Cod,
            payment_status: PaymentStatus::Pending,
            payment_id: None,
            version: 1,
            created_at: now,
            updated_at: now,
        };

        assert!(ensure_owner(&order, Some(owner)).is_ok());
        assert!(ensure_owner(&order, None).is_ok());
        assert!(matches!(
            ensure_owner(&order, Some(Uuid::new_v4())),
            Err(ServiceError::Unauthorized(_))
        ));
    }
}
