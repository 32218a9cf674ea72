use crate::{
    entities::{cart, cart_item, product},
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::{with_retry, RetryConfig},
    services::RetryOnConcurrentModification,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddToCartInput {
    #[validate(range(min = 1, max = 1000, message = "quantity must be between 1 and 1000"))]
    pub quantity: i32,
}

/// A cart together with its lines
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    #[serde(flatten)]
    pub cart: cart::Model,
    pub items: Vec<cart_item::Model>,
}

/// Shopping cart service.
///
/// Every mutation runs in one transaction and recomputes the cart totals
/// from its lines before writing the cart row. The write is guarded by the
/// cart `version`; losing that race rolls back and the whole mutation is
/// retried a bounded number of times before surfacing a conflict.
#[derive(Clone)]
pub struct CartService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CartService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Adds `quantity` units of a product, creating the cart on first use.
    ///
    /// The unit price is captured when the line is first created and prefers
    /// the product's offer price. An applied coupon discount is kept.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        input: AddToCartInput,
    ) -> Result<CartView, ServiceError> {
        input.validate()?;

        let view = with_retry(
            &RetryConfig::optimistic(),
            RetryOnConcurrentModification,
            || self.try_add_item(user_id, product_id, input.quantity),
        )
        .await?;

        self.event_sender
            .send_or_log(Event::CartItemAdded {
                cart_id: view.cart.id,
                product_id,
            })
            .await;

        info!(
            cart_id = %view.cart.id,
            %product_id,
            quantity = input.quantity,
            "Added item to cart"
        );
        Ok(view)
    }

    async fn try_add_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let product = product::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .filter(|p| !p.removed)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let cart = match find_cart(&txn, user_id).await? {
            Some(cart) => cart,
            None => create_cart(&txn, user_id).await?,
        };

        let existing = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?;

        match existing {
            Some(item) => {
                cart_item::Entity::update_many()
                    .col_expr(
                        cart_item::Column::Quantity,
                        Expr::col(cart_item::Column::Quantity).add(quantity),
                    )
                    .filter(cart_item::Column::Id.eq(item.id))
                    .exec(&txn)
                    .await?;
            }
            None => {
                cart_item::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    cart_id: Set(cart.id),
                    product_id: Set(product.id),
                    category_id: Set(product.category_id),
                    product_name: Set(product.name.clone()),
                    quantity: Set(quantity),
                    price: Set(product.effective_price()),
                    created_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await
                .map_err(|e| {
                    if crate::db::is_unique_violation(&e) {
                        ServiceError::ConcurrentModification(cart.id)
                    } else {
                        ServiceError::DatabaseError(e)
                    }
                })?;
            }
        }

        let view = write_totals(&txn, &cart, cart.offer_discount).await?;
        txn.commit().await?;
        Ok(view)
    }

    /// Takes one unit of a product out of the cart.
    ///
    /// The line is deleted when its last unit goes, and any applied coupon
    /// discount is reset.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let view = with_retry(
            &RetryConfig::optimistic(),
            RetryOnConcurrentModification,
            || self.try_remove_item(user_id, product_id),
        )
        .await?;

        self.event_sender
            .send_or_log(Event::CartItemRemoved {
                cart_id: view.cart.id,
                product_id,
            })
            .await;
        Ok(view)
    }

    async fn try_remove_item(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<CartView, ServiceError> {
        let txn = self.db.begin().await?;

        let cart = find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let item = cart_item::Entity::find()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} is not in the cart", product_id))
            })?;

        if item.quantity <= 1 {
            cart_item::Entity::delete_by_id(item.id).exec(&txn).await?;
        } else {
            cart_item::Entity::update_many()
                .col_expr(
                    cart_item::Column::Quantity,
                    Expr::col(cart_item::Column::Quantity).sub(1),
                )
                .filter(cart_item::Column::Id.eq(item.id))
                .exec(&txn)
                .await?;
        }

        let view = write_totals(&txn, &cart, 0).await?;
        txn.commit().await?;
        debug!(cart_id = %cart.id, %product_id, "Removed one unit from cart");
        Ok(view)
    }

    pub async fn view_cart(&self, user_id: Uuid) -> Result<cart::Model, ServiceError> {
        find_cart(&*self.db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))
    }

    pub async fn view_items(&self, user_id: Uuid) -> Result<Vec<cart_item::Model>, ServiceError> {
        let cart = self.view_cart(user_id).await?;
        Ok(load_items(&*self.db, cart.id).await?)
    }
}

pub(crate) async fn find_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<cart::Model>, ServiceError> {
    Ok(cart::Entity::find()
        .filter(cart::Column::UserId.eq(user_id))
        .one(conn)
        .await?)
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> Result<Vec<cart_item::Model>, sea_orm::DbErr> {
    cart_item::Entity::find()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .order_by_asc(cart_item::Column::CreatedAt)
        .all(conn)
        .await
}

async fn create_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<cart::Model, ServiceError> {
    let now = Utc::now();
    cart::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_quantity: Set(0),
        total_price: Set(0),
        offer_discount: Set(0),
        version: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        // Another request created the cart first; retrying picks it up.
        if crate::db::is_unique_violation(&e) {
            ServiceError::ConcurrentModification(user_id)
        } else {
            ServiceError::DatabaseError(e)
        }
    })
}

/// Recomputes totals from the cart lines and writes them with a version guard
pub(crate) async fn write_totals<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
    offer_discount: i64,
) -> Result<CartView, ServiceError> {
    let items = load_items(conn, cart.id).await?;
    let total_price: i64 = items.iter().map(cart_item::Model::line_total).sum();
    let product_quantity: i32 = items.iter().map(|i| i.quantity).sum();
    let now = Utc::now();

    let result = cart::Entity::update_many()
        .col_expr(cart::Column::TotalPrice, Expr::value(total_price))
        .col_expr(cart::Column::ProductQuantity, Expr::value(product_quantity))
        .col_expr(cart::Column::OfferDiscount, Expr::value(offer_discount))
        .col_expr(cart::Column::Version, Expr::col(cart::Column::Version).add(1))
        .col_expr(cart::Column::UpdatedAt, Expr::value(now))
        .filter(cart::Column::Id.eq(cart.id))
        .filter(cart::Column::Version.eq(cart.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(cart.id));
    }

    Ok(CartView {
        cart: cart::Model {
            total_price,
            product_quantity,
            offer_discount,
            version: cart.version + 1,
            updated_at: now,
            ..cart.clone()
        },
        items,
    })
}

/// Sets only the applied discount, guarded by the cart version
pub(crate) async fn write_discount<C: ConnectionTrait>(
    conn: &C,
    cart: &cart::Model,
    offer_discount: i64,
) -> Result<cart::Model, ServiceError> {
    let now = Utc::now();
    let result = cart::Entity::update_many()
        .col_expr(cart::Column::OfferDiscount, Expr::value(offer_discount))
        .col_expr(cart::Column::Version, Expr::col(cart::Column::Version).add(1))
        .col_expr(cart::Column::UpdatedAt, Expr::value(now))
        .filter(cart::Column::Id.eq(cart.id))
        .filter(cart::Column::Version.eq(cart.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(cart.id));
    }

    Ok(cart::Model {
        offer_discount,
        version: cart.version + 1,
        updated_at: now,
        ..cart.clone()
    })
}

/// Empties a cart and zeroes its totals.
///
/// With `expected_version` set the reset only applies if nobody touched the
/// cart since it was read.
pub(crate) async fn reset_cart<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    expected_version: Option<i32>,
) -> Result<(), ServiceError> {
    let mut update = cart::Entity::update_many()
        .col_expr(cart::Column::TotalPrice, Expr::value(0i64))
        .col_expr(cart::Column::ProductQuantity, Expr::value(0i32))
        .col_expr(cart::Column::OfferDiscount, Expr::value(0i64))
        .col_expr(cart::Column::Version, Expr::col(cart::Column::Version).add(1))
        .col_expr(cart::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(cart::Column::Id.eq(cart_id));
    if let Some(version) = expected_version {
        update = update.filter(cart::Column::Version.eq(version));
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::ConcurrentModification(cart_id));
    }

    cart_item::Entity::delete_many()
        .filter(cart_item::Column::CartId.eq(cart_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Empties the user's cart if they have one; returns the cart id when cleared
pub(crate) async fn reset_user_cart<C: ConnectionTrait>(
    conn: &C,
    user_id: Uuid,
) -> Result<Option<Uuid>, ServiceError> {
    match find_cart(conn, user_id).await? {
        Some(cart) => {
            reset_cart(conn, cart.id, None).await?;
            Ok(Some(cart.id))
        }
        None => Ok(None),
    }
}
