use crate::{
    entities::{
        category, coupon,
        coupon::CouponType,
        offer, product, used_coupon,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    middleware_helpers::{with_retry, RetryConfig},
    services::{cart as cart_store, RetryOnConcurrentModification},
};
use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApplyCouponInput {
    #[validate(length(min = 1, max = 64, message = "coupon code is required"))]
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_coupon_window"))]
pub struct CreateCouponInput {
    #[validate(length(min = 3, max = 64))]
    pub code: String,
    pub discount_type: CouponType,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(range(min = 1))]
    pub usage_limit: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

fn validate_coupon_window(input: &CreateCouponInput) -> Result<(), ValidationError> {
    if input.valid_until <= input.valid_from {
        let mut err = ValidationError::new("coupon_window");
        err.message = Some("valid_until must be after valid_from".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_offer_amounts"))]
pub struct CreateOfferInput {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(range(min = 1))]
    pub min_price: i64,
    #[validate(range(min = 1))]
    pub discount: i64,
    pub valid_until: DateTime<Utc>,
}

fn validate_offer_amounts(input: &CreateOfferInput) -> Result<(), ValidationError> {
    if input.discount > input.min_price {
        let mut err = ValidationError::new("offer_discount");
        err.message = Some("discount cannot exceed the minimum cart price".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PercentOfferInput {
    #[validate(range(min = 1, max = 99, message = "percent must be between 1 and 99"))]
    pub percent: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppliedCoupon {
    pub code: String,
    pub discount: i64,
    pub cart_total: i64,
    pub payable: i64,
}

/// Price after taking `percent` off, truncating
pub fn percent_off(price: i64, percent: i64) -> i64 {
    price - price * percent / 100
}

/// Coupons, cart offers and price offers
#[derive(Clone)]
pub struct PromotionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl PromotionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Redeems a coupon against the user's cart.
    ///
    /// The usage counter, the redemption record and the cart discount are
    /// written in one transaction. The counter increment is conditional on
    /// the limit so two racing redemptions cannot both take the last use.
    #[instrument(skip(self))]
    pub async fn apply_coupon(
        &self,
        user_id: Uuid,
        input: ApplyCouponInput,
    ) -> Result<AppliedCoupon, ServiceError> {
        input.validate()?;
        let code = input.code.trim().to_string();

        let (applied, cart_id, coupon_id) = with_retry(
            &RetryConfig::optimistic(),
            RetryOnConcurrentModification,
            || self.try_apply_coupon(user_id, &code),
        )
        .await?;

        self.event_sender
            .send_or_log(Event::CouponApplied {
                cart_id,
                coupon_id,
                discount: applied.discount,
            })
            .await;
        info!(%user_id, code = %applied.code, discount = applied.discount, "Coupon applied");
        Ok(applied)
    }

    async fn try_apply_coupon(
        &self,
        user_id: Uuid,
        code: &str,
    ) -> Result<(AppliedCoupon, Uuid, Uuid), ServiceError> {
        let txn = self.db.begin().await?;

        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Coupon {} not found", code)))?;

        if coupon.is_exhausted() {
            return Err(ServiceError::Conflict(
                "Coupon usage limit reached".to_string(),
            ));
        }

        let now = Utc::now();
        if !coupon.is_active_at(now) {
            let reason = if now < coupon.valid_from {
                "Coupon is not yet valid"
            } else {
                "Coupon expired"
            };
            return Err(ServiceError::Conflict(reason.to_string()));
        }

        let cart = cart_store::find_cart(&txn, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        if cart.offer_discount != 0 {
            return Err(ServiceError::Conflict(
                "A coupon is already applied to this cart".to_string(),
            ));
        }

        let redeemed = used_coupon::Entity::find()
            .filter(used_coupon::Column::UserId.eq(user_id))
            .filter(used_coupon::Column::CouponId.eq(coupon.id))
            .one(&txn)
            .await?;
        if redeemed.is_some() {
            return Err(ServiceError::Conflict(
                "Coupon has already been used".to_string(),
            ));
        }

        if cart.total_price == 0 {
            return Err(ServiceError::ValidationError(
                "Cart is empty, add more products".to_string(),
            ));
        }
        let discount = coupon.discount_for(cart.total_price);
        if discount == 0 {
            return Err(ServiceError::ValidationError(
                "Cart total is too low for this coupon".to_string(),
            ));
        }

        let claimed = coupon::Entity::update_many()
            .col_expr(
                coupon::Column::UsedCount,
                Expr::col(coupon::Column::UsedCount).add(1),
            )
            .filter(coupon::Column::Id.eq(coupon.id))
            .filter(coupon::Column::UsedCount.lt(coupon.usage_limit))
            .exec(&txn)
            .await?;
        if claimed.rows_affected == 0 {
            return Err(ServiceError::Conflict(
                "Coupon usage limit reached".to_string(),
            ));
        }

        used_coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            coupon_id: Set(coupon.id),
            discount: Set(discount),
            created_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict("Coupon has already been used".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        let cart = cart_store::write_discount(&txn, &cart, discount).await?;
        txn.commit().await?;

        Ok((
            AppliedCoupon {
                code: coupon.code,
                discount,
                cart_total: cart.total_price,
                payable: cart.payable(),
            },
            cart.id,
            coupon.id,
        ))
    }

    /// Offers the user's current cart qualifies for
    pub async fn offer_check(&self, user_id: Uuid) -> Result<Vec<offer::Model>, ServiceError> {
        let db = &*self.db;
        let cart = cart_store::find_cart(db, user_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Cart not found".to_string()))?;

        let offers = offer::Entity::find()
            .filter(offer::Column::MinPrice.lte(cart.total_price))
            .filter(offer::Column::ValidUntil.gte(Utc::now()))
            .order_by_desc(offer::Column::Discount)
            .all(db)
            .await?;

        if offers.is_empty() {
            return Err(ServiceError::NotFound(
                "No offers available for this cart".to_string(),
            ));
        }
        Ok(offers)
    }

    /// Coupons a user can still redeem right now
    pub async fn available_coupons(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        let now = Utc::now();
        Ok(coupon::Entity::find()
            .filter(coupon::Column::ValidFrom.lte(now))
            .filter(coupon::Column::ValidUntil.gte(now))
            .filter(Expr::col(coupon::Column::UsedCount).lt(Expr::col(coupon::Column::UsageLimit)))
            .order_by_asc(coupon::Column::ValidUntil)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn create_coupon(
        &self,
        input: CreateCouponInput,
    ) -> Result<coupon::Model, ServiceError> {
        input.validate()?;
        let code = input.code.trim().to_string();

        let coupon = coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.clone()),
            discount_type: Set(input.discount_type),
            amount: Set(input.amount),
            usage_limit: Set(input.usage_limit),
            used_count: Set(0),
            valid_from: Set(input.valid_from),
            valid_until: Set(input.valid_until),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict(format!("Coupon {} already exists", code))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(code = %coupon.code, "Coupon created");
        Ok(coupon)
    }

    pub async fn list_coupons(&self) -> Result<Vec<coupon::Model>, ServiceError> {
        Ok(coupon::Entity::find()
            .order_by_desc(coupon::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn delete_coupon(&self, coupon_id: Uuid) -> Result<(), ServiceError> {
        let result = coupon::Entity::delete_by_id(coupon_id)
            .exec(&*self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Coupon {} not found",
                coupon_id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn create_offer(&self, input: CreateOfferInput) -> Result<offer::Model, ServiceError> {
        input.validate()?;
        if input.valid_until <= Utc::now() {
            return Err(ServiceError::ValidationError(
                "valid_until must be in the future".to_string(),
            ));
        }

        Ok(offer::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            min_price: Set(input.min_price),
            discount: Set(input.discount),
            valid_until: Set(input.valid_until),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    pub async fn list_offers(&self) -> Result<Vec<offer::Model>, ServiceError> {
        Ok(offer::Entity::find()
            .order_by_desc(offer::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Sets a product's offer price to `percent` off its list price
    #[instrument(skip(self))]
    pub async fn apply_product_offer(
        &self,
        product_id: Uuid,
        input: PercentOfferInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let found = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .filter(|p| !p.removed)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let offer_price = percent_off(found.price, input.percent);
        let mut active: product::ActiveModel = found.into();
        active.offer_price = Set(offer_price);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(updated.id))
            .await;
        Ok(updated)
    }

    /// Applies a percentage offer to every listed product of a category.
    /// Returns the number of products repriced.
    #[instrument(skip(self))]
    pub async fn apply_category_offer(
        &self,
        category_id: Uuid,
        input: PercentOfferInput,
    ) -> Result<u64, ServiceError> {
        input.validate()?;
        let txn = self.db.begin().await?;

        category::Entity::find_by_id(category_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Category {} not found", category_id))
            })?;

        let products = product::Entity::find()
            .filter(product::Column::CategoryId.eq(category_id))
            .filter(product::Column::Removed.eq(false))
            .all(&txn)
            .await?;

        let now = Utc::now();
        let mut updated = 0u64;
        for found in products {
            let offer_price = percent_off(found.price, input.percent);
            let mut active: product::ActiveModel = found.into();
            active.offer_price = Set(offer_price);
            active.updated_at = Set(now);
            active.update(&txn).await?;
            updated += 1;
        }
        txn.commit().await?;

        if updated == 0 {
            warn!(%category_id, "Category offer matched no products");
        }
        Ok(updated)
    }
}
