use crate::{
    entities::{product, wishlist},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

#[derive(Clone)]
pub struct WishlistService {
    db: Arc<DatabaseConnection>,
}

impl WishlistService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn add(&self, user_id: Uuid, product_id: Uuid) -> Result<wishlist::Model, ServiceError> {
        let db = &*self.db;

        let product = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .filter(|p| !p.removed)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let already = wishlist::Entity::find()
            .filter(wishlist::Column::UserId.eq(user_id))
            .filter(wishlist::Column::ProductId.eq(product_id))
            .one(db)
            .await?;
        if already.is_some() {
            return Err(ServiceError::Conflict(
                "Product is already in the wishlist".to_string(),
            ));
        }

        let entry = wishlist::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product.id),
            category_id: Set(product.category_id),
            product_name: Set(product.name.clone()),
            price: Set(product.effective_price()),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict("Product is already in the wishlist".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(%user_id, %product_id, "Added product to wishlist");
        Ok(entry)
    }

    pub async fn list(&self, user_id: Uuid) -> Result<Vec<wishlist::Model>, ServiceError> {
        Ok(wishlist::Entity::find()
            .filter(wishlist::Column::UserId.eq(user_id))
            .order_by_desc(wishlist::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn remove(&self, user_id: Uuid, product_id: Uuid) -> Result<(), ServiceError> {
        let result = wishlist::Entity::delete_many()
            .filter(wishlist::Column::UserId.eq(user_id))
            .filter(wishlist::Column::ProductId.eq(product_id))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!(
                "Product {} is not in the wishlist",
                product_id
            )));
        }
        Ok(())
    }
}
