use crate::{
    entities::{cart_item, category, inventory, product},
    errors::ServiceError,
    events::{Event, EventSender},
    services::Paged,
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CategoryInput {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(length(max = 2000))]
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ProductInput {
    #[validate(length(min = 2, max = 200))]
    pub name: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub description: String,
    #[validate(length(max = 5000))]
    #[serde(default)]
    pub specification: String,
    #[validate(range(min = 1, message = "price must be positive"))]
    pub price: i64,
    #[validate(length(min = 1, max = 20))]
    pub size: String,
    pub category_id: Uuid,
    #[validate(url)]
    pub image_url: Option<String>,
}

/// Listing filters; every field is optional
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    pub search: Option<String>,
    pub category: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProductDetails {
    #[serde(flatten)]
    pub product: product::Model,
    pub category_name: String,
    pub stock: i32,
    pub in_stock: bool,
}

#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CatalogService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self))]
    pub async fn create_category(
        &self,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let now = Utc::now();
        let name = input.name.trim().to_string();

        category::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.clone()),
            description: Set(input.description),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict(format!("Category {} already exists", name))
            } else {
                ServiceError::DatabaseError(e)
            }
        })
    }

    pub async fn list_categories(&self) -> Result<Vec<category::Model>, ServiceError> {
        Ok(category::Entity::find()
            .order_by_asc(category::Column::Name)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn update_category(
        &self,
        category_id: Uuid,
        input: CategoryInput,
    ) -> Result<category::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;
        let found = category::Entity::find_by_id(category_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", category_id)))?;

        let name = input.name.trim().to_string();
        let mut active: category::ActiveModel = found.into();
        active.name = Set(name.clone());
        active.description = Set(input.description);
        active.updated_at = Set(Utc::now());
        active.update(db).await.map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict(format!("Category {} already exists", name))
            } else {
                ServiceError::DatabaseError(e)
            }
        })
    }

    /// Deletes an empty category
    #[instrument(skip(self))]
    pub async fn delete_category(&self, category_id: Uuid) -> Result<(), ServiceError> {
        let db = &*self.db;
        category::Entity::find_by_id(category_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", category_id)))?;

        let products = product::Entity::find()
            .filter(product::Column::CategoryId.eq(category_id))
            .count(db)
            .await?;
        if products > 0 {
            return Err(ServiceError::Conflict(format!(
                "Category still has {} products",
                products
            )));
        }

        category::Entity::delete_by_id(category_id).exec(db).await?;
        Ok(())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_product(&self, input: ProductInput) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;
        self.require_category(input.category_id).await?;

        let now = Utc::now();
        let created = product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name),
            description: Set(input.description),
            specification: Set(input.specification),
            price: Set(input.price),
            offer_price: Set(0),
            size: Set(input.size),
            category_id: Set(input.category_id),
            image_url: Set(input.image_url),
            removed: Set(false),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await?;

        info!(product_id = %created.id, "Product created");
        self.event_sender
            .send_or_log(Event::ProductCreated(created.id))
            .await;
        Ok(created)
    }

    /// Replaces a product's details. A price change drops any offer price;
    /// a category change moves the stock row and open cart lines with it.
    #[instrument(skip(self, input))]
    pub async fn update_product(
        &self,
        product_id: Uuid,
        input: ProductInput,
    ) -> Result<product::Model, ServiceError> {
        input.validate()?;
        let db = &*self.db;
        self.require_category(input.category_id).await?;

        let found = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let price_changed = found.price != input.price;
        let old_category = found.category_id;
        let new_category = input.category_id;
        let txn = db.begin().await?;
        let mut active: product::ActiveModel = found.into();
        active.name = Set(input.name);
        active.description = Set(input.description);
        active.specification = Set(input.specification);
        active.price = Set(input.price);
        active.size = Set(input.size);
        active.category_id = Set(input.category_id);
        active.image_url = Set(input.image_url);
        if price_changed {
            active.offer_price = Set(0);
        }
        active.updated_at = Set(Utc::now());
        let updated = active.update(&txn).await?;

        if old_category != new_category {
            // Stock and open cart lines are keyed by (product, category)
            inventory::Entity::update_many()
                .col_expr(inventory::Column::CategoryId, Expr::value(new_category))
                .filter(inventory::Column::ProductId.eq(product_id))
                .exec(&txn)
                .await?;
            cart_item::Entity::update_many()
                .col_expr(cart_item::Column::CategoryId, Expr::value(new_category))
                .filter(cart_item::Column::ProductId.eq(product_id))
                .exec(&txn)
                .await?;
            info!(%product_id, from = %old_category, to = %new_category, "Product moved to another category");
        }
        txn.commit().await?;

        self.event_sender
            .send_or_log(Event::ProductUpdated(updated.id))
            .await;
        Ok(updated)
    }

    /// Toggles the soft-delete flag
    #[instrument(skip(self))]
    pub async fn toggle_removed(&self, product_id: Uuid) -> Result<product::Model, ServiceError> {
        let db = &*self.db;
        let found = product::Entity::find_by_id(product_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let removed = !found.removed;
        let mut active: product::ActiveModel = found.into();
        active.removed = Set(removed);
        active.updated_at = Set(Utc::now());
        let updated = active.update(db).await?;

        info!(%product_id, removed, "Product visibility changed");
        self.event_sender
            .send_or_log(Event::ProductUpdated(updated.id))
            .await;
        Ok(updated)
    }

    /// Lists products, newest first. Removed products are only included for admins.
    pub async fn list_products(
        &self,
        filter: ProductFilter,
        include_removed: bool,
        page: u64,
        per_page: u64,
    ) -> Result<Paged<product::Model>, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);

        let mut query = product::Entity::find();
        if !include_removed {
            query = query.filter(product::Column::Removed.eq(false));
        }
        if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(product::Column::Name.contains(search));
        }
        if let Some(category_id) = filter.category {
            query = query.filter(product::Column::CategoryId.eq(category_id));
        }
        if let Some(min) = filter.min_price {
            query = query.filter(product::Column::Price.gte(min));
        }
        if let Some(max) = filter.max_price {
            query = query.filter(product::Column::Price.lte(max));
        }
        if let Some(size) = filter.size {
            query = query.filter(product::Column::Size.eq(size));
        }

        let paginator = query
            .order_by_desc(product::Column::CreatedAt)
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

    /// Product with its category name and current stock
    pub async fn product_details(
        &self,
        product_id: Uuid,
        include_removed: bool,
    ) -> Result<ProductDetails, ServiceError> {
        let db = &*self.db;
        let (found, category) = product::Entity::find_by_id(product_id)
            .find_also_related(category::Entity)
            .one(db)
            .await?
            .filter(|(p, _)| include_removed || !p.removed)
            .ok_or_else(|| ServiceError::NotFound(format!("Product {} not found", product_id)))?;

        let stock = inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(found.id))
            .filter(inventory::Column::CategoryId.eq(found.category_id))
            .one(db)
            .await?
            .map(|row| row.quantity)
            .unwrap_or(0);

        Ok(ProductDetails {
            category_name: category.map(|c| c.name).unwrap_or_default(),
            stock,
            in_stock: stock > 0,
            product: found,
        })
    }

    async fn require_category(&self, category_id: Uuid) -> Result<category::Model, ServiceError> {
        category::Entity::find_by_id(category_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Category {} not found", category_id)))
    }
}
