use crate::{
    entities::{inventory, product},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInventoryInput {
    pub product_id: Uuid,
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SetStockInput {
    #[validate(range(min = 0, message = "stock cannot be negative"))]
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockLevel {
    pub product_id: Uuid,
    pub category_id: Uuid,
    pub quantity: i32,
}

impl From<inventory::Model> for StockLevel {
    fn from(model: inventory::Model) -> Self {
        Self {
            product_id: model.product_id,
            category_id: model.category_id,
            quantity: model.quantity,
        }
    }
}

/// Atomically takes `quantity` units out of stock.
///
/// The conditional update never lets stock go negative. When it matches no
/// row the ledger is re-read to report why. Returns the remaining stock.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    category_id: Uuid,
    quantity: i32,
) -> Result<i32, ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::ValidationError(
            "quantity must be at least 1".to_string(),
        ));
    }

    let result = inventory::Entity::update_many()
        .col_expr(
            inventory::Column::Quantity,
            Expr::col(inventory::Column::Quantity).sub(quantity),
        )
        .col_expr(inventory::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory::Column::ProductId.eq(product_id))
        .filter(inventory::Column::CategoryId.eq(category_id))
        .filter(inventory::Column::Quantity.gte(quantity))
        .exec(conn)
        .await?;

    let row = find_row(conn, product_id, category_id).await?;
    if result.rows_affected > 0 {
        return Ok(row.quantity);
    }

    if row.quantity <= 0 {
        Err(ServiceError::OutOfStock { product_id })
    } else {
        Err(ServiceError::InsufficientStock {
            product_id,
            requested: quantity,
            available: row.quantity,
        })
    }
}

/// Puts `quantity` units back, used when an order is cancelled.
///
/// Order lines keep the category they were sold under, so the row is found
/// by product alone; a product has a single stock row.
pub async fn restock<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = inventory::Entity::update_many()
        .col_expr(
            inventory::Column::Quantity,
            Expr::col(inventory::Column::Quantity).add(quantity),
        )
        .col_expr(inventory::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(inventory::Column::ProductId.eq(product_id))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "Inventory for product {} not found",
            product_id
        )));
    }
    Ok(())
}

async fn find_row<C: ConnectionTrait>(
    conn: &C,
    product_id: Uuid,
    category_id: Uuid,
) -> Result<inventory::Model, ServiceError> {
    inventory::Entity::find()
        .filter(inventory::Column::ProductId.eq(product_id))
        .filter(inventory::Column::CategoryId.eq(category_id))
        .one(conn)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Inventory for product {} not found", product_id))
        })
}

/// Stock ledger administration
#[derive(Clone)]
pub struct InventoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl InventoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates the ledger row for a product
    #[instrument(skip(self))]
    pub async fn create_inventory(
        &self,
        input: CreateInventoryInput,
    ) -> Result<StockLevel, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let product = product::Entity::find_by_id(input.product_id)
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Product {} not found", input.product_id))
            })?;

        let existing = inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(product.id))
            .one(db)
            .await?;
        if existing.is_some() {
            return Err(ServiceError::Conflict(format!(
                "Inventory for product {} already exists",
                product.id
            )));
        }

        let row = inventory::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(product.id),
            category_id: Set(product.category_id),
            quantity: Set(input.quantity),
            updated_at: Set(Utc::now()),
        }
        .insert(db)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict(format!(
                    "Inventory for product {} already exists",
                    product.id
                ))
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(product_id = %product.id, quantity = row.quantity, "Inventory created");
        self.event_sender
            .send_or_log(Event::StockChanged {
                product_id: row.product_id,
                quantity: row.quantity,
            })
            .await;
        Ok(row.into())
    }

    /// Overwrites the stock count of a product
    #[instrument(skip(self))]
    pub async fn set_stock(
        &self,
        product_id: Uuid,
        input: SetStockInput,
    ) -> Result<StockLevel, ServiceError> {
        input.validate()?;
        let db = &*self.db;

        let row = inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .one(db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory for product {} not found", product_id))
            })?;

        let mut active: inventory::ActiveModel = row.into();
        active.quantity = Set(input.quantity);
        active.updated_at = Set(Utc::now());
        let row = active.update(db).await?;

        if row.quantity == 0 {
            warn!(%product_id, "Product is now out of stock");
        }
        self.event_sender
            .send_or_log(Event::StockChanged {
                product_id,
                quantity: row.quantity,
            })
            .await;
        Ok(row.into())
    }

    pub async fn stock(&self, product_id: Uuid) -> Result<StockLevel, ServiceError> {
        inventory::Entity::find()
            .filter(inventory::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
            .map(StockLevel::from)
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Inventory for product {} not found", product_id))
            })
    }
}
