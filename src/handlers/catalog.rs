//! Product, category and stock endpoints, public and admin.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::common::{created, ok, validate_input, HandlerResult, PaginatedResponse, PaginationParams};
use crate::{
    auth::CurrentAdmin,
    entities::{category, product},
    errors::ApiError,
    services::{
        catalog::{CategoryInput, ProductDetails, ProductFilter, ProductInput},
        inventory::{CreateInventoryInput, SetStockInput, StockLevel},
        promotions::PercentOfferInput,
    },
    ApiResponse, AppState,
};

/// Query string of `GET /products`
#[derive(Debug, Default, Deserialize)]
pub struct ProductQuery {
    pub search: Option<String>,
    pub category: Option<Uuid>,
    pub min_price: Option<i64>,
    pub max_price: Option<i64>,
    pub size: Option<String>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

impl ProductQuery {
    fn split(self) -> (ProductFilter, PaginationParams) {
        (
            ProductFilter {
                search: self.search,
                category: self.category,
                min_price: self.min_price,
                max_price: self.max_price,
                size: self.size,
            },
            PaginationParams {
                page: self.page,
                per_page: self.per_page,
            },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct CategoryOfferResult {
    pub category_id: Uuid,
    pub products_updated: u64,
}

pub fn public_catalog_routes() -> Router<AppState> {
    Router::new()
        .route("/products", get(list_products))
        .route("/products/:id", get(product_details))
        .route("/categories", get(list_categories))
}

pub fn admin_catalog_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/admin/category",
            post(create_category).get(admin_list_categories),
        )
        .route(
            "/admin/category/:id",
            put(update_category).delete(delete_category),
        )
        .route("/admin/category/:id/offer", post(apply_category_offer))
        .route("/admin/product", post(create_product).get(admin_list_products))
        .route("/admin/product/:id", put(update_product).get(admin_product_details))
        .route("/admin/product/:id/remove", patch(toggle_removed))
        .route("/admin/product/:id/offer", post(apply_product_offer))
        .route("/admin/inventory", post(create_inventory))
        .route("/admin/inventory/:productid", put(set_stock).get(stock_level))
}

pub async fn list_products(
    State(state): State<AppState>,
    Query(query): Query<ProductQuery>,
) -> HandlerResult<PaginatedResponse<product::Model>> {
    let (filter, pagination) = query.split();
    let (page, per_page) = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let paged = state
        .services
        .catalog
        .list_products(filter, false, page, per_page)
        .await?;
    ok(paged.into())
}

pub async fn product_details(
    State(state): State<AppState>,
    Path(product_id): Path<Uuid>,
) -> HandlerResult<ProductDetails> {
    ok(state
        .services
        .catalog
        .product_details(product_id, false)
        .await?)
}

pub async fn list_categories(State(state): State<AppState>) -> HandlerResult<Vec<category::Model>> {
    ok(state.services.catalog.list_categories().await?)
}

pub async fn admin_list_categories(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
) -> HandlerResult<Vec<category::Model>> {
    ok(state.services.catalog.list_categories().await?)
}

pub async fn create_category(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Json(input): Json<CategoryInput>,
) -> Result<(StatusCode, Json<ApiResponse<category::Model>>), ApiError> {
    validate_input(&input)?;
    created(state.services.catalog.create_category(input).await?)
}

pub async fn update_category(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(category_id): Path<Uuid>,
    Json(input): Json<CategoryInput>,
) -> HandlerResult<category::Model> {
    validate_input(&input)?;
    ok(state
        .services
        .catalog
        .update_category(category_id, input)
        .await?)
}

pub async fn delete_category(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(category_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.services.catalog.delete_category(category_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_product(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Json(input): Json<ProductInput>,
) -> Result<(StatusCode, Json<ApiResponse<product::Model>>), ApiError> {
    validate_input(&input)?;
    created(state.services.catalog.create_product(input).await?)
}

pub async fn update_product(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
    Json(input): Json<ProductInput>,
) -> HandlerResult<product::Model> {
    validate_input(&input)?;
    ok(state
        .services
        .catalog
        .update_product(product_id, input)
        .await?)
}

/// Admin listing includes soft-removed products
pub async fn admin_list_products(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Query(query): Query<ProductQuery>,
) -> HandlerResult<PaginatedResponse<product::Model>> {
    let (filter, pagination) = query.split();
    let (page, per_page) = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let paged = state
        .services
        .catalog
        .list_products(filter, true, page, per_page)
        .await?;
    ok(paged.into())
}

pub async fn admin_product_details(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
) -> HandlerResult<ProductDetails> {
    ok(state
        .services
        .catalog
        .product_details(product_id, true)
        .await?)
}

// PATCH /admin/product/:id/remove
pub async fn toggle_removed(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
) -> HandlerResult<product::Model> {
    ok(state.services.catalog.toggle_removed(product_id).await?)
}

pub async fn apply_product_offer(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
    Json(input): Json<PercentOfferInput>,
) -> HandlerResult<product::Model> {
    validate_input(&input)?;
    ok(state
        .services
        .promotions
        .apply_product_offer(product_id, input)
        .await?)
}

pub async fn apply_category_offer(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(category_id): Path<Uuid>,
    Json(input): Json<PercentOfferInput>,
) -> HandlerResult<CategoryOfferResult> {
    validate_input(&input)?;
    let products_updated = state
        .services
        .promotions
        .apply_category_offer(category_id, input)
        .await?;
    ok(CategoryOfferResult {
        category_id,
        products_updated,
    })
}

pub async fn create_inventory(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Json(input): Json<CreateInventoryInput>,
) -> Result<(StatusCode, Json<ApiResponse<StockLevel>>), ApiError> {
    validate_input(&input)?;
    created(state.services.inventory.create_inventory(input).await?)
}

// PUT /admin/inventory/:productid
pub async fn set_stock(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
    Json(input): Json<SetStockInput>,
) -> HandlerResult<StockLevel> {
    validate_input(&input)?;
    ok(state.services.inventory.set_stock(product_id, input).await?)
}

pub async fn stock_level(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(product_id): Path<Uuid>,
) -> HandlerResult<StockLevel> {
    ok(state.services.inventory.stock(product_id).await?)
}
