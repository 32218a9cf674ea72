use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{delete, get, patch, post},
    Json, Router,
};
use tracing::info;
use uuid::Uuid;

use super::{
    common::{created, ok, validate_input, HandlerResult, PaginatedResponse, PaginationParams},
    users::session_response,
};
use crate::{
    auth::{CurrentAdmin, Principal},
    entities::{coupon, offer},
    errors::ApiError,
    services::{
        accounts::{LoginInput, UserProfile},
        promotions::{CreateCouponInput, CreateOfferInput},
    },
    ApiResponse, AppState,
};

/// The only admin route reachable without a session
pub fn admin_login_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/login", post(admin_login))
        .layer(DefaultBodyLimit::max(16 * 1024))
}

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/users", get(list_users))
        .route("/admin/users/:id/block", patch(toggle_block))
        .route("/admin/coupon", post(create_coupon).get(list_coupons))
        .route("/admin/coupon/:id", delete(delete_coupon))
        .route("/admin/offer", post(create_offer).get(list_offers))
}

// POST /admin/login
pub async fn admin_login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<Response, ApiError> {
    validate_input(&input)?;
    let admin = state.services.accounts.admin_login(input).await?;
    info!(admin_id = %admin.id, "Admin signed in");
    session_response(&state.auth, Principal::Admin(admin.id), &admin.email)
}

pub async fn list_users(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Query(params): Query<PaginationParams>,
) -> HandlerResult<PaginatedResponse<UserProfile>> {
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let paged = state.services.accounts.list_users(page, per_page).await?;
    ok(paged.into())
}

// PATCH /admin/users/:id/block
pub async fn toggle_block(
    State(state): State<AppState>,
    CurrentAdmin(admin_id): CurrentAdmin,
    Path(user_id): Path<Uuid>,
) -> HandlerResult<UserProfile> {
    let profile = state.services.accounts.toggle_block(user_id).await?;
    info!(%admin_id, %user_id, blocked = profile.is_blocked, "User block toggled");
    ok(profile)
}

pub async fn create_coupon(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Json(input): Json<CreateCouponInput>,
) -> Result<(StatusCode, Json<ApiResponse<coupon::Model>>), ApiError> {
    validate_input(&input)?;
    created(state.services.promotions.create_coupon(input).await?)
}

pub async fn list_coupons(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
) -> HandlerResult<Vec<coupon::Model>> {
    ok(state.services.promotions.list_coupons().await?)
}

pub async fn delete_coupon(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(coupon_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.services.promotions.delete_coupon(coupon_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn create_offer(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Json(input): Json<CreateOfferInput>,
) -> Result<(StatusCode, Json<ApiResponse<offer::Model>>), ApiError> {
    validate_input(&input)?;
    created(state.services.promotions.create_offer(input).await?)
}

pub async fn list_offers(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
) -> HandlerResult<Vec<offer::Model>> {
    ok(state.services.promotions.list_offers().await?)
}
