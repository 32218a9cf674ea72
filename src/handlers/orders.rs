use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use std::str::FromStr;
use uuid::Uuid;

use super::common::{created, ok, HandlerResult, PaginatedResponse, PaginationParams};
use crate::{
    auth::{CurrentAdmin, CurrentUser},
    entities::{
        invoice,
        order::{self, OrderStatus, PaymentMethod},
    },
    errors::{ApiError, ServiceError},
    services::orders::{OrderDetails, PlacedOrder, UpdateStatusInput},
    ApiResponse, AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct AdminOrderQuery {
    pub status: Option<OrderStatus>,
    pub page: Option<u64>,
    pub per_page: Option<u64>,
}

fn parse_payment_method(value: &str) -> Result<PaymentMethod, ServiceError> {
    PaymentMethod::from_str(&value.to_ascii_lowercase()).map_err(|_| {
        ServiceError::ValidationError(format!(
            "unknown payment method {:?}, expected cod, razorpay, stripe or wallet",
            value
        ))
    })
}

pub fn user_order_routes() -> Router<AppState> {
    Router::new()
        .route("/user/order/place/:addressid/:payment", post(place_order))
        .route("/user/order/history", get(order_history))
        .route("/user/order/cancel/:orderid", patch(cancel_order))
        .route("/user/order/:orderid", get(order_details))
        .route("/user/order/:orderid/invoice", get(order_invoice))
}

pub fn admin_order_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/order", get(admin_list_orders))
        .route("/admin/order/:orderid", get(admin_order_details))
        .route("/admin/order/update/:orderid", patch(update_status))
        .route("/admin/order/cancel/:orderid", patch(admin_cancel_order))
}

// POST /user/order/place/:addressid/:payment
pub async fn place_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path((address_id, payment)): Path<(Uuid, String)>,
) -> Result<(StatusCode, Json<ApiResponse<PlacedOrder>>), ApiError> {
    let method = parse_payment_method(&payment)?;
    let placed = state
        .services
        .orders
        .place_order(user_id, address_id, method)
        .await?;
    created(placed)
}

pub async fn order_history(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<PaginationParams>,
) -> HandlerResult<PaginatedResponse<order::Model>> {
    let (page, per_page) = params.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let paged = state.services.orders.history(user_id, page, per_page).await?;
    ok(paged.into())
}

pub async fn order_details(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> HandlerResult<OrderDetails> {
    ok(state
        .services
        .orders
        .order_details(Some(user_id), order_id)
        .await?)
}

pub async fn order_invoice(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> HandlerResult<invoice::Model> {
    ok(state.services.orders.invoice(user_id, order_id).await?)
}

// PATCH /user/order/cancel/:orderid
pub async fn cancel_order(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(order_id): Path<Uuid>,
) -> HandlerResult<order::Model> {
    ok(state.services.orders.cancel_order(user_id, order_id).await?)
}

pub async fn admin_list_orders(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Query(query): Query<AdminOrderQuery>,
) -> HandlerResult<PaginatedResponse<order::Model>> {
    let pagination = PaginationParams {
        page: query.page,
        per_page: query.per_page,
    };
    let (page, per_page) = pagination.resolve(
        state.config.api_default_page_size,
        state.config.api_max_page_size,
    );
    let paged = state
        .services
        .orders
        .admin_list(query.status, page, per_page)
        .await?;
    ok(paged.into())
}

pub async fn admin_order_details(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(order_id): Path<Uuid>,
) -> HandlerResult<OrderDetails> {
    ok(state.services.orders.order_details(None, order_id).await?)
}

// PATCH /admin/order/update/:orderid
pub async fn update_status(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(order_id): Path<Uuid>,
    Json(input): Json<UpdateStatusInput>,
) -> HandlerResult<order::Model> {
    ok(state
        .services
        .orders
        .update_status(order_id, input.status)
        .await?)
}

pub async fn admin_cancel_order(
    State(state): State<AppState>,
    CurrentAdmin(_): CurrentAdmin,
    Path(order_id): Path<Uuid>,
) -> HandlerResult<order::Model> {
    ok(state.services.orders.admin_cancel_order(order_id).await?)
}
