use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use uuid::Uuid;

use super::common::{ok, validate_input, HandlerResult};
use crate::{
    auth::CurrentUser,
    entities::{cart, cart_item, offer},
    services::{
        cart::{AddToCartInput, CartView},
        promotions::{AppliedCoupon, ApplyCouponInput},
    },
    AppState,
};

pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/user/cart", get(view_cart))
        .route("/user/cart/items", get(view_items))
        .route("/user/cart/add/:productid", post(add_item))
        .route("/user/cart/remove/:productid", delete(remove_item))
        .route("/user/cart/coupon", post(apply_coupon))
        .route("/user/cart/offers", get(offer_check))
}

pub async fn add_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<Uuid>,
    Json(input): Json<AddToCartInput>,
) -> HandlerResult<CartView> {
    validate_input(&input)?;
    ok(state.services.cart.add_item(user_id, product_id, input).await?)
}

pub async fn remove_item(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<Uuid>,
) -> HandlerResult<CartView> {
    ok(state.services.cart.remove_item(user_id, product_id).await?)
}

pub async fn view_cart(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<cart::Model> {
    ok(state.services.cart.view_cart(user_id).await?)
}

pub async fn view_items(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<Vec<cart_item::Model>> {
    ok(state.services.cart.view_items(user_id).await?)
}

pub async fn apply_coupon(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(input): Json<ApplyCouponInput>,
) -> HandlerResult<AppliedCoupon> {
    validate_input(&input)?;
    ok(state.services.promotions.apply_coupon(user_id, input).await?)
}

/// Offers the current cart total qualifies for
pub async fn offer_check(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<Vec<offer::Model>> {
    ok(state.services.promotions.offer_check(user_id).await?)
}
