//! Sign-up, sign-in and the account endpoints under `/user`.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use super::common::{created, ok, validate_input, HandlerResult};
use crate::{
    auth::{AuthService, CurrentUser, Principal},
    entities::{coupon, user_address, wishlist},
    errors::{ApiError, ServiceError},
    services::accounts::{AddressInput, LoginInput, SignupInput, UserProfile},
    ApiResponse, AppState,
};

const AUTH_BODY_LIMIT: usize = 16 * 1024;

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Serialize)]
pub struct WalletResponse {
    pub balance: i64,
}

/// Public sign-up, login and logout
pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .layer(DefaultBodyLimit::max(AUTH_BODY_LIMIT))
}

/// Account routes; callers must wrap them in the user guard
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/profile", get(profile))
        .route("/user/wallet", get(wallet))
        .route("/user/address", post(add_address).get(list_addresses))
        .route("/user/coupons", get(available_coupons))
        .route("/user/wishlist", get(list_wishlist))
        .route(
            "/user/wishlist/:productid",
            post(add_to_wishlist).delete(remove_from_wishlist),
        )
}

/// Builds the login response: the token in the body and in the session cookie
pub(crate) fn session_response(
    auth: &AuthService,
    principal: Principal,
    contact: &str,
) -> Result<Response, ApiError> {
    let token = auth
        .issue_token(principal, contact)
        .map_err(ServiceError::from)?;
    let cookie = HeaderValue::from_str(&auth.session_cookie(&token))
        .map_err(|e| ServiceError::InternalError(format!("invalid session cookie: {}", e)))?;

    let mut headers = HeaderMap::new();
    headers.insert(header::SET_COOKIE, cookie);
    let body = ApiResponse::success(SessionResponse {
        token,
        expires_in: auth.token_ttl().as_secs(),
    });
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}

// POST /signup
pub async fn signup(
    State(state): State<AppState>,
    Json(input): Json<SignupInput>,
) -> Result<(StatusCode, Json<ApiResponse<UserProfile>>), ApiError> {
    validate_input(&input)?;
    let profile = state.services.accounts.signup(input).await?;
    created(profile)
}

// POST /login
pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginInput>,
) -> Result<Response, ApiError> {
    validate_input(&input)?;
    let user = state.services.accounts.login(input).await?;
    info!(user_id = %user.id, "User signed in");
    session_response(&state.auth, Principal::User(user.id), &user.email)
}

// POST /logout
pub async fn logout() -> Response {
    let mut headers = HeaderMap::new();
    if let Ok(cookie) = HeaderValue::from_str(&AuthService::clear_cookie()) {
        headers.insert(header::SET_COOKIE, cookie);
    }
    let body = ApiResponse::<()>::message("Signed out");
    (StatusCode::OK, headers, Json(body)).into_response()
}

pub async fn profile(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<UserProfile> {
    ok(state.services.accounts.profile(user_id).await?)
}

pub async fn wallet(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<WalletResponse> {
    let balance = state.services.accounts.wallet(user_id).await?;
    ok(WalletResponse { balance })
}

pub async fn add_address(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Json(input): Json<AddressInput>,
) -> Result<(StatusCode, Json<ApiResponse<user_address::Model>>), ApiError> {
    validate_input(&input)?;
    created(state.services.accounts.add_address(user_id, input).await?)
}

pub async fn list_addresses(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<Vec<user_address::Model>> {
    ok(state.services.accounts.list_addresses(user_id).await?)
}

pub async fn available_coupons(
    State(state): State<AppState>,
    CurrentUser(_): CurrentUser,
) -> HandlerResult<Vec<coupon::Model>> {
    ok(state.services.promotions.available_coupons().await?)
}

pub async fn add_to_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApiResponse<wishlist::Model>>), ApiError> {
    created(state.services.wishlist.add(user_id, product_id).await?)
}

pub async fn list_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
) -> HandlerResult<Vec<wishlist::Model>> {
    ok(state.services.wishlist.list(user_id).await?)
}

pub async fn remove_from_wishlist(
    State(state): State<AppState>,
    CurrentUser(user_id): CurrentUser,
    Path(product_id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.services.wishlist.remove(user_id, product_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

