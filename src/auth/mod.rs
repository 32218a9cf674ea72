//! # Authentication and Authorization Module
//!
//! Sessions are HS256 JWTs carried in the `Authorise` cookie, with an
//! `Authorization: Bearer` header accepted as a fallback. The token's role
//! claim resolves to a [`Principal`]; `/user/*` routes require a user
//! principal whose account is not blocked, `/admin/*` routes an admin one.

use axum::{
    async_trait,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::AppConfig, entities::user, errors::ServiceError};

pub mod password;

pub use password::{hash_password, verify_password};

/// Name of the session cookie
pub const AUTH_COOKIE: &str = "Authorise";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Claim structure for JWT tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,     // Subject (user or admin ID)
    pub contact: String, // Email used to sign in
    pub role: Role,
    pub jti: String, // JWT ID
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
}

/// The authenticated caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User(Uuid),
    Admin(Uuid),
}

impl Principal {
    pub fn id(&self) -> Uuid {
        match self {
            Principal::User(id) | Principal::Admin(id) => *id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::User(_) => Role::User,
            Principal::Admin(_) => Role::Admin,
        }
    }
}

/// Authentication configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub token_ttl: Duration,
}

impl AuthConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            jwt_issuer: config.auth_issuer.clone(),
            jwt_audience: config.auth_audience.clone(),
            token_ttl: Duration::from_secs(config.jwt_expiration as u64),
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Token creation failed: {0}")]
    TokenCreation(String),

    #[error("Account is blocked")]
    Blocked,

    #[error("Insufficient permissions")]
    InsufficientPermissions,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuth
            | AuthError::InvalidCredentials
            | AuthError::InvalidToken
            | AuthError::TokenExpired => ServiceError::Unauthorized(err.to_string()),
            AuthError::Blocked | AuthError::InsufficientPermissions => {
                ServiceError::Forbidden(err.to_string())
            }
            AuthError::DatabaseError(e) => ServiceError::DatabaseError(e),
            AuthError::TokenCreation(msg) | AuthError::InternalError(msg) => {
                ServiceError::InternalError(msg)
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        ServiceError::from(self).into_response()
    }
}

/// Issues and validates session tokens
#[derive(Clone)]
pub struct AuthService {
    config: AuthConfig,
    db: Arc<DatabaseConnection>,
}

impl AuthService {
    pub fn new(config: AuthConfig, db: Arc<DatabaseConnection>) -> Self {
        Self { config, db }
    }

    pub fn token_ttl(&self) -> Duration {
        self.config.token_ttl
    }

    /// Signs a token for `principal`
    pub fn issue_token(&self, principal: Principal, contact: &str) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let ttl = i64::try_from(self.config.token_ttl.as_secs())
            .map_err(|_| AuthError::InternalError("Invalid token duration".to_string()))?;

        let claims = Claims {
            sub: principal.id().to_string(),
            contact: contact.to_string(),
            role: principal.role(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + ttl,
            iss: self.config.jwt_issuer.clone(),
            aud: self.config.jwt_audience.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::TokenCreation(e.to_string()))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);
        validation.set_audience(&[self.config.jwt_audience.as_str()]);

        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
            _ => AuthError::InvalidToken,
        })?;

        Ok(data.claims)
    }

    pub fn principal_from_claims(claims: &Claims) -> Result<Principal, AuthError> {
        let id = Uuid::parse_str(&claims.sub).map_err(|_| AuthError::InvalidToken)?;
        Ok(match claims.role {
            Role::User => Principal::User(id),
            Role::Admin => Principal::Admin(id),
        })
    }

    /// `Set-Cookie` value carrying a fresh session token
    pub fn session_cookie(&self, token: &str) -> String {
        format!(
            "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
            AUTH_COOKIE,
            token,
            self.config.token_ttl.as_secs()
        )
    }

    /// `Set-Cookie` value that expires the session
    pub fn clear_cookie() -> String {
        format!("{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0", AUTH_COOKIE)
    }

    /// Resolves the caller from the request headers
    pub fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = extract_token(headers).ok_or(AuthError::MissingAuth)?;
        let claims = self.validate_token(&token)?;
        Self::principal_from_claims(&claims)
    }

    /// Rejects users that were deleted or blocked after their token was issued
    async fn ensure_user_active(&self, user_id: Uuid) -> Result<(), AuthError> {
        let found = user::Entity::find_by_id(user_id).one(&*self.db).await?;
        match found {
            Some(u) if u.is_blocked => Err(AuthError::Blocked),
            Some(_) => Ok(()),
            None => Err(AuthError::InvalidToken),
        }
    }
}

/// Reads the session token from the `Authorise` cookie, falling back to a bearer header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == AUTH_COOKIE && !value.is_empty()).then(|| value.to_string())
        })
        .next();

    from_cookie.or_else(|| {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

fn auth_service(request: &Request) -> Result<Arc<AuthService>, AuthError> {
    request
        .extensions()
        .get::<Arc<AuthService>>()
        .cloned()
        .ok_or_else(|| AuthError::InternalError("Authentication service not available".into()))
}

/// Requires a user principal whose account is not blocked
pub async fn user_auth_middleware(mut request: Request, next: Next) -> Response {
    let service = auth_service(&request);
    let headers = request.headers().clone();
    let result: Result<Principal, AuthError> = async move {
        let service = service?;
        match service.authenticate(&headers)? {
            Principal::User(id) => {
                service.ensure_user_active(id).await?;
                Ok(Principal::User(id))
            }
            Principal::Admin(_) => Err(AuthError::InsufficientPermissions),
        }
    }
    .await;

    match result {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            debug!(error = %e, "user authentication rejected");
            e.into_response()
        }
    }
}

/// Requires an admin principal
pub async fn admin_auth_middleware(mut request: Request, next: Next) -> Response {
    let result = auth_service(&request).and_then(|service| {
        match service.authenticate(request.headers())? {
            Principal::Admin(id) => Ok(Principal::Admin(id)),
            Principal::User(id) => {
                warn!(user_id = %id, "user token used on admin route");
                Err(AuthError::InsufficientPermissions)
            }
        }
    });

    match result {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    }
}

/// Authenticated user id, available behind [`AuthRouterExt::with_user`]
#[derive(Debug, Clone, Copy)]
pub struct CurrentUser(pub Uuid);

/// Authenticated admin id, available behind [`AuthRouterExt::with_admin`]
#[derive(Debug, Clone, Copy)]
pub struct CurrentAdmin(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(Principal::User(id)) => Ok(CurrentUser(*id)),
            Some(Principal::Admin(_)) => Err(AuthError::InsufficientPermissions),
            None => Err(AuthError::MissingAuth),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CurrentAdmin
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match parts.extensions.get::<Principal>() {
            Some(Principal::Admin(id)) => Ok(CurrentAdmin(*id)),
            Some(Principal::User(_)) => Err(AuthError::InsufficientPermissions),
            None => Err(AuthError::MissingAuth),
        }
    }
}

/// Extension methods for Router to add auth middleware
pub trait AuthRouterExt {
    fn with_user(self) -> Self;
    fn with_admin(self) -> Self;
}

impl<S> AuthRouterExt for axum::Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn with_user(self) -> Self {
        self.layer(axum::middleware::from_fn(user_auth_middleware))
    }

    fn with_admin(self) -> Self {
        self.layer(axum::middleware::from_fn(admin_auth_middleware))
    }
}
