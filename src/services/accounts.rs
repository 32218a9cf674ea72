use crate::{
    auth::{hash_password, verify_password},
    entities::{admin, user, user_address},
    errors::ServiceError,
    events::{Event, EventSender},
    services::Paged,
};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

static PHONE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\+?[0-9]{10,15}$").expect("valid regex"));
static PIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9A-Za-z]{4,10}$").expect("valid regex"));

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignupInput {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(email(message = "invalid email address"))]
    pub email: String,
    #[validate(regex(path = "PHONE_RE", message = "phone must be 10 to 15 digits"))]
    pub phone: String,
    #[validate(length(min = 8, max = 128, message = "password must be 8 to 128 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginInput {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AddressInput {
    #[validate(length(min = 3, max = 300))]
    pub address: String,
    #[validate(length(min = 2, max = 100))]
    pub state: String,
    #[validate(length(min = 2, max = 100))]
    pub country: String,
    #[validate(regex(path = "PIN_RE", message = "invalid pin code"))]
    pub pin: String,
    #[validate(regex(path = "PHONE_RE", message = "contact must be 10 to 15 digits"))]
    pub contact: String,
    #[validate(length(min = 1, max = 20))]
    pub address_type: String,
}

/// Public view of a user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub wallet: i64,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}

impl From<user::Model> for UserProfile {
    fn from(model: user::Model) -> Self {
        Self {
            id: model.id,
            name: model.name,
            email: model.email,
            phone: model.phone,
            wallet: model.wallet,
            is_blocked: model.is_blocked,
            created_at: model.created_at,
        }
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// User and admin accounts
#[derive(Clone)]
pub struct AccountService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl AccountService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn signup(&self, input: SignupInput) -> Result<UserProfile, ServiceError> {
        input.validate()?;
        let db = &*self.db;
        let email = normalize_email(&input.email);

        let taken = user::Entity::find()
            .filter(
                Condition::any()
                    .add(user::Column::Email.eq(email.as_str()))
                    .add(user::Column::Phone.eq(input.phone.as_str())),
            )
            .one(db)
            .await?;
        if taken.is_some() {
            return Err(ServiceError::Conflict(
                "Email or phone is already registered".to_string(),
            ));
        }

        let password_hash = hash_password(&input.password)?;
        let now = Utc::now();
        let created = user::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(input.name.trim().to_string()),
            email: Set(email),
            phone: Set(input.phone),
            password_hash: Set(password_hash),
            is_blocked: Set(false),
            wallet: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(db)
        .await
        .map_err(|e| {
            if crate::db::is_unique_violation(&e) {
                ServiceError::Conflict("Email or phone is already registered".to_string())
            } else {
                ServiceError::DatabaseError(e)
            }
        })?;

        info!(user_id = %created.id, "User registered");
        self.event_sender
            .send_or_log(Event::UserRegistered(created.id))
            .await;
        Ok(created.into())
    }

    /// Checks credentials; blocked accounts cannot sign in
    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn login(&self, input: LoginInput) -> Result<user::Model, ServiceError> {
        input.validate()?;
        let found = user::Entity::find()
            .filter(user::Column::Email.eq(normalize_email(&input.email)))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid email or password".to_string()))?;

        if !verify_password(&input.password, &found.password_hash)? {
            return Err(ServiceError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }
        if found.is_blocked {
            warn!(user_id = %found.id, "Blocked user attempted to sign in");
            return Err(ServiceError::Unauthorized("Account is blocked".to_string()));
        }
        Ok(found)
    }

    pub async fn profile(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        self.find_user(user_id).await.map(UserProfile::from)
    }

    pub async fn wallet(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        self.find_user(user_id).await.map(|u| u.wallet)
    }

    #[instrument(skip(self, input))]
    pub async fn add_address(
        &self,
        user_id: Uuid,
        input: AddressInput,
    ) -> Result<user_address::Model, ServiceError> {
        input.validate()?;
        self.find_user(user_id).await?;

        Ok(user_address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            address: Set(input.address),
            state: Set(input.state),
            country: Set(input.country),
            pin: Set(input.pin),
            contact: Set(input.contact),
            address_type: Set(input.address_type),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await?)
    }

    pub async fn list_addresses(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<user_address::Model>, ServiceError> {
        Ok(user_address::Entity::find()
            .filter(user_address::Column::UserId.eq(user_id))
            .order_by_asc(user_address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    #[instrument(skip(self, input), fields(email = %input.email))]
    pub async fn admin_login(&self, input: LoginInput) -> Result<admin::Model, ServiceError> {
        input.validate()?;
        let found = admin::Entity::find()
            .filter(admin::Column::Email.eq(normalize_email(&input.email)))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid email or password".to_string()))?;

        if !verify_password(&input.password, &found.password_hash)? {
            return Err(ServiceError::Unauthorized(
                "Invalid email or password".to_string(),
            ));
        }
        Ok(found)
    }

    /// Creates the configured admin account unless it already exists
    pub async fn ensure_admin(
        &self,
        email: &str,
        password: &str,
    ) -> Result<admin::Model, ServiceError> {
        let db = &*self.db;
        let email = normalize_email(email);
        if let Some(existing) = admin::Entity::find()
            .filter(admin::Column::Email.eq(email.as_str()))
            .one(db)
            .await?
        {
            return Ok(existing);
        }

        let created = admin::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set("Administrator".to_string()),
            email: Set(email),
            password_hash: Set(hash_password(password)?),
            created_at: Set(Utc::now()),
        }
        .insert(db)
        .await?;
        info!(admin_id = %created.id, "Bootstrap admin created");
        Ok(created)
    }

    pub async fn list_users(&self, page: u64, per_page: u64) -> Result<Paged<UserProfile>, ServiceError> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let paginator = user::Entity::find()
            .order_by_desc(user::Column::CreatedAt)
            .paginate(&*self.db, per_page);
        let total = paginator.num_items().await?;
        let items = paginator
            .fetch_page(page - 1)
            .await?
            .into_iter()
            .map(UserProfile::from)
            .collect();

        Ok(Paged {
            items,
            page,
            per_page,
            total,
        })
    }

    /// Blocks an active user or unblocks a blocked one
    #[instrument(skip(self))]
    pub async fn toggle_block(&self, user_id: Uuid) -> Result<UserProfile, ServiceError> {
        let found = self.find_user(user_id).await?;
        let blocked = !found.is_blocked;

        let mut active: user::ActiveModel = found.into();
        active.is_blocked = Set(blocked);
        active.updated_at = Set(Utc::now());
        let updated = active.update(&*self.db).await?;

        info!(%user_id, blocked, "User block status changed");
        self.event_sender
            .send_or_log(Event::UserBlockToggled { user_id, blocked })
            .await;
        Ok(updated.into())
    }

    async fn find_user(&self, user_id: Uuid) -> Result<user::Model, ServiceError> {
        user::Entity::find_by_id(user_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("User {} not found", user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("9876543210", true)]
    #[case("+919876543210", true)]
    #[case("12345", false)]
    #[case("98765abc10", false)]
    fn phone_format(#[case] phone: &str, #[case] ok: bool) {
        let input = SignupInput {
            name: "Asha".into(),
            email: "asha@example.com".into(),
            phone: phone.into(),
            password: "longenough".into(),
        };
        assert_eq!(input.validate().is_ok(), ok);
    }

    #[test]
    fn email_is_normalized() {
        assert_eq!(normalize_email("  Asha@Example.COM "), "asha@example.com");
    }
}
