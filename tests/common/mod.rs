#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::{Duration, Utc};
use sea_orm::EntityTrait;
use serde_json::{json, Value};
use storefront_api::{
    config::AppConfig,
    db,
    entities::{
        coupon::{self, CouponType},
        payment_correlation::PaymentProvider,
        product,
    },
    events::{self, EventSender},
    services::{
        catalog::{CategoryInput, ProductInput},
        inventory::CreateInventoryInput,
        payments::{
            GatewayError, GatewayPayment, GatewayPaymentRequest, PaymentGateway, PaymentGateways,
        },
        promotions::CreateCouponInput,
    },
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const RAZORPAY_KEY_ID: &str = "rzp_test_key";
pub const RAZORPAY_SECRET: &str = "rzp_test_secret";
pub const STRIPE_WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const ADMIN_PASSWORD: &str = "admin-password-123";
pub const USER_PASSWORD: &str = "user-password-123";

const JWT_SECRET: &str =
    "integration-tests-only-Qm9yZWFsLXNlY3JldC1mb3ItaW50ZWdyYXRpb24tdGVzdHMtMjAyNg";

static PHONE_SEQ: AtomicU64 = AtomicU64::new(1);

/// Answers gateway calls locally with predictable ids
pub struct StubGateway {
    provider: PaymentProvider,
}

impl StubGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider
    }

    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let external_id = match self.provider {
            PaymentProvider::Razorpay => format!("order_{}", request.order_id.simple()),
            PaymentProvider::Stripe => format!("pi_{}", request.order_id.simple()),
        };
        let client_secret = match self.provider {
            PaymentProvider::Razorpay => None,
            PaymentProvider::Stripe => Some(format!("{}_secret_test", external_id)),
        };
        Ok(GatewayPayment {
            external_id,
            amount: request.minor_units(),
            currency: request.currency.clone(),
            client_secret,
        })
    }
}

/// Application backed by a throwaway SQLite file with stubbed gateways
pub struct TestApp {
    router: Router,
    pub state: AppState,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir for test database");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            JWT_SECRET.to_string(),
            3600,
            "127.0.0.1".to_string(),
            18_080,
            "development".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.razorpay_key_id = Some(RAZORPAY_KEY_ID.to_string());
        cfg.razorpay_key_secret = Some(RAZORPAY_SECRET.to_string());
        cfg.stripe_secret_key = Some("sk_test_stub".to_string());
        cfg.stripe_webhook_secret = Some(STRIPE_WEBHOOK_SECRET.to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx, cfg.low_stock_threshold));

        let gateways = PaymentGateways::default()
            .with_gateway(Arc::new(StubGateway::new(PaymentProvider::Razorpay)))
            .with_gateway(Arc::new(StubGateway::new(PaymentProvider::Stripe)));

        let state = AppState::new(Arc::new(pool), cfg, EventSender::new(event_tx), gateways);
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub async fn send_request(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// JSON request with an optional bearer token
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize json request body"))
            }
            None => Body::empty(),
        };

        self.send_request(builder.body(body).expect("build request")).await
    }

    /// Form-encoded POST, as the Razorpay checkout page sends it
    pub async fn post_form(&self, uri: &str, fields: &[(&str, &str)]) -> Response {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(encoded))
            .expect("build form request");
        self.send_request(request).await
    }

    /// Raw POST with extra headers
    pub async fn post_raw(&self, uri: &str, payload: Vec<u8>, headers: &[(&str, &str)]) -> Response {
        let mut builder = Request::builder().method(Method::POST).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send_request(builder.body(Body::from(payload)).expect("build raw request"))
            .await
    }

    /// Registers a user and signs them in. Returns the user id and token.
    pub async fn signup_and_login(&self, email: &str) -> (Uuid, String) {
        let phone = format!("98{:08}", PHONE_SEQ.fetch_add(1, Ordering::SeqCst));
        let signup = self
            .request(
                Method::POST,
                "/signup",
                Some(json!({
                    "name": "Test Shopper",
                    "email": email,
                    "phone": phone,
                    "password": USER_PASSWORD,
                })),
                None,
            )
            .await;
        assert_eq!(signup.status(), StatusCode::CREATED, "signup should succeed");
        let body = response_json(signup).await;
        let user_id = Uuid::parse_str(body["data"]["id"].as_str().expect("user id"))
            .expect("user id is a uuid");

        let token = self.login("/login", email, USER_PASSWORD).await;
        (user_id, token)
    }

    pub async fn login(&self, uri: &str, email: &str, password: &str) -> String {
        let response = self
            .request(
                Method::POST,
                uri,
                Some(json!({ "email": email, "password": password })),
                None,
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK, "login should succeed");
        let body = response_json(response).await;
        body["data"]["token"]
            .as_str()
            .expect("session token")
            .to_string()
    }

    /// Provisions the admin account and returns an admin session token
    pub async fn admin_token(&self) -> String {
        self.state
            .services
            .accounts
            .ensure_admin(ADMIN_EMAIL, ADMIN_PASSWORD)
            .await
            .expect("provision admin");
        self.login("/admin/login", ADMIN_EMAIL, ADMIN_PASSWORD).await
    }

    /// Creates a category, a product in it and its stock row
    pub async fn seed_product(&self, name: &str, price: i64, stock: i32) -> product::Model {
        let category = self
            .state
            .services
            .catalog
            .create_category(CategoryInput {
                name: format!("{} category", name),
                description: String::new(),
            })
            .await
            .expect("seed category");

        let product = self
            .state
            .services
            .catalog
            .create_product(ProductInput {
                name: name.to_string(),
                description: "Seeded for integration tests".to_string(),
                specification: String::new(),
                price,
                size: "M".to_string(),
                category_id: category.id,
                image_url: None,
            })
            .await
            .expect("seed product");

        self.state
            .services
            .inventory
            .create_inventory(CreateInventoryInput {
                product_id: product.id,
                quantity: stock,
            })
            .await
            .expect("seed inventory");

        product
    }

    pub async fn seed_coupon(&self, code: &str, discount_type: CouponType, amount: i64) -> coupon::Model {
        self.seed_coupon_with(CreateCouponInput {
            code: code.to_string(),
            discount_type,
            amount,
            usage_limit: 100,
            valid_from: Utc::now() - Duration::days(1),
            valid_until: Utc::now() + Duration::days(30),
        })
        .await
    }

    pub async fn seed_coupon_with(&self, input: CreateCouponInput) -> coupon::Model {
        self.state
            .services
            .promotions
            .create_coupon(input)
            .await
            .expect("seed coupon")
    }

    pub async fn apply_coupon(&self, token: &str, code: &str) -> Response {
        self.request(
            Method::POST,
            "/user/cart/coupon",
            Some(json!({ "code": code })),
            Some(token),
        )
        .await
    }

    pub async fn coupon_used_count(&self, coupon_id: Uuid) -> i32 {
        coupon::Entity::find_by_id(coupon_id)
            .one(&*self.state.db)
            .await
            .expect("coupon lookup")
            .expect("coupon exists")
            .used_count
    }

    pub async fn add_address(&self, token: &str) -> Uuid {
        let response = self
            .request(
                Method::POST,
                "/user/address",
                Some(json!({
                    "address": "12 Market Road",
                    "state": "Kerala",
                    "country": "India",
                    "pin": "682001",
                    "contact": "9876543210",
                    "address_type": "home",
                })),
                Some(token),
            )
            .await;
        assert_eq!(response.status(), StatusCode::CREATED, "address should be created");
        let body = response_json(response).await;
        Uuid::parse_str(body["data"]["id"].as_str().expect("address id")).expect("uuid")
    }

    pub async fn add_to_cart(&self, token: &str, product_id: Uuid, quantity: i32) -> Response {
        self.request(
            Method::POST,
            &format!("/user/cart/add/{}", product_id),
            Some(json!({ "quantity": quantity })),
            Some(token),
        )
        .await
    }

    pub async fn place_order(&self, token: &str, address_id: Uuid, payment: &str) -> Response {
        self.request(
            Method::POST,
            &format!("/user/order/place/{}/{}", address_id, payment),
            None,
            Some(token),
        )
        .await
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .inventory
            .stock(product_id)
            .await
            .expect("stock level")
            .quantity
    }

    pub async fn wallet_of(&self, token: &str) -> i64 {
        let response = self
            .request(Method::GET, "/user/wallet", None, Some(token))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_json(response).await["data"]["balance"]
            .as_i64()
            .expect("wallet balance")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
