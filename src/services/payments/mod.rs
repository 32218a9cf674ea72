//! Payment gateway clients.
//!
//! Gateways are reached over their HTTP APIs through the [`PaymentGateway`]
//! trait. Amounts are sent in the currency's minor unit (paise, cents).
//! Transient failures (timeouts, transport errors, 429 and 5xx) are retried
//! with exponential backoff; anything else fails immediately.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::{
    config::AppConfig,
    entities::payment_correlation::PaymentProvider,
    errors::ServiceError,
    middleware_helpers::{with_retry, RetryConfig, RetryPolicy},
};

pub mod settlement;
pub mod signatures;

pub use settlement::{PaymentService, RazorpayVerification, WebhookOutcome};

/// Payment settings shared by checkout and settlement
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    /// Public key id handed to the Razorpay checkout page
    pub razorpay_key_id: Option<String>,
    pub razorpay_key_secret: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub webhook_tolerance_secs: u64,
}

impl PaymentSettings {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            currency: config.currency.clone(),
            razorpay_key_id: config.razorpay_key_id.clone(),
            razorpay_key_secret: config.razorpay_key_secret.clone(),
            stripe_webhook_secret: config.stripe_webhook_secret.clone(),
            webhook_tolerance_secs: config.payment_webhook_tolerance_secs,
        }
    }
}

/// Request to open a payment at a gateway
#[derive(Debug, Clone, Serialize)]
pub struct GatewayPaymentRequest {
    /// Local order id the payment will settle
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// Whole currency units
    pub amount: i64,
    pub currency: String,
}

impl GatewayPaymentRequest {
    pub fn minor_units(&self) -> i64 {
        self.amount.saturating_mul(100)
    }
}

/// Payment opened at a gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayPayment {
    /// Gateway order id (Razorpay) or payment intent id (Stripe)
    pub external_id: String,
    /// Minor units as reported by the gateway
    pub amount: i64,
    pub currency: String,
    /// Secret the browser needs to confirm a Stripe intent
    pub client_secret: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected gateway response: {0}")]
    Decode(String),
    #[error("{0} payments are not configured")]
    NotConfigured(PaymentProvider),
}

impl GatewayError {
    fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Transport(err.to_string())
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Timeout | GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status == 429 || *status >= 500,
            GatewayError::Decode(_) | GatewayError::NotConfigured(_) => false,
        }
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NotConfigured(provider) => {
                ServiceError::BadRequest(format!("{} payments are not available", provider))
            }
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TransientGatewayError;

impl RetryPolicy<GatewayError> for TransientGatewayError {
    fn is_retryable(&self, error: &GatewayError) -> bool {
        error.is_transient()
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError>;
}

/// Gateway retry schedule taken from configuration
pub fn gateway_retry_config(config: &AppConfig) -> RetryConfig {
    RetryConfig {
        max_attempts: config.gateway_max_attempts,
        initial_delay: Duration::from_millis(config.gateway_retry_delay_ms),
        max_delay: Duration::from_secs(10),
        backoff_factor: 2.0,
    }
}

fn http_client(timeout: Duration) -> Result<reqwest::Client, GatewayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::Transport(e.to_string()))
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Serialize)]
struct RazorpayOrderRequest<'a> {
    amount: i64,
    currency: &'a str,
    receipt: String,
}

#[derive(Debug, Deserialize)]
struct RazorpayOrder {
    id: String,
    amount: i64,
    currency: String,
}

/// Razorpay Orders API client
pub struct RazorpayGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    retry: RetryConfig,
}

impl RazorpayGateway {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            retry,
        })
    }

    async fn create_order_once(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let body = RazorpayOrderRequest {
            amount: request.minor_units(),
            currency: &request.currency,
            receipt: request.order_id.to_string(),
        };

        let response = self
            .client
            .post(format!("{}/v1/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&body)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let order: RazorpayOrder = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(GatewayPayment {
            external_id: order.id,
            amount: order.amount,
            currency: order.currency,
            client_secret: None,
        })
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Razorpay
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let payment = with_retry(&self.retry, TransientGatewayError, || {
            self.create_order_once(request)
        })
        .await?;
        debug!(external_id = %payment.external_id, "Razorpay order created");
        Ok(payment)
    }
}

#[derive(Debug, Deserialize)]
struct StripePaymentIntent {
    id: String,
    amount: i64,
    currency: String,
    client_secret: Option<String>,
}

/// Stripe Payment Intents API client
pub struct StripeGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    retry: RetryConfig,
}

impl StripeGateway {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
        retry: RetryConfig,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            retry,
        })
    }

    async fn create_intent_once(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let params = [
            ("amount", request.minor_units().to_string()),
            ("currency", request.currency.to_lowercase()),
            ("metadata[order_id]", request.order_id.to_string()),
            ("metadata[user_id]", request.user_id.to_string()),
        ];

        let response = self
            .client
            .post(format!("{}/v1/payment_intents", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .header("Idempotency-Key", request.order_id.to_string())
            .form(&params)
            .send()
            .await
            .map_err(GatewayError::from_reqwest)?;

        let intent: StripePaymentIntent = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;

        Ok(GatewayPayment {
            external_id: intent.id,
            amount: intent.amount,
            currency: intent.currency,
            client_secret: intent.client_secret,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_payment(
        &self,
        request: &GatewayPaymentRequest,
    ) -> Result<GatewayPayment, GatewayError> {
        let payment = with_retry(&self.retry, TransientGatewayError, || {
            self.create_intent_once(request)
        })
        .await?;
        debug!(external_id = %payment.external_id, "Stripe payment intent created");
        Ok(payment)
    }
}

/// The gateways this deployment has credentials for
#[derive(Clone, Default)]
pub struct PaymentGateways {
    razorpay: Option<Arc<dyn PaymentGateway>>,
    stripe: Option<Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        let timeout = Duration::from_secs(config.gateway_timeout_secs);
        let retry = gateway_retry_config(config);
        let mut gateways = Self::default();

        if let (Some(key_id), Some(key_secret)) =
            (&config.razorpay_key_id, &config.razorpay_key_secret)
        {
            gateways = gateways.with_gateway(Arc::new(RazorpayGateway::new(
                config.razorpay_base_url.as_str(),
                key_id.as_str(),
                key_secret.as_str(),
                timeout,
                retry.clone(),
            )?));
        }
        if let Some(secret_key) = &config.stripe_secret_key {
            gateways = gateways.with_gateway(Arc::new(StripeGateway::new(
                config.stripe_base_url.as_str(),
                secret_key.as_str(),
                timeout,
                retry,
            )?));
        }
        Ok(gateways)
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        match gateway.provider() {
            PaymentProvider::Razorpay => self.razorpay = Some(gateway),
            PaymentProvider::Stripe => self.stripe = Some(gateway),
        }
        self
    }

    pub fn get(&self, provider: PaymentProvider) -> Result<Arc<dyn PaymentGateway>, GatewayError> {
        let found = match provider {
            PaymentProvider::Razorpay => self.razorpay.clone(),
            PaymentProvider::Stripe => self.stripe.clone(),
        };
        found.ok_or(GatewayError::NotConfigured(provider))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(GatewayError::Timeout, true)]
    #[test_case(GatewayError::Transport("reset".into()), true)]
    #[test_case(GatewayError::Status { status: 503, body: String::new() }, true)]
    #[test_case(GatewayError::Status { status: 429, body: String::new() }, true)]
    #[test_case(GatewayError::Status { status: 400, body: String::new() }, false)]
    #[test_case(GatewayError::Decode("eof".into()), false)]
    fn transient_classification(err: GatewayError, transient: bool) {
        assert_eq!(err.is_transient(), transient);
    }

    #[test]
    fn gateway_failures_surface_as_bad_gateway() {
        let err: ServiceError = GatewayError::Timeout.into();
        assert_eq!(err.status_code(), axum::http::StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn missing_gateway_is_reported() {
        let gateways = PaymentGateways::default();
        assert!(matches!(
            gateways.get(PaymentProvider::Stripe),
            Err(GatewayError::NotConfigured(PaymentProvider::Stripe))
        ));
    }
}
