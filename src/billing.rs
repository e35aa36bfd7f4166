//! Usage hand-off and prepaid top-ups.
//!
//! Every relayed request ends in a [`UsageRecord`] handed to a [`UsageSink`].
//! Top-ups open a pending order and a Stripe checkout page; the webhook marks
//! the order paid and credits the user's quota exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{GatewayError, Result};
use crate::logging::RelayLog;
use crate::registry::Mode;
use crate::translate::usage::UsageRecord;

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

// ---------------------------------------------------------------------------
// Usage
// ---------------------------------------------------------------------------

/// Receives the usage of every completed relay.
pub trait UsageSink: Send + Sync {
    fn record(&self, model: &str, mode: Mode, usage: &UsageRecord);
}

/// Writes usage to tracing and, when present, to the relay log.
#[derive(Debug, Clone, Default)]
pub struct LogUsageSink {
    relay_log: Option<RelayLog>,
}

impl LogUsageSink {
    pub fn new(relay_log: Option<RelayLog>) -> Self {
        Self { relay_log }
    }
}

impl UsageSink for LogUsageSink {
    fn record(&self, model: &str, mode: Mode, usage: &UsageRecord) {
        tracing::info!(
            model,
            %mode,
            unit = ?usage.unit(),
            prompt = usage.prompt_units(),
            completion = usage.completion_units(),
            total = usage.total_units(),
            cache_read = ?usage.cache_read_tokens(),
            "usage recorded"
        );
        if let Some(ref log) = self.relay_log {
            log.record_usage(model, usage);
        }
    }
}

// ---------------------------------------------------------------------------
// Orders and quota
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopUpOrder {
    pub trade_no: String,
    pub user_id: i64,
    pub amount: i64,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl TopUpOrder {
    /// A fresh pending order with a `stripe_<uuid>` trade number.
    pub fn pending(user_id: i64, amount: i64) -> Self {
        Self {
            trade_no: format!("stripe_{}", uuid::Uuid::new_v4()),
            user_id,
            amount,
            status: OrderStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait TopUpStore: Send + Sync {
    async fn insert(&self, order: TopUpOrder) -> Result<()>;
    async fn get(&self, trade_no: &str) -> Result<Option<TopUpOrder>>;
    /// Move a pending order to paid. Returns `false` when it was already paid,
    /// so concurrent redeliveries see exactly one `true`.
    async fn mark_paid(&self, trade_no: &str) -> Result<bool>;
}

#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn credit(&self, user_id: i64, amount: i64) -> Result<()>;
    async fn balance(&self, user_id: i64) -> Result<i64>;
}

#[derive(Debug, Default)]
pub struct InMemoryTopUpStore {
    orders: Mutex<HashMap<String, TopUpOrder>>,
}

#[async_trait]
impl TopUpStore for InMemoryTopUpStore {
    async fn insert(&self, order: TopUpOrder) -> Result<()> {
        let mut orders = self.orders.lock();
        if orders.contains_key(&order.trade_no) {
            return Err(GatewayError::other(format!("Duplicate trade_no {}", order.trade_no)));
        }
        orders.insert(order.trade_no.clone(), order);
        Ok(())
    }

    async fn get(&self, trade_no: &str) -> Result<Option<TopUpOrder>> {
        Ok(self.orders.lock().get(trade_no).cloned())
    }

    async fn mark_paid(&self, trade_no: &str) -> Result<bool> {
        let mut orders = self.orders.lock();
        match orders.get_mut(trade_no) {
            Some(order) if order.status == OrderStatus::Pending => {
                order.status = OrderStatus::Paid;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(GatewayError::other(format!("Unknown trade_no {}", trade_no))),
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryQuotaLedger {
    balances: Mutex<HashMap<i64, i64>>,
}

#[async_trait]
impl QuotaLedger for InMemoryQuotaLedger {
    async fn credit(&self, user_id: i64, amount: i64) -> Result<()> {
        *self.balances.lock().entry(user_id).or_insert(0) += amount;
        Ok(())
    }

    async fn balance(&self, user_id: i64) -> Result<i64> {
        Ok(self.balances.lock().get(&user_id).copied().unwrap_or(0))
    }
}

// ---------------------------------------------------------------------------
// Stripe
// ---------------------------------------------------------------------------

/// Caller-facing text for a failed checkout-session creation.
pub fn checkout_error_message(code: Option<&str>, message: &str) -> String {
    match code {
        Some("parameter_invalid_empty") => {
            "Payment is misconfigured, please contact the administrator".to_string()
        }
        Some("parameter_invalid_integer") => "Invalid top-up amount".to_string(),
        Some(_) => format!("Payment service temporarily unavailable: {}", message),
        None => "Failed to create payment session".to_string(),
    }
}

/// Check a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) against
/// HMAC-SHA256 of `"{t}.{body}"`.
pub fn verify_signature(header: &str, body: &[u8], secret: &str, tolerance_secs: i64, now: i64) -> Result<()> {
    let mut timestamp: Option<i64> = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| GatewayError::webhook("Signature header has no timestamp"))?;
    if signatures.is_empty() {
        return Err(GatewayError::webhook("Signature header has no v1 signature"));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(GatewayError::webhook("Signature timestamp outside tolerance"));
    }

    for signature in signatures {
        let Ok(expected) = hex::decode(signature) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| GatewayError::webhook(format!("Invalid webhook secret: {}", e)))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(body);
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err(GatewayError::webhook("No signature matches the payload"))
}

/// Header value for `body` signed at `timestamp`. Used by tests and local tooling.
pub fn sign_payload(body: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatewayError::webhook(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes())))
}

// ---------------------------------------------------------------------------
// Checkout
// ---------------------------------------------------------------------------

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// What a checkout provider needs to open a payment page for one order.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub trade_no: String,
    pub amount: i64,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

/// A checkout session the provider refused to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutError {
    /// Provider error code; `None` when the call never got a provider answer.
    pub code: Option<String>,
    pub message: String,
}

#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Returns the URL the payer is sent to.
    async fn create_session(&self, request: &CheckoutSessionRequest) -> std::result::Result<String, CheckoutError>;
}

/// Stripe Checkout over its form-encoded REST API.
pub struct StripeCheckout {
    client: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeCheckout {
    pub fn new(client: reqwest::Client, secret_key: impl Into<String>) -> Self {
        Self {
            client,
            secret_key: secret_key.into(),
            base_url: STRIPE_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorEnvelope {
    #[serde(default)]
    error: StripeErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct StripeErrorBody {
    code: Option<String>,
    #[serde(default)]
    message: String,
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_session(&self, request: &CheckoutSessionRequest) -> std::result::Result<String, CheckoutError> {
        let quantity = request.amount.to_string();
        let form = [
            ("mode", "payment"),
            ("payment_method_types[0]", "card"),
            ("line_items[0][price]", request.price_id.as_str()),
            ("line_items[0][quantity]", quantity.as_str()),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("client_reference_id", request.trade_no.as_str()),
        ];

        let transport = |e: reqwest::Error| CheckoutError {
            code: None,
            message: e.to_string(),
        };
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.bytes().await.map_err(transport)?;
        if !status.is_success() {
            let envelope: StripeErrorEnvelope = serde_json::from_slice(&body).unwrap_or_default();
            return Err(CheckoutError {
                code: envelope.error.code,
                message: envelope.error.message,
            });
        }

        serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("url").and_then(|u| u.as_str()).map(str::to_string))
            .ok_or_else(|| CheckoutError {
                code: None,
                message: "checkout session has no url".to_string(),
            })
    }
}

/// Opens top-up orders: validates the request, stores a pending order and
/// asks the checkout provider for a payment page.
pub struct TopUpRequester {
    store: Arc<dyn TopUpStore>,
    checkout: Option<Arc<dyn CheckoutProvider>>,
    price_id: Option<String>,
    min_amount: i64,
    server_address: String,
}

impl TopUpRequester {
    pub fn new(store: Arc<dyn TopUpStore>, min_amount: i64, server_address: impl Into<String>) -> Self {
        Self {
            store,
            checkout: None,
            price_id: None,
            min_amount,
            server_address: server_address.into(),
        }
    }

    pub fn with_checkout(mut self, checkout: Arc<dyn CheckoutProvider>, price_id: Option<String>) -> Self {
        self.checkout = Some(checkout);
        self.price_id = price_id.filter(|p| !p.trim().is_empty());
        self
    }

    /// Returns the checkout URL, or a message fit to show the payer.
    pub async fn request(&self, user_id: i64, amount: i64) -> std::result::Result<String, String> {
        if amount < self.min_amount {
            return Err(format!("Top-up amount must be at least {}", self.min_amount));
        }
        let Some(ref checkout) = self.checkout else {
            return Err("Stripe secret key is not configured".to_string());
        };
        let Some(ref price_id) = self.price_id else {
            return Err("Stripe price ID is not configured".to_string());
        };

        let order = TopUpOrder::pending(user_id, amount);
        let trade_no = order.trade_no.clone();
        if let Err(e) = self.store.insert(order).await {
            tracing::error!(user_id, amount, error = %e, "failed to store top-up order");
            return Err("Failed to create order".to_string());
        }

        let base = self.server_address.trim_end_matches('/');
        let session = CheckoutSessionRequest {
            trade_no: trade_no.clone(),
            amount,
            price_id: price_id.clone(),
            success_url: format!("{}/topup?trade_no={}", base, trade_no),
            cancel_url: format!("{}/topup", base),
        };
        match checkout.create_session(&session).await {
            Ok(url) => {
                tracing::info!(%trade_no, user_id, amount, "checkout session created");
                Ok(url)
            }
            Err(e) => {
                tracing::warn!(%trade_no, user_id, amount, code = ?e.code, error = %e.message, "checkout session failed");
                Err(checkout_error_message(e.code.as_deref(), &e.message))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    data: WebhookData,
}

#[derive(Debug, Default, Deserialize)]
struct WebhookData {
    #[serde(default)]
    object: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited { trade_no: String, user_id: i64, amount: i64 },
    AlreadyPaid { trade_no: String },
    /// Marked paid but the ledger refused the credit.
    CreditFailed { trade_no: String },
    OrderNotFound { trade_no: String },
    Ignored { event_type: String },
}

pub struct WebhookProcessor {
    secret: String,
    tolerance_secs: i64,
    store: Arc<dyn TopUpStore>,
    ledger: Arc<dyn QuotaLedger>,
}

impl WebhookProcessor {
    pub fn new(
        secret: impl Into<String>,
        tolerance_secs: i64,
        store: Arc<dyn TopUpStore>,
        ledger: Arc<dyn QuotaLedger>,
    ) -> Self {
        Self {
            secret: secret.into(),
            tolerance_secs,
            store,
            ledger,
        }
    }

    pub async fn handle(&self, signature: Option<&str>, body: &[u8]) -> Result<WebhookOutcome> {
        self.handle_at(signature, body, Utc::now().timestamp()).await
    }

    /// Verify and apply one delivery. Errors mean the delivery was rejected
    /// (bad signature or unparsable event); everything else is acknowledged.
    pub async fn handle_at(&self, signature: Option<&str>, body: &[u8], now: i64) -> Result<WebhookOutcome> {
        let signature = signature.ok_or_else(|| GatewayError::webhook("Missing Stripe-Signature header"))?;
        verify_signature(signature, body, &self.secret, self.tolerance_secs, now)?;

        let event: WebhookEvent = serde_json::from_slice(body)
            .map_err(|e| GatewayError::webhook(format!("Invalid event payload: {}", e)))?;
        if event.event_type != CHECKOUT_COMPLETED {
            tracing::debug!(event_type = %event.event_type, "webhook event ignored");
            return Ok(WebhookOutcome::Ignored {
                event_type: event.event_type,
            });
        }

        let trade_no = event
            .data
            .object
            .get("client_reference_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let Some(order) = self.store.get(&trade_no).await? else {
            tracing::warn!(%trade_no, "top-up order not found");
            return Ok(WebhookOutcome::OrderNotFound { trade_no });
        };
        if order.status == OrderStatus::Paid {
            return Ok(WebhookOutcome::AlreadyPaid { trade_no });
        }
        if !self.store.mark_paid(&trade_no).await? {
            return Ok(WebhookOutcome::AlreadyPaid { trade_no });
        }

        match self.ledger.credit(order.user_id, order.amount).await {
            Ok(()) => {
                tracing::info!(%trade_no, user_id = order.user_id, amount = order.amount, "top-up credited");
                Ok(WebhookOutcome::Credited {
                    trade_no,
                    user_id: order.user_id,
                    amount: order.amount,
                })
            }
            Err(e) => {
                tracing::error!(%trade_no, user_id = order.user_id, error = %e, "top-up credit failed");
                Ok(WebhookOutcome::CreditFailed { trade_no })
            }
        }
    }
}
