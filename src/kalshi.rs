// src/kalshi.rs
// Kalshi REST client, request signing, and the exchange seam

use anyhow::{Context, Result};
use arrayvec::ArrayString;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use governor::{clock::DefaultClock, middleware::NoOpMiddleware, state::NotKeyed, Quota, RateLimiter};
use pkcs1::DecodeRsaPrivateKey;
use reqwest::Method;
use rsa::{
    pkcs8::DecodePrivateKey,
    pss::SigningKey,
    sha2::Sha256,
    signature::{RandomizedSigner, SignatureEncoding},
    RsaPrivateKey,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt::Write;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::config::{KALSHI_API_BASE, KALSHI_RATE_LIMIT_PER_SEC, KALSHI_SIGN_PREFIX};
use crate::error::{ExchangeError, ExchangeResult};
use crate::types::{
    Cents, KalshiBalanceResponse, KalshiEventsResponse, KalshiFill, KalshiFillsResponse,
    KalshiMarketsResponse, KalshiMilestone, KalshiPosition, KalshiPositionsResponse, KalshiSeries,
    KalshiSeriesResponse, PriceCents, Side,
};

// === Order Types ===

#[derive(Debug, Clone, Serialize)]
pub struct KalshiOrderRequest<'a> {
    pub ticker: Cow<'a, str>,
    pub action: &'static str,
    pub side: &'static str,
    #[serde(rename = "type")]
    pub order_type: &'static str,
    pub count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_price: Option<i64>,
    pub client_order_id: Cow<'a, str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiration_ts: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<&'static str>,
}

impl<'a> KalshiOrderRequest<'a> {
    /// Create a resting (good-till-canceled) limit buy
    pub fn resting_buy(ticker: Cow<'a, str>, side: Side, price_cents: PriceCents, count: i64, client_order_id: Cow<'a, str>) -> Self {
        let price = price_cents as i64;
        let (yes_price, no_price) = match side {
            Side::Yes => (Some(price), None),
            Side::No => (None, Some(price)),
        };

        Self {
            ticker,
            action: "buy",
            side: side.as_str(),
            order_type: "limit",
            count,
            yes_price,
            no_price,
            client_order_id,
            expiration_ts: None,
            time_in_force: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct KalshiOrderResponse {
    pub order: KalshiOrderDetails,
}

#[derive(Debug, Deserialize)]
struct KalshiOrdersResponse {
    #[serde(default)]
    orders: Vec<KalshiOrderDetails>,
    #[serde(default)]
    cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct KalshiOrderDetails {
    pub order_id: String,
    pub ticker: String,
    pub status: String,        // "resting", "canceled", "executed", "pending", "expired"
    #[serde(default)]
    pub client_order_id: Option<String>,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub yes_price: Option<i64>,
    #[serde(default)]
    pub no_price: Option<i64>,
    #[serde(default)]
    pub created_time: Option<String>,
    #[serde(default)]
    pub initial_count: Option<i64>,
    #[serde(default)]
    pub remaining_count: Option<i64>,
    #[serde(default)]
    pub fill_count: Option<i64>,
    #[serde(default)]
    pub taker_fill_count: Option<i64>,
    #[serde(default)]
    pub maker_fill_count: Option<i64>,
    #[serde(default)]
    pub taker_fill_cost: Option<i64>,
    #[serde(default)]
    pub maker_fill_cost: Option<i64>,
}

impl KalshiOrderDetails {
    /// Total filled contracts
    pub fn filled_count(&self) -> i64 {
        self.fill_count
            .unwrap_or_else(|| self.taker_fill_count.unwrap_or(0) + self.maker_fill_count.unwrap_or(0))
    }

    /// Total cost of filled contracts in cents, if the exchange reported it
    pub fn fill_cost(&self) -> Option<Cents> {
        let cost = self.taker_fill_cost.unwrap_or(0) + self.maker_fill_cost.unwrap_or(0);
        (cost > 0).then_some(cost)
    }

    /// Fully filled. Canceled orders also report zero remaining, so only the status counts.
    pub fn is_filled(&self) -> bool {
        self.status == "executed"
    }

    pub fn is_resting(&self) -> bool {
        self.status == "resting" || self.status == "pending"
    }

    /// Limit price on the side the order trades
    pub fn price(&self) -> Option<PriceCents> {
        let raw = if self.side == "yes" { self.yes_price } else { self.no_price };
        raw.and_then(crate::types::valid_price)
    }
}

// === Kalshi Auth Config ===

/// Signed request envelope
#[derive(Debug, Clone)]
pub struct AuthHeaders {
    pub key: String,
    pub signature: String,
    pub timestamp: String,
}

pub struct KalshiConfig {
    pub api_key_id: String,
    private_key: RsaPrivateKey,
}

impl KalshiConfig {
    pub fn new(api_key_id: impl Into<String>, private_key: RsaPrivateKey) -> Self {
        Self { api_key_id: api_key_id.into(), private_key }
    }

    /// Parse a PKCS#1 ("BEGIN RSA PRIVATE KEY") or PKCS#8 ("BEGIN PRIVATE KEY") PEM
    pub fn from_pem(api_key_id: impl Into<String>, pem: &str) -> Result<Self> {
        let pem = pem.trim();
        let private_key = RsaPrivateKey::from_pkcs1_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs8_pem(pem))
            .context("Failed to parse private key PEM")?;
        Ok(Self::new(api_key_id, private_key))
    }

    pub fn from_env() -> Result<Self> {
        let api_key_id = std::env::var("KALSHI_API_KEY_ID").context("KALSHI_API_KEY_ID not set")?;

        // Raw PEM in the environment (cloud deploys) wins over a key file
        if let Ok(raw) = std::env::var("KALSHI_PRIVATE_KEY") {
            if !raw.trim().is_empty() {
                return Self::from_pem(api_key_id, &raw.replace("\\n", "\n"));
            }
        }

        let key_path = std::env::var("KALSHI_PRIVATE_KEY_PATH")
            .unwrap_or_else(|_| "kalshi_private_key.txt".to_string());
        let private_key_pem = std::fs::read_to_string(&key_path)
            .with_context(|| format!("Failed to read private key from {}", key_path))?;
        Self::from_pem(api_key_id, &private_key_pem)
    }

    /// RSA-PSS/SHA-256 signature of `message`, base64 encoded
    pub fn sign(&self, message: &str) -> Result<String> {
        let signing_key = SigningKey::<Sha256>::new(self.private_key.clone());
        let signature = signing_key
            .try_sign_with_rng(&mut rand::thread_rng(), message.as_bytes())
            .map_err(|e| anyhow::anyhow!("RSA-PSS signing failed: {}", e))?;
        Ok(BASE64.encode(signature.to_bytes()))
    }

    /// Sign `{timestamp_ms}{METHOD}{path}`. The path is the full API path
    /// without query string; the timestamp must be fresh for every request.
    pub fn sign_request(&self, method: &str, path: &str, timestamp_ms: i64) -> Result<AuthHeaders> {
        let path = path.split('?').next().unwrap_or(path);
        let message = format!("{}{}{}", timestamp_ms, method.to_ascii_uppercase(), path);
        debug!("[KALSHI] Signing {} {}", method, path);
        let signature = self.sign(&message)?;
        Ok(AuthHeaders {
            key: self.api_key_id.clone(),
            signature,
            timestamp: timestamp_ms.to_string(),
        })
    }
}

// === Exchange Seam ===

/// Every exchange operation the bot consumes. All calls are bounded in time and
/// never retried by the implementation.
#[allow(async_fn_in_trait)]
pub trait Exchange {
    async fn get_series(&self) -> ExchangeResult<Vec<KalshiSeries>>;

    /// One page of open markets for a series
    async fn get_markets(&self, series_ticker: &str, cursor: Option<&str>) -> ExchangeResult<KalshiMarketsResponse>;

    /// Milestones attached to the series' events
    async fn get_milestones(&self, series_ticker: &str) -> ExchangeResult<Vec<KalshiMilestone>>;

    /// Available balance in cents
    async fn get_balance(&self) -> ExchangeResult<Cents>;

    async fn get_positions(&self) -> ExchangeResult<Vec<KalshiPosition>>;

    async fn get_fills(&self, min_ts: DateTime<Utc>) -> ExchangeResult<Vec<KalshiFill>>;

    /// Orders currently resting on the book
    async fn get_open_orders(&self) -> ExchangeResult<Vec<KalshiOrderDetails>>;

    async fn get_order(&self, order_id: &str) -> ExchangeResult<KalshiOrderDetails>;

    async fn create_order(&self, order: &KalshiOrderRequest<'_>) -> ExchangeResult<KalshiOrderDetails>;

    /// Cancel a resting order; returns its final state
    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<KalshiOrderDetails>;
}

// === Kalshi REST API Client ===

/// Timeout for reads
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for order requests (shorter than general API timeout)
const ORDER_TIMEOUT: Duration = Duration::from_secs(5);

/// Page size for list endpoints
const PAGE_LIMIT: u32 = 200;

/// Upper bound on pages fetched per list call
const MAX_PAGES: usize = 10;

/// Global order counter for unique client_order_id generation
static ORDER_COUNTER: AtomicU32 = AtomicU32::new(0);

type KalshiRateLimiter = RateLimiter<NotKeyed, governor::state::InMemoryState, DefaultClock, NoOpMiddleware>;

pub struct KalshiApiClient {
    http: reqwest::Client,
    base_url: String,
    config: KalshiConfig,
    limiter: KalshiRateLimiter,
}

impl KalshiApiClient {
    pub fn new(config: KalshiConfig) -> Result<Self> {
        Self::with_base_url(config, KALSHI_API_BASE)
    }

    pub fn with_base_url(config: KalshiConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(READ_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        let quota = Quota::per_second(NonZeroU32::new(KALSHI_RATE_LIMIT_PER_SEC).unwrap_or(NonZeroU32::MIN));

        Ok(Self {
            http,
            base_url: base_url.into(),
            config,
            limiter: RateLimiter::direct(quota),
        })
    }

    #[inline]
    pub fn next_client_order_id() -> ArrayString<24> {
        let counter = ORDER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let ts = Utc::now().timestamp();
        let mut buf = ArrayString::<24>::new();
        let _ = write!(&mut buf, "mb{}{}", ts, counter);
        buf
    }

    /// Signed, rate-limited request. No retries: a failure is returned to the caller
    /// and the operation is reconsidered on the next cycle.
    async fn request<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
        timeout: Duration,
    ) -> ExchangeResult<T> {
        self.limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        // Signature covers the full path including the /trade-api/v2 prefix
        let full_path = format!("{}{}", KALSHI_SIGN_PREFIX, path);
        let auth = self.config
            .sign_request(method.as_str(), &full_path, Utc::now().timestamp_millis())
            .map_err(|e| ExchangeError::Auth(e.to_string()))?;

        let mut req = self.http
            .request(method, &url)
            .header("KALSHI-ACCESS-KEY", &auth.key)
            .header("KALSHI-ACCESS-SIGNATURE", &auth.signature)
            .header("KALSHI-ACCESS-TIMESTAMP", &auth.timestamp)
            .timeout(timeout);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let text = resp.text().await?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ExchangeError::Auth(format!("{}: {}", status, text)));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            debug!("[KALSHI] Rate limited on {}", path);
            return Err(ExchangeError::RateLimited);
        }
        if !status.is_success() {
            return Err(ExchangeError::Rejected { status: status.as_u16(), body: text });
        }

        Ok(serde_json::from_str(&text)?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> ExchangeResult<T> {
        self.request::<T, ()>(Method::GET, path, query, None, READ_TIMEOUT).await
    }
}

impl Exchange for KalshiApiClient {
    async fn get_series(&self) -> ExchangeResult<Vec<KalshiSeries>> {
        let resp: KalshiSeriesResponse = self.get("/series", &[]).await?;
        Ok(resp.series)
    }

    async fn get_markets(&self, series_ticker: &str, cursor: Option<&str>) -> ExchangeResult<KalshiMarketsResponse> {
        let mut query = vec![
            ("series_ticker", series_ticker.to_string()),
            ("status", "open".to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        self.get("/markets", &query).await
    }

    async fn get_milestones(&self, series_ticker: &str) -> ExchangeResult<Vec<KalshiMilestone>> {
        let query = [
            ("series_ticker", series_ticker.to_string()),
            ("limit", "100".to_string()),
            ("with_milestones", "true".to_string()),
        ];
        let resp: KalshiEventsResponse = self.get("/events", &query).await?;
        Ok(resp.milestones)
    }

    async fn get_balance(&self) -> ExchangeResult<Cents> {
        let resp: KalshiBalanceResponse = self.get("/portfolio/balance", &[]).await?;
        Ok(resp.balance)
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<KalshiPosition>> {
        let mut positions = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("limit", PAGE_LIMIT.to_string()),
                ("count_filter", "position".to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let resp: KalshiPositionsResponse = self.get("/portfolio/positions", &query).await?;
            let done = resp.market_positions.is_empty();
            positions.extend(resp.market_positions);
            cursor = resp.cursor.filter(|c| !c.is_empty());
            if done || cursor.is_none() {
                break;
            }
        }
        Ok(positions)
    }

    async fn get_fills(&self, min_ts: DateTime<Utc>) -> ExchangeResult<Vec<KalshiFill>> {
        let mut fills = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("limit", PAGE_LIMIT.to_string()),
                ("min_ts", min_ts.timestamp().to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let resp: KalshiFillsResponse = self.get("/portfolio/fills", &query).await?;
            let done = resp.fills.is_empty();
            fills.extend(resp.fills);
            cursor = resp.cursor.filter(|c| !c.is_empty());
            if done || cursor.is_none() {
                break;
            }
        }
        Ok(fills)
    }

    async fn get_open_orders(&self) -> ExchangeResult<Vec<KalshiOrderDetails>> {
        let mut orders = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_PAGES {
            let mut query = vec![
                ("limit", PAGE_LIMIT.to_string()),
                ("status", "resting".to_string()),
            ];
            if let Some(c) = &cursor {
                query.push(("cursor", c.clone()));
            }
            let resp: KalshiOrdersResponse = self.get("/portfolio/orders", &query).await?;
            let done = resp.orders.is_empty();
            orders.extend(resp.orders);
            cursor = resp.cursor.filter(|c| !c.is_empty());
            if done || cursor.is_none() {
                break;
            }
        }
        Ok(orders)
    }

    async fn get_order(&self, order_id: &str) -> ExchangeResult<KalshiOrderDetails> {
        let path = format!("/portfolio/orders/{}", order_id);
        let resp: KalshiOrderResponse = self.get(&path, &[]).await?;
        Ok(resp.order)
    }

    async fn create_order(&self, order: &KalshiOrderRequest<'_>) -> ExchangeResult<KalshiOrderDetails> {
        debug!("[KALSHI] BUY {} {} @{}¢ x{}",
               order.side, order.ticker, order.no_price.or(order.yes_price).unwrap_or(0), order.count);
        let resp: KalshiOrderResponse = self
            .request(Method::POST, "/portfolio/orders", &[], Some(order), ORDER_TIMEOUT)
            .await?;
        debug!("[KALSHI] {} filled={}", resp.order.status, resp.order.filled_count());
        Ok(resp.order)
    }

    async fn cancel_order(&self, order_id: &str) -> ExchangeResult<KalshiOrderDetails> {
        let path = format!("/portfolio/orders/{}", order_id);
        let resp: KalshiOrderResponse = self
            .request::<_, ()>(Method::DELETE, &path, &[], None, ORDER_TIMEOUT)
            .await?;
        debug!("[KALSHI] Canceled {} filled={}", order_id, resp.order.filled_count());
        Ok(resp.order)
    }
}
