// src/types.rs
// Shared data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

// === Prices & Money ===

/// Price in cents (1-99 for 0.01-0.99), 0 = no price available
pub type PriceCents = u16;

/// Dollar amount in cents (exposure, caps, bet sizes)
pub type Cents = i64;

/// Sentinel value for "no price available"
pub const NO_PRICE: PriceCents = 0;

/// Category key into the policy table ("trump", "ncaa", "default", ...)
pub type CategoryKey = Arc<str>;

/// Validate a raw book quote: only 1-99 is a tradable price
#[inline(always)]
pub fn valid_price(raw: i64) -> Option<PriceCents> {
    if (1..=99).contains(&raw) {
        Some(raw as PriceCents)
    } else {
        None
    }
}

/// Parse an RFC3339 exchange timestamp ("2025-10-19T18:00:00Z")
pub fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Event ticker for a market ticker: everything before the last '-'
/// e.g. "KXTRUMPMENTION-25OCT19-TARIFF" -> "KXTRUMPMENTION-25OCT19"
pub fn event_of_ticker(ticker: &str) -> &str {
    ticker.rsplit_once('-').map(|(event, _)| event).unwrap_or(ticker)
}

/// Series ticker for a market ticker: everything before the first '-'
pub fn series_of_ticker(ticker: &str) -> &str {
    ticker.split_once('-').map(|(series, _)| series).unwrap_or(ticker)
}

// === Contract Side ===

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === Market Snapshot ===

/// One open mention market as seen in a single scan cycle.
/// Rebuilt every cycle, never mutated in place.
#[derive(Debug, Clone)]
pub struct Market {
    pub ticker: Arc<str>,
    pub event_ticker: Arc<str>,
    pub series_ticker: Arc<str>,
    pub category: CategoryKey,
    pub title: Arc<str>,
    pub yes_bid: Option<i64>,
    pub yes_ask: Option<i64>,
    pub no_bid: Option<i64>,
    pub no_ask: Option<i64>,
    /// Milestone start time (absent = no reference time for time-gated rules)
    pub event_start: Option<DateTime<Utc>>,
}

impl Market {
    /// Best price to buy NO right now.
    /// Kalshi quotes NO asks directly; when missing, buying NO costs 100 - best YES bid.
    pub fn best_no_ask(&self) -> Option<PriceCents> {
        match self.no_ask {
            Some(ask) => valid_price(ask),
            None => self.yes_bid.and_then(|bid| valid_price(100 - bid)),
        }
    }
}

// === Order Intent ===

/// A decision to buy NO on one ticker. Produced by the filter,
/// consumed exactly once by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub ticker: Arc<str>,
    pub event_ticker: Arc<str>,
    pub category: CategoryKey,
    pub side: Side,
    pub price: PriceCents,
    pub count: i64,
}

impl OrderIntent {
    /// Notional committed by this order if fully filled
    #[inline]
    pub fn cost_cents(&self) -> Cents {
        self.price as Cents * self.count
    }
}

// === Kalshi API Types ===

#[derive(Debug, Deserialize)]
pub struct KalshiSeriesResponse {
    #[serde(default)]
    pub series: Vec<KalshiSeries>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiSeries {
    pub ticker: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiMarketsResponse {
    #[serde(default)]
    pub markets: Vec<KalshiMarket>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiMarket {
    pub ticker: String,
    #[serde(default)]
    pub event_ticker: String,
    #[serde(default)]
    pub title: String,
    pub yes_ask: Option<i64>,
    pub yes_bid: Option<i64>,
    pub no_ask: Option<i64>,
    pub no_bid: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiEventsResponse {
    #[serde(default)]
    pub events: Vec<KalshiEvent>,
    #[serde(default)]
    pub milestones: Vec<KalshiMilestone>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KalshiEvent {
    pub event_ticker: String,
    #[serde(default)]
    pub title: String,
}

/// Real-world event schedule ("Begins in X hours" in the Kalshi UI)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct KalshiMilestone {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub primary_event_tickers: Vec<String>,
    #[serde(default)]
    pub related_event_tickers: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiBalanceResponse {
    /// Cents
    pub balance: Cents,
}

#[derive(Debug, Deserialize)]
pub struct KalshiPositionsResponse {
    #[serde(default)]
    pub market_positions: Vec<KalshiPosition>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KalshiPosition {
    pub ticker: String,
    /// Signed contract count (negative = NO contracts)
    #[serde(default)]
    pub position: i64,
    /// Cost of the position in cents
    #[serde(default)]
    pub market_exposure: Cents,
    #[serde(default)]
    pub last_updated_ts: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct KalshiFillsResponse {
    #[serde(default)]
    pub fills: Vec<KalshiFill>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct KalshiFill {
    pub trade_id: String,
    pub order_id: String,
    pub ticker: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub count: i64,
    #[serde(default)]
    pub yes_price: Option<i64>,
    #[serde(default)]
    pub no_price: Option<i64>,
    #[serde(default)]
    pub created_time: Option<String>,
}

impl KalshiFill {
    /// Cost of this fill in cents, priced on the side that was bought
    pub fn cost_cents(&self) -> Cents {
        let price = if self.side == "yes" { self.yes_price } else { self.no_price };
        price.unwrap_or(0) * self.count
    }
}
