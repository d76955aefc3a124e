// src/config.rs
// Configuration constants and runtime settings

use chrono::Duration;
use std::path::PathBuf;

use crate::types::Cents;

/// Kalshi REST API base URL
pub const KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Path prefix covered by the request signature
pub const KALSHI_SIGN_PREFIX: &str = "/trade-api/v2";

/// Kalshi API rate limit (requests per second).
/// Kalshi basic tier allows 20 req/sec; we stay at half that.
pub const KALSHI_RATE_LIMIT_PER_SEC: u32 = 10;

/// Series discovery refresh (seconds)
pub const SERIES_CACHE_TTL_SECS: i64 = 3600;

/// Milestone map refresh per series (seconds)
pub const MILESTONE_CACHE_TTL_SECS: i64 = 600;

/// Category used when no policy rule's token matches a series ticker
pub const DEFAULT_CATEGORY: &str = "default";

/// Title phrases that mark a series as a mention series
pub const MENTION_TITLE_KEYWORDS: &[&str] = &[
    "what will",
    "say during",
    "say at",
    "say on",
    "say in",
    "announcer",
    "commentator",
    "broadcast mention",
];

/// Ticker substrings never traded (weak categories)
pub const DEFAULT_EXCLUDED_TOKENS: &[&str] = &[
    "EARNINGS",
    "FIGHTMENTION",
    "SECPRESS",
    "LEAVITT",
    "NBAMENTION",
    "NBAFINALS",
];

/// Series always scanned, even if discovery misses them
pub const DEFAULT_SEED_SERIES: &[&str] = &[
    // Sports
    "KXNFLMENTION", "KXNCAAMENTION", "KXNCAABMENTION",
    "KXSNFMENTION", "KXTNFMENTION", "KXCFBMENTION", "KXMLBMENTION",
    "KXSBMENTION",
    // Politics
    "KXTRUMPMENTION", "KXTRUMPMENTIONB",
    "KXMAMDANIMENTION", "KXHOCHULMENTION",
    "KXGOVERNORMENTION", "KXVANCEMENTION",
    // Media
    "KXMADDOWMENTION", "KXSNLMENTION", "KXROGANMENTION",
    "KXCOOPERMENTION", "KXCOLBERTMENTION", "KXKIMMELMENTION",
];

/// Runtime settings for the scan loop
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Simulate placement instead of sending orders
    pub dry_run: bool,

    /// Notional per order intent (cents)
    pub bet_cents: Cents,

    /// Maximum exposure per event across all its tickers (cents)
    pub max_event_cents: Cents,

    /// Maximum concurrently open resting orders
    pub max_resting_orders: usize,

    /// Maximum held tickers plus open orders
    pub max_positions: usize,

    /// How long an order may rest before it is canceled
    pub order_rest: Duration,

    /// Per-ticker quiet period after any order action
    pub cooldown: Duration,

    pub scan_interval: std::time::Duration,

    /// No new orders below this balance (cents)
    pub min_balance_cents: Cents,

    pub excluded_tokens: Vec<String>,

    pub seed_series: Vec<String>,

    /// JSON policy table replacing the built-in rules
    pub policy_file: Option<PathBuf>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            bet_cents: 300,
            max_event_cents: 1000,
            max_resting_orders: 10,
            max_positions: 40,
            order_rest: Duration::seconds(600),
            cooldown: Duration::seconds(86_400),
            scan_interval: std::time::Duration::from_secs(120),
            min_balance_cents: 100,
            excluded_tokens: DEFAULT_EXCLUDED_TOKENS.iter().map(|s| s.to_string()).collect(),
            seed_series: DEFAULT_SEED_SERIES.iter().map(|s| s.to_string()).collect(),
            policy_file: None,
        }
    }
}

impl BotConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            dry_run: std::env::var("DRY_RUN")
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),

            bet_cents: env_parse::<f64>("MENTION_BET_DOLLARS")
                .map(dollars_to_cents)
                .unwrap_or(defaults.bet_cents),

            max_event_cents: env_parse::<f64>("MENTION_MAX_EVENT_DOLLARS")
                .map(dollars_to_cents)
                .unwrap_or(defaults.max_event_cents),

            max_resting_orders: env_parse("MENTION_MAX_RESTING_ORDERS")
                .unwrap_or(defaults.max_resting_orders),

            max_positions: env_parse("MENTION_MAX_POSITIONS")
                .unwrap_or(defaults.max_positions),

            order_rest: env_parse("MENTION_ORDER_REST_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.order_rest),

            cooldown: env_parse("MENTION_COOLDOWN_SECS")
                .map(Duration::seconds)
                .unwrap_or(defaults.cooldown),

            // A zero period would make the tick timer panic
            scan_interval: env_parse::<u64>("MENTION_SCAN_INTERVAL_SECS")
                .filter(|secs| *secs > 0)
                .map(std::time::Duration::from_secs)
                .unwrap_or(defaults.scan_interval),

            min_balance_cents: env_parse("MIN_BALANCE_CENTS")
                .unwrap_or(defaults.min_balance_cents),

            excluded_tokens: env_list("MENTION_EXCLUDED_TOKENS")
                .unwrap_or(defaults.excluded_tokens),

            seed_series: env_list("MENTION_SEED_SERIES")
                .unwrap_or(defaults.seed_series),

            policy_file: std::env::var("POLICY_FILE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Comma-separated, upper-cased list; unset or empty keeps the default
fn env_list(key: &str) -> Option<Vec<String>> {
    let raw = std::env::var(key).ok()?;
    let items: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_ascii_uppercase())
        .filter(|s| !s.is_empty())
        .collect();
    (!items.is_empty()).then_some(items)
}

#[inline]
fn dollars_to_cents(dollars: f64) -> Cents {
    (dollars * 100.0).round() as Cents
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BotConfig::default();
        assert_eq!(config.bet_cents, 300);
        assert_eq!(config.max_event_cents, 1000);
        assert_eq!(config.max_resting_orders, 10);
        assert_eq!(config.max_positions, 40);
        assert_eq!(config.order_rest, Duration::minutes(10));
        assert_eq!(config.cooldown, Duration::hours(24));
        assert!(config.excluded_tokens.iter().any(|t| t == "NBAMENTION"));
        assert!(config.seed_series.iter().any(|s| s == "KXTRUMPMENTION"));
    }

    #[test]
    fn test_zero_scan_interval_keeps_default() {
        std::env::set_var("MENTION_SCAN_INTERVAL_SECS", "0");
        let config = BotConfig::from_env();
        std::env::remove_var("MENTION_SCAN_INTERVAL_SECS");
        assert_eq!(config.scan_interval, std::time::Duration::from_secs(120));
    }

    #[test]
    fn test_dollars_to_cents() {
        assert_eq!(dollars_to_cents(3.0), 300);
        assert_eq!(dollars_to_cents(2.5), 250);
    }
}
