// src/policy.rs
// Per-category entry rules: timing window and NO price band

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::config::DEFAULT_CATEGORY;
use crate::types::{CategoryKey, PriceCents};

/// How the entry window is anchored to the event's start time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimingMode {
    /// Enter in the window leading up to the start
    BeforeEvent,
    /// Enter while the event is live
    AfterStart,
    /// Price-only rule, no milestone needed
    Anytime,
}

fn default_enabled() -> bool {
    true
}

/// Entry rule for one category. Window bounds are in minutes relative to the
/// event start; prices are NO prices in cents, both bounds inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub category: String,
    pub timing: TimingMode,
    #[serde(default)]
    pub window_lower_mins: i64,
    #[serde(default)]
    pub window_upper_mins: i64,
    pub price_lower: PriceCents,
    pub price_upper: PriceCents,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Series ticker substrings that select this category
    #[serde(default)]
    pub match_tokens: Vec<String>,
}

impl PolicyRule {
    #[inline]
    pub fn window_lower(&self) -> Duration {
        Duration::minutes(self.window_lower_mins)
    }

    #[inline]
    pub fn window_upper(&self) -> Duration {
        Duration::minutes(self.window_upper_mins)
    }

    pub fn is_time_gated(&self) -> bool {
        self.timing != TimingMode::Anytime
    }

    /// `elapsed` is now minus event start (negative before the start).
    /// BeforeEvent admits [-upper, -lower], AfterStart admits [lower, upper].
    pub fn admits_elapsed(&self, elapsed: Duration) -> bool {
        match self.timing {
            TimingMode::BeforeEvent => {
                elapsed >= -self.window_upper() && elapsed <= -self.window_lower()
            }
            TimingMode::AfterStart => {
                elapsed >= self.window_lower() && elapsed <= self.window_upper()
            }
            TimingMode::Anytime => true,
        }
    }

    #[inline]
    pub fn admits_price(&self, price: PriceCents) -> bool {
        price >= self.price_lower && price <= self.price_upper
    }

    pub fn matches_series(&self, series_ticker: &str) -> bool {
        let upper = series_ticker.to_ascii_uppercase();
        self.match_tokens.iter().any(|t| upper.contains(t.to_ascii_uppercase().as_str()))
    }

    fn validate(&self) -> std::result::Result<(), PolicyError> {
        if self.window_lower_mins < 0 || self.window_upper_mins < 0 {
            return Err(PolicyError::NegativeWindow { category: self.category.clone() });
        }
        if self.window_lower_mins > self.window_upper_mins {
            return Err(PolicyError::InvertedWindow {
                category: self.category.clone(),
                lower: self.window_lower_mins,
                upper: self.window_upper_mins,
            });
        }
        if self.price_lower < 1 || self.price_upper > 99 || self.price_lower > self.price_upper {
            return Err(PolicyError::PriceBounds {
                category: self.category.clone(),
                lower: self.price_lower,
                upper: self.price_upper,
            });
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PolicyError {
    #[error("{category}: window bounds must not be negative")]
    NegativeWindow { category: String },

    #[error("{category}: window lower {lower}m exceeds upper {upper}m")]
    InvertedWindow { category: String, lower: i64, upper: i64 },

    #[error("{category}: price bounds {lower}-{upper} outside 1-99 or inverted")]
    PriceBounds { category: String, lower: PriceCents, upper: PriceCents },

    #[error("duplicate category {0}")]
    DuplicateCategory(String),
}

/// Validated, ordered rule set. Rule order decides which category a series
/// falls into when several match tokens apply.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    rules: Vec<PolicyRule>,
}

impl PolicyTable {
    pub fn new(rules: Vec<PolicyRule>) -> std::result::Result<Self, PolicyError> {
        for (i, rule) in rules.iter().enumerate() {
            rule.validate()?;
            if rules[..i].iter().any(|r| r.category == rule.category) {
                return Err(PolicyError::DuplicateCategory(rule.category.clone()));
            }
        }
        Ok(Self { rules })
    }

    /// Load a JSON array of rules
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read policy file {:?}", path.as_ref()))?;
        let rules: Vec<PolicyRule> = serde_json::from_str(&contents)
            .context("Failed to parse policy file")?;
        let table = Self::new(rules).context("Invalid policy table")?;
        info!("[POLICY] Loaded {} rules from {:?}", table.rules.len(), path.as_ref());
        Ok(table)
    }

    pub fn rule_for(&self, category: &str) -> Option<&PolicyRule> {
        self.rules.iter().find(|r| r.category == category)
    }

    /// Category of a series: first rule whose token appears in the ticker
    pub fn category_for(&self, series_ticker: &str) -> CategoryKey {
        self.rules
            .iter()
            .find(|r| r.matches_series(series_ticker))
            .map(|r| Arc::from(r.category.as_str()))
            .unwrap_or_else(|| Arc::from(DEFAULT_CATEGORY))
    }

    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }
}

/// Built-in rules
/// - trump: 0-24h before the event, NO 5-30c
/// - ncaa: live, 0-2h after start, NO 5-25c
/// - default: 0-90m before the event, NO 5-30c
pub fn default_policy_table() -> PolicyTable {
    PolicyTable {
        rules: vec![
            PolicyRule {
                category: "trump".into(),
                timing: TimingMode::BeforeEvent,
                window_lower_mins: 0,
                window_upper_mins: 24 * 60,
                price_lower: 5,
                price_upper: 30,
                enabled: true,
                match_tokens: vec!["TRUMPMENTION".into()],
            },
            PolicyRule {
                category: "ncaa".into(),
                timing: TimingMode::AfterStart,
                window_lower_mins: 0,
                window_upper_mins: 2 * 60,
                price_lower: 5,
                price_upper: 25,
                enabled: true,
                match_tokens: vec!["NCAAMENTION".into(), "NCAABMENTION".into()],
            },
            PolicyRule {
                category: DEFAULT_CATEGORY.into(),
                timing: TimingMode::BeforeEvent,
                window_lower_mins: 0,
                window_upper_mins: 90,
                price_lower: 5,
                price_upper: 30,
                enabled: true,
                match_tokens: Vec::new(),
            },
        ],
    }
}
