// src/filter.rs
// Eligibility filter - turns market snapshots into order intents or rejections

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BotConfig;
use crate::ledger::Ledger;
use crate::lifecycle::OpenOrderSummary;
use crate::policy::PolicyTable;
use crate::types::{Cents, Market, OrderIntent, Side};

/// Why a market was not admitted. Checks run in declaration order and the
/// first failing check is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RejectReason {
    Excluded,
    Disabled,
    NoMilestone,
    OutsideWindow,
    NoPrice,
    PriceOutOfRange,
    OpenOrder,
    Held,
    Cooldown,
    BetTooSmall,
    EventCap,
    ConcurrencyCap,
    PositionCap,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Excluded => "excluded",
            RejectReason::Disabled => "disabled",
            RejectReason::NoMilestone => "no_milestone",
            RejectReason::OutsideWindow => "outside_window",
            RejectReason::NoPrice => "no_price",
            RejectReason::PriceOutOfRange => "price_out_of_range",
            RejectReason::OpenOrder => "open_order",
            RejectReason::Held => "held",
            RejectReason::Cooldown => "cooldown",
            RejectReason::BetTooSmall => "bet_too_small",
            RejectReason::EventCap => "event_cap",
            RejectReason::ConcurrencyCap => "concurrency_cap",
            RejectReason::PositionCap => "position_cap",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub ticker: Arc<str>,
    pub reason: RejectReason,
}

/// Result of one filter pass, in discovery order
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub intents: Vec<OrderIntent>,
    pub rejections: Vec<Rejection>,
}

impl FilterOutcome {
    /// Rejection counts, ordered by reason
    pub fn reason_counts(&self) -> Vec<(RejectReason, usize)> {
        let mut counts: FxHashMap<RejectReason, usize> = FxHashMap::default();
        for r in &self.rejections {
            *counts.entry(r.reason).or_insert(0) += 1;
        }
        let mut counts: Vec<_> = counts.into_iter().collect();
        counts.sort();
        counts
    }

    pub fn reason_of(&self, ticker: &str) -> Option<RejectReason> {
        self.rejections.iter().find(|r| &*r.ticker == ticker).map(|r| r.reason)
    }

    /// e.g. "3 admitted, 40 rejected (cooldown=12, outside_window=28)"
    pub fn summary(&self) -> String {
        let breakdown: Vec<String> = self
            .reason_counts()
            .iter()
            .map(|(reason, n)| format!("{}={}", reason, n))
            .collect();
        format!("{} admitted, {} rejected ({})", self.intents.len(), self.rejections.len(), breakdown.join(", "))
    }
}

/// Admissions made earlier in the same pass
#[derive(Default)]
struct PassState {
    tickers: FxHashSet<Arc<str>>,
    event_cost: FxHashMap<Arc<str>, Cents>,
    admitted: usize,
    /// Held tickers plus open orders on tickers not yet held
    positions: usize,
}

pub struct EligibilityFilter {
    policy: Arc<PolicyTable>,
    excluded_tokens: Vec<String>,
    bet_cents: Cents,
    max_event_cents: Cents,
    max_resting_orders: usize,
    max_positions: usize,
}

impl EligibilityFilter {
    pub fn new(policy: Arc<PolicyTable>, config: &BotConfig) -> Self {
        Self {
            policy,
            excluded_tokens: config.excluded_tokens.iter().map(|t| t.to_ascii_uppercase()).collect(),
            bet_cents: config.bet_cents,
            max_event_cents: config.max_event_cents,
            max_resting_orders: config.max_resting_orders,
            max_positions: config.max_positions,
        }
    }

    fn is_excluded(&self, market: &Market) -> bool {
        let ticker = market.ticker.to_ascii_uppercase();
        let category = market.category.to_ascii_uppercase();
        self.excluded_tokens
            .iter()
            .any(|t| ticker.contains(t.as_str()) || category == *t)
    }

    /// Evaluate every market in order. Admissions count against the caps for
    /// the markets that follow them in the same pass.
    pub fn evaluate(&self, markets: &[Market], ledger: &Ledger, open: &OpenOrderSummary, now: DateTime<Utc>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();
        let mut pass = PassState {
            positions: ledger.held_count() + open.tickers.iter().filter(|t| !ledger.is_held(t)).count(),
            ..Default::default()
        };

        for market in markets {
            match self.check(market, ledger, open, &pass, now) {
                Ok(intent) => {
                    debug!("[FILTER] ✓ {} NO @{}¢ x{}", intent.ticker, intent.price, intent.count);
                    pass.tickers.insert(intent.ticker.clone());
                    *pass.event_cost.entry(intent.event_ticker.clone()).or_insert(0) += intent.cost_cents();
                    pass.admitted += 1;
                    outcome.intents.push(intent);
                }
                Err(reason) => {
                    debug!("[FILTER] ✗ {}: {}", market.ticker, reason);
                    outcome.rejections.push(Rejection { ticker: market.ticker.clone(), reason });
                }
            }
        }

        info!("[FILTER] {}", outcome.summary());
        outcome
    }

    fn check(&self, market: &Market, ledger: &Ledger, open: &OpenOrderSummary, pass: &PassState, now: DateTime<Utc>) -> Result<OrderIntent, RejectReason> {
        if self.is_excluded(market) {
            return Err(RejectReason::Excluded);
        }
        let rule = match self.policy.rule_for(&market.category) {
            Some(rule) if rule.enabled => rule,
            _ => return Err(RejectReason::Disabled),
        };

        if rule.is_time_gated() {
            let start = market.event_start.ok_or(RejectReason::NoMilestone)?;
            if !rule.admits_elapsed(now - start) {
                return Err(RejectReason::OutsideWindow);
            }
        }

        let ask = market.best_no_ask().ok_or(RejectReason::NoPrice)?;
        if !rule.admits_price(ask) {
            return Err(RejectReason::PriceOutOfRange);
        }
        // Never bid above the band, whatever the book shows
        let price = ask.min(rule.price_upper);

        if open.tickers.contains(&market.ticker) || pass.tickers.contains(&market.ticker) {
            return Err(RejectReason::OpenOrder);
        }
        if ledger.is_held(&market.ticker) {
            return Err(RejectReason::Held);
        }
        if ledger.in_cooldown(&market.ticker, now) {
            return Err(RejectReason::Cooldown);
        }

        let count = self.bet_cents / price as Cents;
        if count <= 0 {
            return Err(RejectReason::BetTooSmall);
        }
        let cost = price as Cents * count;

        let event = &market.event_ticker;
        let committed = ledger.event_exposure(event)
            + open.event_notional.get(event).copied().unwrap_or(0)
            + pass.event_cost.get(event).copied().unwrap_or(0);
        if committed + cost > self.max_event_cents {
            return Err(RejectReason::EventCap);
        }

        if open.open_count + pass.admitted >= self.max_resting_orders {
            return Err(RejectReason::ConcurrencyCap);
        }
        if pass.positions + pass.admitted >= self.max_positions {
            return Err(RejectReason::PositionCap);
        }

        Ok(OrderIntent {
            ticker: market.ticker.clone(),
            event_ticker: market.event_ticker.clone(),
            category: market.category.clone(),
            side: Side::No,
            price,
            count,
        })
    }
}
