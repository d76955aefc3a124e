// src/ledger.rs
// Per-ticker exposure and cooldown state, rebuilt from the exchange at startup

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::lifecycle::{RestingOrder, TerminalOutcome};
use crate::types::{event_of_ticker, parse_ts, Cents, KalshiFill, KalshiPosition};

/// What the bot has done on one ticker. Entries are never removed.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub ticker: Arc<str>,
    pub event_ticker: Arc<str>,
    /// Last placement outcome or fill; drives the cooldown
    pub last_action: Option<DateTime<Utc>>,
    pub exposure_cents: Cents,
    /// The account holds contracts on this ticker; never traded again
    pub held: bool,
}

/// Single-writer store owned by the scan loop.
/// Terminal order outcomes are folded at most once per order id and
/// untracked fills at most once per trade id.
#[derive(Debug)]
pub struct Ledger {
    cooldown: Duration,
    entries: FxHashMap<Arc<str>, LedgerEntry>,
    event_exposure: FxHashMap<Arc<str>, Cents>,
    applied_orders: FxHashSet<String>,
    applied_trades: FxHashSet<String>,
}

impl Ledger {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: FxHashMap::default(),
            event_exposure: FxHashMap::default(),
            applied_orders: FxHashSet::default(),
            applied_trades: FxHashSet::default(),
        }
    }

    fn entry_mut(&mut self, ticker: &str) -> &mut LedgerEntry {
        self.entries
            .entry(Arc::from(ticker))
            .or_insert_with(|| LedgerEntry {
                ticker: Arc::from(ticker),
                event_ticker: Arc::from(event_of_ticker(ticker)),
                last_action: None,
                exposure_cents: 0,
                held: false,
            })
    }

    fn add_exposure(&mut self, ticker: &str, cents: Cents, at: DateTime<Utc>) {
        let entry = self.entry_mut(ticker);
        entry.exposure_cents += cents;
        if cents > 0 {
            entry.held = true;
        }
        if entry.last_action.map_or(true, |t| t < at) {
            entry.last_action = Some(at);
        }
        let event = entry.event_ticker.clone();
        *self.event_exposure.entry(event).or_insert(0) += cents;
    }

    /// Seed state from the exchange. Positions give exposure; fills give the
    /// most recent action per ticker and are marked applied. Tickers outside
    /// our namespace (`owns` false) are ignored. Returns the number of tickers seeded.
    pub fn rehydrate<F>(&mut self, positions: &[KalshiPosition], fills: &[KalshiFill], now: DateTime<Utc>, owns: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let mut last_fill: FxHashMap<&str, DateTime<Utc>> = FxHashMap::default();
        for fill in fills.iter().filter(|f| owns(&f.ticker)) {
            self.applied_trades.insert(fill.trade_id.clone());
            let at = fill.created_time.as_deref().and_then(parse_ts).unwrap_or(now);
            last_fill
                .entry(fill.ticker.as_str())
                .and_modify(|t| *t = (*t).max(at))
                .or_insert(at);
        }

        let mut seeded = 0usize;
        for pos in positions.iter().filter(|p| p.position != 0 && owns(&p.ticker)) {
            let at = last_fill
                .get(pos.ticker.as_str())
                .copied()
                .or_else(|| pos.last_updated_ts.as_deref().and_then(parse_ts))
                .unwrap_or(now);
            self.add_exposure(&pos.ticker, pos.market_exposure.max(0), at);
            self.entry_mut(&pos.ticker).held = true;
            seeded += 1;
        }

        // Fills on tickers with no remaining position still start a cooldown
        for (ticker, at) in last_fill {
            let entry = self.entry_mut(ticker);
            if entry.last_action.map_or(true, |t| t < at) {
                entry.last_action = Some(at);
            }
        }

        info!("[LEDGER] Rehydrated {} positions, {} tickers tracked, {} fills applied",
              seeded, self.entries.len(), self.applied_trades.len());
        seeded
    }

    /// Fold a terminal order outcome. Returns false if this order was already folded.
    pub fn record_terminal(&mut self, order: &RestingOrder, outcome: TerminalOutcome, now: DateTime<Utc>) -> bool {
        if !self.applied_orders.insert(order.order_id.clone()) {
            debug!("[LEDGER] {} already folded", order.order_id);
            return false;
        }

        let notional = order.new_fill_notional();
        self.add_exposure(&order.ticker, notional, now);
        self.entry_mut(&order.ticker).last_action = Some(now);

        info!("[LEDGER] {} {:?}: filled {}/{} (+{}¢), event {} at {}¢",
              order.ticker, outcome, order.filled, order.count, notional,
              order.event_ticker, self.event_exposure(&order.event_ticker));
        true
    }

    /// Fold a fill for an order this process never tracked (lost acknowledgment).
    /// Returns false for fills already applied or belonging to a folded order.
    pub fn record_untracked_fill(&mut self, fill: &KalshiFill, now: DateTime<Utc>) -> bool {
        if self.applied_orders.contains(&fill.order_id) || !self.applied_trades.insert(fill.trade_id.clone()) {
            return false;
        }

        let at = fill.created_time.as_deref().and_then(parse_ts).unwrap_or(now);
        let cost = fill.cost_cents();
        self.add_exposure(&fill.ticker, cost, at);
        info!("[LEDGER] Untracked fill {} on {}: {} @ +{}¢", fill.trade_id, fill.ticker, fill.count, cost);
        true
    }

    pub fn in_cooldown(&self, ticker: &str, now: DateTime<Utc>) -> bool {
        self.entries
            .get(ticker)
            .and_then(|e| e.last_action)
            .map_or(false, |t| now - t < self.cooldown)
    }

    /// Ticker has a position from rehydration or a folded fill
    pub fn is_held(&self, ticker: &str) -> bool {
        self.entries.get(ticker).map_or(false, |e| e.held)
    }

    pub fn held_count(&self) -> usize {
        self.entries.values().filter(|e| e.held).count()
    }

    pub fn entry(&self, ticker: &str) -> Option<&LedgerEntry> {
        self.entries.get(ticker)
    }

    pub fn event_exposure(&self, event_ticker: &str) -> Cents {
        self.event_exposure.get(event_ticker).copied().unwrap_or(0)
    }

    pub fn total_exposure(&self) -> Cents {
        self.event_exposure.values().sum()
    }

    pub fn is_order_applied(&self, order_id: &str) -> bool {
        self.applied_orders.contains(order_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
