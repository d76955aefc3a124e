// src/lifecycle.rs
// Order lifecycle: placement, reconciliation, timeout cancels, terminal folding

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ExchangeResult;
use crate::kalshi::{Exchange, KalshiApiClient, KalshiOrderDetails, KalshiOrderRequest};
use crate::ledger::Ledger;
use crate::notify::TradeEvent;
use crate::types::{event_of_ticker, parse_ts, Cents, OrderIntent, PriceCents, Side, NO_PRICE};

/// Slack subtracted from the last fill sweep so late-reported fills are not missed
const FILL_SWEEP_OVERLAP_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Resting,
    PartiallyFilled,
    Filled,
    Canceled,
    Expired,
}

impl OrderStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Resting | OrderStatus::PartiallyFilled)
    }
}

/// How an order left the book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    Filled,
    /// We asked for the cancel (rest time exceeded)
    CanceledByTimeout,
    /// The exchange canceled it without our asking
    CanceledByError,
    Expired,
}

impl TerminalOutcome {
    fn status(&self) -> OrderStatus {
        match self {
            TerminalOutcome::Filled => OrderStatus::Filled,
            TerminalOutcome::CanceledByTimeout | TerminalOutcome::CanceledByError => OrderStatus::Canceled,
            TerminalOutcome::Expired => OrderStatus::Expired,
        }
    }
}

/// A limit order placed (or adopted) by this process
#[derive(Debug, Clone, PartialEq)]
pub struct RestingOrder {
    pub order_id: String,
    pub client_order_id: String,
    pub ticker: Arc<str>,
    pub event_ticker: Arc<str>,
    pub placed_at: DateTime<Utc>,
    pub price: PriceCents,
    pub count: i64,
    pub filled: i64,
    /// Exchange-reported cost of the fills, when known
    pub fill_cost: Option<Cents>,
    /// Contracts already reflected in the ledger when the order was adopted
    pub prior_filled: i64,
    pub status: OrderStatus,
    pub cancel_requested: bool,
}

impl RestingOrder {
    /// Notional this order may still add to its event
    pub fn open_notional(&self) -> Cents {
        self.price as Cents * (self.count - self.prior_filled).max(0)
    }

    /// Filled notional not yet in the ledger
    pub fn new_fill_notional(&self) -> Cents {
        if self.prior_filled == 0 {
            self.fill_cost.unwrap_or(self.price as Cents * self.filled)
        } else {
            self.price as Cents * (self.filled - self.prior_filled).max(0)
        }
    }

    fn update_from(&mut self, details: &KalshiOrderDetails) {
        self.filled = details.filled_count().max(self.filled);
        if let Some(cost) = details.fill_cost() {
            self.fill_cost = Some(cost);
        }
        if self.status.is_open() && self.filled > 0 {
            self.status = OrderStatus::PartiallyFilled;
        }
    }
}

/// Terminal outcome implied by an exchange order snapshot, if any
fn terminal_from(details: &KalshiOrderDetails, cancel_requested: bool) -> Option<TerminalOutcome> {
    if details.is_filled() {
        return Some(TerminalOutcome::Filled);
    }
    match details.status.as_str() {
        "canceled" | "cancelled" if cancel_requested => Some(TerminalOutcome::CanceledByTimeout),
        "canceled" | "cancelled" => Some(TerminalOutcome::CanceledByError),
        "expired" => Some(TerminalOutcome::Expired),
        _ => None,
    }
}

/// Snapshot of open orders handed to the filter
#[derive(Debug, Clone, Default)]
pub struct OpenOrderSummary {
    pub tickers: FxHashSet<Arc<str>>,
    pub event_notional: FxHashMap<Arc<str>, Cents>,
    pub open_count: usize,
}

/// Owns every non-terminal order of one strategy instance
pub struct OrderManager {
    orders: Vec<RestingOrder>,
    rest_time: Duration,
    dry_run: bool,
    last_fill_sweep: Option<DateTime<Utc>>,
}

impl OrderManager {
    pub fn new(rest_time: Duration, dry_run: bool) -> Self {
        Self {
            orders: Vec::new(),
            rest_time,
            dry_run,
            last_fill_sweep: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn open_orders(&self) -> &[RestingOrder] {
        &self.orders
    }

    pub fn open_count(&self) -> usize {
        self.orders.len()
    }

    fn is_tracked(&self, order_id: &str) -> bool {
        self.orders.iter().any(|o| o.order_id == order_id)
    }

    pub fn has_open_order(&self, ticker: &str) -> bool {
        self.orders.iter().any(|o| &*o.ticker == ticker)
    }

    pub fn open_summary(&self) -> OpenOrderSummary {
        let mut summary = OpenOrderSummary { open_count: self.orders.len(), ..Default::default() };
        for o in &self.orders {
            summary.tickers.insert(o.ticker.clone());
            *summary.event_notional.entry(o.event_ticker.clone()).or_insert(0) += o.open_notional();
        }
        summary
    }

    /// Fold a terminal order into the ledger and report it
    fn finish(&mut self, mut order: RestingOrder, outcome: TerminalOutcome, ledger: &mut Ledger, now: DateTime<Utc>, events: &mut Vec<TradeEvent>) {
        order.status = outcome.status();
        if !ledger.record_terminal(&order, outcome, now) {
            return;
        }
        let event = match outcome {
            TerminalOutcome::Filled => TradeEvent::Filled {
                ticker: order.ticker.clone(),
                order_id: order.order_id.clone(),
                count: order.filled,
                cost_cents: order.fill_cost.unwrap_or(order.price as Cents * order.filled),
            },
            _ => TradeEvent::Canceled {
                ticker: order.ticker.clone(),
                order_id: order.order_id.clone(),
                filled: order.filled,
                outcome,
            },
        };
        events.push(event);
    }

    /// Submit a buy-NO limit order for `intent`. A failed submission is
    /// reported and dropped; the market is reconsidered next cycle.
    pub async fn place<E: Exchange>(&mut self, exchange: &E, ledger: &mut Ledger, intent: &OrderIntent, now: DateTime<Utc>) -> Vec<TradeEvent> {
        let mut events = Vec::new();

        if self.has_open_order(&intent.ticker) {
            warn!("[ORDERS] ⚠️ {} already has a resting order, skipping", intent.ticker);
            return events;
        }

        let client_order_id = KalshiApiClient::next_client_order_id();

        if self.dry_run {
            info!("[ORDERS] 🏃 DRY RUN - would BUY NO {} x{} @{}¢", intent.ticker, intent.count, intent.price);
            let order = RestingOrder {
                order_id: format!("DRY-{}", client_order_id),
                client_order_id: client_order_id.to_string(),
                ticker: intent.ticker.clone(),
                event_ticker: intent.event_ticker.clone(),
                placed_at: now,
                price: intent.price,
                count: intent.count,
                filled: intent.count,
                fill_cost: None,
                prior_filled: 0,
                status: OrderStatus::Resting,
                cancel_requested: false,
            };
            events.push(TradeEvent::Placed {
                ticker: order.ticker.clone(),
                order_id: order.order_id.clone(),
                price: order.price,
                count: order.count,
                dry_run: true,
            });
            self.finish(order, TerminalOutcome::Filled, ledger, now, &mut events);
            return events;
        }

        let request = KalshiOrderRequest::resting_buy(
            Cow::Borrowed(&*intent.ticker),
            Side::No,
            intent.price,
            intent.count,
            Cow::Borrowed(client_order_id.as_str()),
        );

        let details = match exchange.create_order(&request).await {
            Ok(details) => details,
            Err(e) => {
                warn!("[ORDERS] ❌ Order failed {} x{} @{}¢: {}", intent.ticker, intent.count, intent.price, e);
                events.push(TradeEvent::PlacementFailed {
                    ticker: intent.ticker.clone(),
                    price: intent.price,
                    count: intent.count,
                    reason: e.to_string(),
                });
                return events;
            }
        };

        let mut order = RestingOrder {
            order_id: details.order_id.clone(),
            client_order_id: client_order_id.to_string(),
            ticker: intent.ticker.clone(),
            event_ticker: intent.event_ticker.clone(),
            placed_at: now,
            price: intent.price,
            count: intent.count,
            filled: 0,
            fill_cost: None,
            prior_filled: 0,
            status: OrderStatus::Resting,
            cancel_requested: false,
        };
        order.update_from(&details);

        info!("[ORDERS] 📝 BUY NO {} x{} @{}¢ -> {} ({}, filled {})",
              order.ticker, order.count, order.price, order.order_id, details.status, order.filled);
        events.push(TradeEvent::Placed {
            ticker: order.ticker.clone(),
            order_id: order.order_id.clone(),
            price: order.price,
            count: order.count,
            dry_run: false,
        });

        match terminal_from(&details, false) {
            Some(outcome) => self.finish(order, outcome, ledger, now, &mut events),
            None => self.orders.push(order),
        }
        events
    }

    /// Track an order found on the exchange but not known locally.
    /// `already_in_ledger` marks fills already counted through rehydration.
    pub fn adopt(&mut self, details: &KalshiOrderDetails, now: DateTime<Utc>, already_in_ledger: bool) -> bool {
        if self.is_tracked(&details.order_id) || !details.is_resting() {
            return false;
        }

        let filled = details.filled_count();
        let count = details
            .initial_count
            .unwrap_or_else(|| details.remaining_count.unwrap_or(0) + filled);

        let mut order = RestingOrder {
            order_id: details.order_id.clone(),
            client_order_id: details.client_order_id.clone().unwrap_or_default(),
            ticker: Arc::from(details.ticker.as_str()),
            event_ticker: Arc::from(event_of_ticker(&details.ticker)),
            placed_at: details.created_time.as_deref().and_then(parse_ts).unwrap_or(now),
            price: details.price().unwrap_or(NO_PRICE),
            count,
            filled: 0,
            fill_cost: None,
            prior_filled: if already_in_ledger { filled } else { 0 },
            status: OrderStatus::Resting,
            cancel_requested: false,
        };
        order.update_from(details);

        info!("[ORDERS] Adopted {} on {} ({}/{} filled, placed {})",
              order.order_id, order.ticker, order.filled, order.count, order.placed_at);
        self.orders.push(order);
        true
    }

    /// Bring local orders in line with the exchange. Fetching the open book is
    /// the only failure returned; a failed per-order lookup leaves that order
    /// for the next cycle.
    pub async fn reconcile<E, F>(&mut self, exchange: &E, ledger: &mut Ledger, now: DateTime<Utc>, owns: F) -> ExchangeResult<Vec<TradeEvent>>
    where
        E: Exchange,
        F: Fn(&str) -> bool,
    {
        let mut events = Vec::new();
        let open = exchange.get_open_orders().await?;
        let open_by_id: FxHashMap<&str, &KalshiOrderDetails> =
            open.iter().map(|o| (o.order_id.as_str(), o)).collect();

        // Local orders: still open -> refresh fills, gone -> resolve
        let mut gone = Vec::new();
        for order in self.orders.iter_mut() {
            match open_by_id.get(order.order_id.as_str()) {
                Some(details) => order.update_from(details),
                None => gone.push(order.order_id.clone()),
            }
        }

        for order_id in gone {
            let details = match exchange.get_order(&order_id).await {
                Ok(d) => d,
                Err(e) => {
                    warn!("[ORDERS] Lookup of {} failed, retrying next cycle: {}", order_id, e);
                    continue;
                }
            };
            let Some(idx) = self.orders.iter().position(|o| o.order_id == order_id) else {
                continue;
            };
            self.orders[idx].update_from(&details);
            if let Some(outcome) = terminal_from(&details, self.orders[idx].cancel_requested) {
                let order = self.orders.remove(idx);
                self.finish(order, outcome, ledger, now, &mut events);
            }
        }

        // Exchange orders in our namespace that we lost track of
        for details in &open {
            if details.action == "buy" && owns(&details.ticker) && !ledger.is_order_applied(&details.order_id) {
                self.adopt(details, now, false);
            }
        }

        self.sweep_fills(exchange, ledger, now, &owns).await;
        Ok(events)
    }

    /// Fold fills of orders we never tracked (e.g. an ack lost after the order filled)
    async fn sweep_fills<E, F>(&mut self, exchange: &E, ledger: &mut Ledger, now: DateTime<Utc>, owns: &F)
    where
        E: Exchange,
        F: Fn(&str) -> bool,
    {
        let since = self.last_fill_sweep.unwrap_or(now - self.rest_time) - Duration::seconds(FILL_SWEEP_OVERLAP_SECS);
        let fills = match exchange.get_fills(since).await {
            Ok(fills) => fills,
            Err(e) => {
                warn!("[ORDERS] Fill sweep failed: {}", e);
                return;
            }
        };

        for fill in &fills {
            if owns(&fill.ticker) && fill.action != "sell" && !self.is_tracked(&fill.order_id) {
                ledger.record_untracked_fill(fill, now);
            }
        }
        self.last_fill_sweep = Some(now);
    }

    /// Cancel every open order that has rested longer than the rest time.
    /// A failed cancel is flagged and left for reconciliation.
    pub async fn police_timeouts<E: Exchange>(&mut self, exchange: &E, ledger: &mut Ledger, now: DateTime<Utc>) -> Vec<TradeEvent> {
        let mut events = Vec::new();

        let expired: Vec<String> = self.orders
            .iter()
            .filter(|o| o.status.is_open() && now - o.placed_at > self.rest_time)
            .map(|o| o.order_id.clone())
            .collect();

        for order_id in expired {
            let result = exchange.cancel_order(&order_id).await;
            let Some(idx) = self.orders.iter().position(|o| o.order_id == order_id) else {
                continue;
            };
            self.orders[idx].cancel_requested = true;

            match result {
                Ok(details) => {
                    self.orders[idx].update_from(&details);
                    let outcome = if details.is_filled() {
                        TerminalOutcome::Filled
                    } else {
                        TerminalOutcome::CanceledByTimeout
                    };
                    let order = self.orders.remove(idx);
                    info!("[ORDERS] ⏹ Timed out {} after {}s ({}/{} filled)",
                          order.ticker, (now - order.placed_at).num_seconds(), order.filled, order.count);
                    self.finish(order, outcome, ledger, now, &mut events);
                }
                Err(e) => {
                    warn!("[ORDERS] ⚠️ Cancel of {} failed, left for reconciliation: {}", order_id, e);
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(status: &str) -> KalshiOrderDetails {
        KalshiOrderDetails {
            order_id: "o1".into(),
            ticker: "KXTRUMPMENTION-25OCT19-TARIFF".into(),
            status: status.into(),
            side: "no".into(),
            action: "buy".into(),
            no_price: Some(20),
            initial_count: Some(15),
            remaining_count: Some(15),
            ..Default::default()
        }
    }

    #[test]
    fn test_terminal_mapping() {
        assert_eq!(terminal_from(&details("executed"), false), Some(TerminalOutcome::Filled));
        assert_eq!(terminal_from(&details("canceled"), true), Some(TerminalOutcome::CanceledByTimeout));
        assert_eq!(terminal_from(&details("canceled"), false), Some(TerminalOutcome::CanceledByError));
        assert_eq!(terminal_from(&details("expired"), false), Some(TerminalOutcome::Expired));
        assert_eq!(terminal_from(&details("resting"), false), None);
    }

    #[test]
    fn test_adopt_counts_prior_fills_once() {
        let mut manager = OrderManager::new(Duration::minutes(10), false);
        let mut d = details("resting");
        d.fill_count = Some(5);
        d.remaining_count = Some(10);

        assert!(manager.adopt(&d, Utc::now(), true));
        assert!(!manager.adopt(&d, Utc::now(), true));

        let order = &manager.open_orders()[0];
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.prior_filled, 5);
        assert_eq!(order.open_notional(), 200);
        assert_eq!(order.new_fill_notional(), 0);
    }

    #[test]
    fn test_open_summary() {
        let mut manager = OrderManager::new(Duration::minutes(10), false);
        manager.adopt(&details("resting"), Utc::now(), false);

        let summary = manager.open_summary();
        assert_eq!(summary.open_count, 1);
        assert!(summary.tickers.contains("KXTRUMPMENTION-25OCT19-TARIFF"));
        assert_eq!(summary.event_notional.get("KXTRUMPMENTION-25OCT19"), Some(&300));
    }
}
