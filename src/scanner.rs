// src/scanner.rs
// Scan loop - drives reconcile, refresh, filter, place, and timeout policing

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::catalog::MarketCatalog;
use crate::config::BotConfig;
use crate::error::ExchangeError;
use crate::filter::EligibilityFilter;
use crate::kalshi::Exchange;
use crate::ledger::Ledger;
use crate::lifecycle::OrderManager;
use crate::notify::{Notifier, TradeEvent};
use crate::policy::PolicyTable;

/// Whether a cycle error came from an exchange failure that may clear by itself
pub fn is_transient_failure(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ExchangeError>().map_or(false, ExchangeError::is_transient)
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    pub markets: usize,
    pub admitted: usize,
    pub rejected: usize,
    pub placed: usize,
    pub failed: usize,
    pub filled: usize,
    pub canceled: usize,
    /// Placement skipped because the balance was below the minimum
    pub balance_gated: bool,
    pub reconcile_error: Option<String>,
}

impl std::fmt::Display for CycleReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} markets | {} admitted, {} rejected | {} placed, {} failed | {} filled, {} canceled{}",
               self.markets, self.admitted, self.rejected, self.placed, self.failed,
               self.filled, self.canceled,
               if self.balance_gated { " | balance gated" } else { "" })
    }
}

/// One strategy instance. Owns its ledger, catalog and orders; a companion
/// strategy runs as a separate instance with its own namespace.
pub struct Scanner<E: Exchange> {
    exchange: E,
    config: BotConfig,
    catalog: MarketCatalog,
    filter: EligibilityFilter,
    ledger: Ledger,
    orders: OrderManager,
    notifier: Arc<dyn Notifier>,
}

impl<E: Exchange> Scanner<E> {
    pub fn new(exchange: E, config: BotConfig, policy: PolicyTable, notifier: Arc<dyn Notifier>) -> Self {
        let policy = Arc::new(policy);
        Self {
            catalog: MarketCatalog::new(policy.clone(), config.seed_series.clone()),
            filter: EligibilityFilter::new(policy, &config),
            ledger: Ledger::new(config.cooldown),
            orders: OrderManager::new(config.order_rest, config.dry_run),
            exchange,
            config,
            notifier,
        }
    }

    pub fn exchange(&self) -> &E {
        &self.exchange
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn orders(&self) -> &OrderManager {
        &self.orders
    }

    pub fn catalog(&self) -> &MarketCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Rebuild local state from the exchange: discover our namespace, seed the
    /// ledger from positions and recent fills, adopt resting orders.
    pub async fn bootstrap(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.catalog
            .discover_series(&self.exchange, now)
            .await
            .context("Series discovery failed")?;

        let positions = self.exchange.get_positions().await.context("Failed to fetch positions")?;
        let fills = self.exchange
            .get_fills(now - self.config.cooldown)
            .await
            .context("Failed to fetch fills")?;
        let open = self.exchange.get_open_orders().await.context("Failed to fetch resting orders")?;

        let catalog = &self.catalog;
        self.ledger.rehydrate(&positions, &fills, now, |t| catalog.owns_ticker(t));

        let mut adopted = 0usize;
        for details in open.iter().filter(|o| o.action == "buy" && catalog.owns_ticker(&o.ticker)) {
            if self.orders.adopt(details, now, true) {
                adopted += 1;
            }
        }

        info!("[SCAN] Bootstrap complete: {} tickers in ledger ({} held, {}¢ exposure), {} resting orders adopted",
              self.ledger.len(), self.ledger.held_count(), self.ledger.total_exposure(), adopted);
        Ok(())
    }

    fn dispatch(&self, events: &[TradeEvent], report: &mut CycleReport) {
        for event in events {
            match event {
                TradeEvent::Placed { .. } => report.placed += 1,
                TradeEvent::PlacementFailed { .. } => report.failed += 1,
                TradeEvent::Filled { .. } => report.filled += 1,
                TradeEvent::Canceled { .. } => report.canceled += 1,
                _ => {}
            }
            self.notifier.notify(event);
        }
    }

    /// Below-minimum balance blocks placement. An unreadable balance does not.
    async fn balance_gate(&self) -> bool {
        if self.orders.is_dry_run() {
            return false;
        }
        match self.exchange.get_balance().await {
            Ok(balance) if balance < self.config.min_balance_cents => {
                warn!("[SCAN] ⚠️ Balance {}¢ below minimum {}¢, no new orders this cycle",
                      balance, self.config.min_balance_cents);
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!("[SCAN] Balance unknown ({}), placing anyway", e);
                false
            }
        }
    }

    /// One full cycle at wall-clock `now`. Only a failed catalog refresh is
    /// returned as an error, after timeouts have still been policed.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::default();

        let catalog = &self.catalog;
        let reconciled = self.orders
            .reconcile(&self.exchange, &mut self.ledger, now, |t| catalog.owns_ticker(t))
            .await;
        match reconciled {
            Ok(events) => self.dispatch(&events, &mut report),
            Err(e) => {
                warn!("[SCAN] Reconcile failed: {}", e);
                report.reconcile_error = Some(e.to_string());
            }
        }

        let refreshed = self.catalog.refresh(&self.exchange, now).await;
        let markets = match refreshed {
            Ok(markets) => markets,
            Err(e) => {
                let events = self.orders.police_timeouts(&self.exchange, &mut self.ledger, now).await;
                self.dispatch(&events, &mut report);
                return Err(e).context("Catalog refresh failed");
            }
        };
        report.markets = markets.len();

        report.balance_gated = self.balance_gate().await;

        let open = self.orders.open_summary();
        let outcome = self.filter.evaluate(&markets, &self.ledger, &open, now);
        report.admitted = outcome.intents.len();
        report.rejected = outcome.rejections.len();

        if !report.balance_gated {
            for intent in &outcome.intents {
                let events = self.orders.place(&self.exchange, &mut self.ledger, intent, now).await;
                self.dispatch(&events, &mut report);
            }
        }

        let events = self.orders.police_timeouts(&self.exchange, &mut self.ledger, now).await;
        self.dispatch(&events, &mut report);

        info!("[SCAN] {}", report);
        Ok(report)
    }

    pub async fn announce_startup(&self) {
        let balance_cents = self.exchange.get_balance().await.ok();
        self.notifier.notify(&TradeEvent::Startup {
            dry_run: self.config.dry_run,
            balance_cents,
            open_orders: self.orders.open_count(),
            tracked_tickers: self.ledger.len(),
        });
    }

    pub fn announce_shutdown(&self) {
        self.notifier.notify(&TradeEvent::Shutdown { open_orders: self.orders.open_count() });
    }

    /// Run cycles on a fixed cadence until `shutdown` flips to true.
    /// Overrunning cycles push the next tick back; no cycle error stops the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("[SCAN] Scan loop started (every {:?}, dry_run={})", self.config.scan_interval, self.config.dry_run);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_cycle(Utc::now()).await {
                if is_transient_failure(&e) {
                    warn!("[SCAN] ⚠️ Cycle skipped, exchange unavailable: {:#}", e);
                } else {
                    error!("[SCAN] ❌ Cycle failed: {:#}", e);
                }
            }
        }

        info!("[SCAN] Scan loop stopped ({} orders still resting)", self.orders.open_count());
    }
}
