// src/notify.rs
// Fire-and-forget trade notifications (Telegram or log only)

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::lifecycle::TerminalOutcome;
use crate::types::{Cents, PriceCents};

/// Something worth telling a human about
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    Startup {
        dry_run: bool,
        balance_cents: Option<Cents>,
        open_orders: usize,
        tracked_tickers: usize,
    },
    Shutdown {
        open_orders: usize,
    },
    Placed {
        ticker: Arc<str>,
        order_id: String,
        price: PriceCents,
        count: i64,
        dry_run: bool,
    },
    Filled {
        ticker: Arc<str>,
        order_id: String,
        count: i64,
        cost_cents: Cents,
    },
    Canceled {
        ticker: Arc<str>,
        order_id: String,
        filled: i64,
        outcome: TerminalOutcome,
    },
    PlacementFailed {
        ticker: Arc<str>,
        price: PriceCents,
        count: i64,
        reason: String,
    },
}

impl std::fmt::Display for TradeEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeEvent::Startup { dry_run, balance_cents, open_orders, tracked_tickers } => {
                let balance = balance_cents
                    .map(|c| format!("${:.2}", c as f64 / 100.0))
                    .unwrap_or_else(|| "unknown".into());
                write!(f, "🚀 Mention bot started{} | balance {} | {} resting orders | {} tickers tracked",
                       if *dry_run { " (DRY RUN)" } else { "" }, balance, open_orders, tracked_tickers)
            }
            TradeEvent::Shutdown { open_orders } => {
                write!(f, "🛑 Mention bot stopped | {} orders left resting", open_orders)
            }
            TradeEvent::Placed { ticker, order_id, price, count, dry_run } => {
                write!(f, "{} BUY NO {} x{} @{}¢ ({})",
                       if *dry_run { "🏃 DRY RUN" } else { "📝" }, ticker, count, price, order_id)
            }
            TradeEvent::Filled { ticker, order_id, count, cost_cents } => {
                write!(f, "✅ FILLED {} x{} for ${:.2} ({})", ticker, count, *cost_cents as f64 / 100.0, order_id)
            }
            TradeEvent::Canceled { ticker, order_id, filled, outcome } => {
                write!(f, "⏹ {:?} {} filled {} ({})", outcome, ticker, filled, order_id)
            }
            TradeEvent::PlacementFailed { ticker, price, count, reason } => {
                write!(f, "❌ Order failed {} x{} @{}¢: {}", ticker, count, price, reason)
            }
        }
    }
}

/// Notification sink. Implementations must never block the caller.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &TradeEvent);
}

/// Writes events to the log only
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, event: &TradeEvent) {
        info!("[NOTIFY] {}", event);
    }
}

const TELEGRAM_API: &str = "https://api.telegram.org";
const TELEGRAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Telegram bot messages; delivery runs on a detached task
pub struct TelegramNotifier {
    http: reqwest::Client,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(TELEGRAM_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http, token, chat_id }
    }

    /// Some(..) when TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID are both set
    pub fn from_env() -> Option<Self> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").ok().filter(|v| !v.is_empty())?;
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").ok().filter(|v| !v.is_empty())?;
        Some(Self::new(token, chat_id))
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, event: &TradeEvent) {
        let text = event.to_string();
        info!("[NOTIFY] {}", text);

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let http = self.http.clone();
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.token);
        let payload = json!({ "chat_id": self.chat_id, "text": text });

        handle.spawn(async move {
            match http.post(&url).json(&payload).send().await {
                Ok(resp) if !resp.status().is_success() => {
                    warn!("[NOTIFY] Telegram returned {}", resp.status());
                }
                Ok(_) => {}
                Err(e) => warn!("[NOTIFY] Telegram send failed: {}", e),
            }
        });
    }
}

/// Telegram if configured, otherwise log only
pub fn notifier_from_env() -> Arc<dyn Notifier> {
    match TelegramNotifier::from_env() {
        Some(telegram) => {
            info!("[NOTIFY] Telegram notifications enabled");
            Arc::new(telegram)
        }
        None => Arc::new(LogNotifier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_messages() {
        let placed = TradeEvent::Placed {
            ticker: "KXTRUMPMENTION-25OCT19-TARIFF".into(),
            order_id: "o1".into(),
            price: 18,
            count: 16,
            dry_run: false,
        };
        assert_eq!(placed.to_string(), "📝 BUY NO KXTRUMPMENTION-25OCT19-TARIFF x16 @18¢ (o1)");

        let filled = TradeEvent::Filled {
            ticker: "KXTRUMPMENTION-25OCT19-TARIFF".into(),
            order_id: "o1".into(),
            count: 16,
            cost_cents: 288,
        };
        assert!(filled.to_string().contains("$2.88"));

        let startup = TradeEvent::Startup { dry_run: true, balance_cents: None, open_orders: 0, tracked_tickers: 3 };
        assert!(startup.to_string().contains("DRY RUN"));
        assert!(startup.to_string().contains("unknown"));
    }

    #[test]
    fn test_telegram_without_runtime_does_not_panic() {
        let notifier = TelegramNotifier::new("token".into(), "chat".into());
        notifier.notify(&TradeEvent::Shutdown { open_orders: 0 });
    }
}
