// src/main.rs
// Kalshi mention-market bot entry point

use anyhow::{Context, Result};
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use mention_bot::config::{BotConfig, KALSHI_API_BASE};
use mention_bot::kalshi::{KalshiApiClient, KalshiConfig};
use mention_bot::notify::notifier_from_env;
use mention_bot::policy::{default_policy_table, PolicyTable};
use mention_bot::scanner::Scanner;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BotConfig::from_env();
    info!("[SCAN] Config: bet {}¢, event cap {}¢, max {} resting, rest {}s, cooldown {}s, dry_run={}",
          config.bet_cents, config.max_event_cents, config.max_resting_orders,
          config.order_rest.num_seconds(), config.cooldown.num_seconds(), config.dry_run);

    let policy = match &config.policy_file {
        Some(path) => PolicyTable::load_from(path)?,
        None => default_policy_table(),
    };

    let kalshi_config = KalshiConfig::from_env().context("Failed to load Kalshi credentials")?;
    let base_url = std::env::var("KALSHI_API_BASE").unwrap_or_else(|_| KALSHI_API_BASE.to_string());
    let client = KalshiApiClient::with_base_url(kalshi_config, base_url)?;

    let mut scanner = Scanner::new(client, config, policy, notifier_from_env());
    scanner.bootstrap(Utc::now()).await.context("Startup reconciliation failed")?;
    scanner.announce_startup().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("[SCAN] Ctrl-C received, stopping after the current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                error!("[SCAN] Failed to listen for Ctrl-C: {}", e);
                // Keep the sender alive so the loop keeps running
                std::future::pending::<()>().await;
            }
        }
    });

    scanner.run(shutdown_rx).await;
    scanner.announce_shutdown();

    // Let detached notification tasks deliver
    tokio::time::sleep(Duration::from_secs(2)).await;
    Ok(())
}
