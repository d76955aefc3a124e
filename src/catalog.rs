// src/catalog.rs
// Mention series discovery, open market listing, and milestone lookup

use chrono::{DateTime, Duration, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::cache::TtlCache;
use crate::config::{MENTION_TITLE_KEYWORDS, MILESTONE_CACHE_TTL_SECS, SERIES_CACHE_TTL_SECS};
use crate::error::ExchangeResult;
use crate::kalshi::Exchange;
use crate::policy::PolicyTable;
use crate::types::{event_of_ticker, parse_ts, series_of_ticker, CategoryKey, KalshiMarket, KalshiMilestone, KalshiSeries, Market};

/// Upper bound on market pages fetched per series
const MAX_MARKET_PAGES: usize = 10;

/// A series the bot trades, with its policy category
#[derive(Debug, Clone, PartialEq)]
pub struct MentionSeries {
    pub ticker: Arc<str>,
    pub category: CategoryKey,
}

/// Decide whether a series is a mention series and which category it falls in.
/// Mention series carry MENTION in the ticker or a mention phrase in the title.
pub fn classify_series(series: &KalshiSeries, policy: &PolicyTable) -> Option<CategoryKey> {
    let ticker = series.ticker.to_ascii_uppercase();
    let title = series.title.to_lowercase();

    let is_mention = ticker.contains("MENTION")
        || MENTION_TITLE_KEYWORDS.iter().any(|kw| title.contains(kw));

    is_mention.then(|| policy.category_for(&series.ticker))
}

/// Event ticker -> milestone start. Primary event tickers win over related ones.
pub fn build_milestone_map(milestones: &[KalshiMilestone]) -> FxHashMap<String, DateTime<Utc>> {
    let mut map = FxHashMap::default();

    let starts: Vec<(&KalshiMilestone, DateTime<Utc>)> = milestones
        .iter()
        .filter_map(|ms| ms.start_date.as_deref().and_then(parse_ts).map(|start| (ms, start)))
        .collect();

    for (ms, start) in &starts {
        for et in &ms.primary_event_tickers {
            map.insert(et.clone(), *start);
        }
    }
    for (ms, start) in &starts {
        for et in &ms.related_event_tickers {
            map.entry(et.clone()).or_insert(*start);
        }
    }
    map
}

fn is_open_status(status: Option<&str>) -> bool {
    matches!(status, None | Some("open") | Some("active"))
}

/// Owns discovery state for one strategy instance
pub struct MarketCatalog {
    policy: Arc<PolicyTable>,
    seed_series: Vec<String>,
    series_cache: TtlCache<(), Vec<MentionSeries>>,
    milestones: TtlCache<Arc<str>, FxHashMap<String, DateTime<Utc>>>,
    /// Series from the most recent discovery; defines our ticker namespace
    known_series: FxHashSet<Arc<str>>,
    /// Series whose milestone fetch failed during the current refresh
    failed_milestones: FxHashSet<Arc<str>>,
}

impl MarketCatalog {
    pub fn new(policy: Arc<PolicyTable>, seed_series: Vec<String>) -> Self {
        Self {
            policy,
            seed_series,
            series_cache: TtlCache::new(Duration::seconds(SERIES_CACHE_TTL_SECS)),
            milestones: TtlCache::new(Duration::seconds(MILESTONE_CACHE_TTL_SECS)),
            known_series: FxHashSet::default(),
            failed_milestones: FxHashSet::default(),
        }
    }

    /// All mention series, sorted by ticker. Cached for an hour; a failed
    /// fetch is returned to the caller and nothing is cached.
    pub async fn discover_series<E: Exchange>(&mut self, exchange: &E, now: DateTime<Utc>) -> ExchangeResult<Vec<MentionSeries>> {
        if let Some(cached) = self.series_cache.get(&(), now) {
            return Ok(cached.clone());
        }

        let all = exchange.get_series().await?;
        let mut by_ticker: FxHashMap<Arc<str>, CategoryKey> = FxHashMap::default();
        for series in &all {
            if let Some(category) = classify_series(series, &self.policy) {
                by_ticker.insert(Arc::from(series.ticker.as_str()), category);
            }
        }
        for seed in &self.seed_series {
            by_ticker
                .entry(Arc::from(seed.as_str()))
                .or_insert_with(|| self.policy.category_for(seed));
        }

        let mut discovered: Vec<MentionSeries> = by_ticker
            .into_iter()
            .map(|(ticker, category)| MentionSeries { ticker, category })
            .collect();
        discovered.sort_by(|a, b| a.ticker.cmp(&b.ticker));

        info!("[CATALOG] Mention series discovered: {} (exchange lists {} series)",
              discovered.len(), all.len());

        self.known_series = discovered.iter().map(|s| s.ticker.clone()).collect();
        self.series_cache.insert((), discovered.clone(), now);
        Ok(discovered)
    }

    /// Open markets for one series, annotated with category and milestone start
    pub async fn list_open_markets<E: Exchange>(&mut self, exchange: &E, series: &MentionSeries, now: DateTime<Utc>) -> ExchangeResult<Vec<Market>> {
        let mut raw: Vec<KalshiMarket> = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_MARKET_PAGES {
            let page = exchange.get_markets(&series.ticker, cursor.as_deref()).await?;
            let done = page.markets.is_empty();
            raw.extend(page.markets);
            cursor = page.cursor.filter(|c| !c.is_empty());
            if done || cursor.is_none() {
                break;
            }
        }

        let mut markets = Vec::with_capacity(raw.len());
        for m in raw {
            if !is_open_status(m.status.as_deref()) {
                continue;
            }
            let event_ticker = if m.event_ticker.is_empty() {
                event_of_ticker(&m.ticker).to_string()
            } else {
                m.event_ticker
            };
            let event_start = self.get_milestone(exchange, &series.ticker, &event_ticker, now).await;

            markets.push(Market {
                ticker: Arc::from(m.ticker.as_str()),
                event_ticker: Arc::from(event_ticker.as_str()),
                series_ticker: series.ticker.clone(),
                category: series.category.clone(),
                title: Arc::from(m.title.as_str()),
                yes_bid: m.yes_bid,
                yes_ask: m.yes_ask,
                no_bid: m.no_bid,
                no_ask: m.no_ask,
                event_start,
            });
        }

        debug!("[CATALOG] {}: {} open markets", series.ticker, markets.len());
        Ok(markets)
    }

    /// Start time of the event's milestone. A failed fetch yields None and is
    /// not retried for the rest of this refresh; the next refresh tries again.
    pub async fn get_milestone<E: Exchange>(&mut self, exchange: &E, series_ticker: &str, event_ticker: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.milestones.get(series_ticker, now).is_none() {
            if self.failed_milestones.contains(series_ticker) {
                return None;
            }
            match exchange.get_milestones(series_ticker).await {
                Ok(milestones) => {
                    let map = build_milestone_map(&milestones);
                    debug!("[CATALOG] {}: {} events with start times", series_ticker, map.len());
                    self.milestones.insert(Arc::from(series_ticker), map, now);
                }
                Err(e) => {
                    warn!("[CATALOG] Milestone fetch failed for {}: {}", series_ticker, e);
                    self.failed_milestones.insert(Arc::from(series_ticker));
                    return None;
                }
            }
        }

        self.milestones
            .get(series_ticker, now)
            .and_then(|map| map.get(event_ticker))
            .copied()
    }

    /// Discovery followed by listing of every series in discovery order.
    /// Discovery failure aborts; a failed series is skipped.
    pub async fn refresh<E: Exchange>(&mut self, exchange: &E, now: DateTime<Utc>) -> ExchangeResult<Vec<Market>> {
        let series = self.discover_series(exchange, now).await?;
        self.milestones.purge(now);
        self.failed_milestones.clear();

        let mut markets = Vec::new();
        let mut failed = 0usize;
        for s in &series {
            match self.list_open_markets(exchange, s, now).await {
                Ok(found) => markets.extend(found),
                Err(e) => {
                    failed += 1;
                    warn!("[CATALOG] Listing failed for {}: {}", s.ticker, e);
                }
            }
        }

        info!("[CATALOG] {} open markets across {} series ({} failed)", markets.len(), series.len(), failed);
        Ok(markets)
    }

    /// Whether a ticker belongs to one of our discovered series
    pub fn owns_ticker(&self, ticker: &str) -> bool {
        self.known_series.contains(series_of_ticker(ticker))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::default_policy_table;

    fn series(ticker: &str, title: &str) -> KalshiSeries {
        KalshiSeries { ticker: ticker.into(), title: title.into(), category: None }
    }

    #[test]
    fn test_classify_by_ticker() {
        let policy = default_policy_table();
        assert_eq!(classify_series(&series("KXTRUMPMENTION", "Trump remarks"), &policy).as_deref(), Some("trump"));
        assert_eq!(classify_series(&series("KXNCAAMENTION", ""), &policy).as_deref(), Some("ncaa"));
        assert_eq!(classify_series(&series("KXNFLMENTION", ""), &policy).as_deref(), Some("default"));
    }

    #[test]
    fn test_classify_by_title() {
        let policy = default_policy_table();
        assert_eq!(
            classify_series(&series("KXDEBATEWORDS", "What will the candidates say during the debate?"), &policy).as_deref(),
            Some("default")
        );
        assert_eq!(classify_series(&series("KXBTC", "Bitcoin price today"), &policy), None);
    }

    #[test]
    fn test_milestone_primary_precedence() {
        let earlier = KalshiMilestone {
            start_date: Some("2025-10-19T18:00:00Z".into()),
            related_event_tickers: vec!["KXTRUMPMENTION-25OCT19".into()],
            ..Default::default()
        };
        let primary = KalshiMilestone {
            start_date: Some("2025-10-19T20:00:00Z".into()),
            primary_event_tickers: vec!["KXTRUMPMENTION-25OCT19".into()],
            ..Default::default()
        };
        let no_start = KalshiMilestone {
            start_date: None,
            primary_event_tickers: vec!["KXNFLMENTION-25OCT19".into()],
            ..Default::default()
        };

        let map = build_milestone_map(&[earlier, primary, no_start]);
        assert_eq!(map["KXTRUMPMENTION-25OCT19"], parse_ts("2025-10-19T20:00:00Z").unwrap());
        assert!(!map.contains_key("KXNFLMENTION-25OCT19"));
    }

    #[test]
    fn test_open_status() {
        assert!(is_open_status(None));
        assert!(is_open_status(Some("active")));
        assert!(!is_open_status(Some("settled")));
    }
}
