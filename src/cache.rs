// src/cache.rs
// Time-bounded lookup cache for series and milestone data

use chrono::{DateTime, Duration, Utc};
use rustc_hash::FxHashMap;
use std::borrow::Borrow;
use std::hash::Hash;

/// Map whose entries go stale `ttl` after insertion.
/// Time is always supplied by the caller so expiry is deterministic.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: FxHashMap<K, (DateTime<Utc>, V)>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: FxHashMap::default() }
    }

    /// Fresh value for `key`, or None if missing or expired
    pub fn get<Q>(&self, key: &Q, now: DateTime<Utc>) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries
            .get(key)
            .filter(|(stored_at, _)| now - *stored_at < self.ttl)
            .map(|(_, value)| value)
    }

    pub fn insert(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(key, (now, value));
    }

    /// Drop entries that are no longer fresh
    pub fn purge(&mut self, now: DateTime<Utc>) {
        let ttl = self.ttl;
        self.entries.retain(|_, (stored_at, _)| now - *stored_at < ttl);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_entry_expires_after_ttl() {
        let t0 = Utc.with_ymd_and_hms(2025, 10, 19, 12, 0, 0).unwrap();
        let mut cache: TtlCache<String, u32> = TtlCache::new(Duration::minutes(10));
        cache.insert("KXTRUMPMENTION".to_string(), 7, t0);

        assert_eq!(cache.get("KXTRUMPMENTION", t0 + Duration::minutes(9)), Some(&7));
        assert_eq!(cache.get("KXTRUMPMENTION", t0 + Duration::minutes(10)), None);
        assert_eq!(cache.get("KXNFLMENTION", t0), None);
    }

    #[test]
    fn test_purge_drops_stale() {
        let t0 = Utc.with_ymd_and_hms(2025, 10, 19, 12, 0, 0).unwrap();
        let mut cache: TtlCache<&'static str, u32> = TtlCache::new(Duration::minutes(10));
        cache.insert("old", 1, t0);
        cache.insert("new", 2, t0 + Duration::minutes(8));

        cache.purge(t0 + Duration::minutes(12));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("new", t0 + Duration::minutes(12)), Some(&2));
    }
}
