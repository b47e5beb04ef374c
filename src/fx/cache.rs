//! FX rate cache.
//!
//! Keyed by `(base, sorted targets, minute-truncated timestamp)`: sorting
//! makes the key invariant under caller ordering, minute truncation
//! coalesces lookups inside the same minute. Entries expire on wall time;
//! reads hand out defensive copies so callers never alias cache innards.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FxKey {
    base: String,
    targets: Vec<String>,
    minute_epoch: i64,
}

impl FxKey {
    pub fn new(base: &str, targets: &[String], at: DateTime<Utc>) -> Self {
        let mut targets: Vec<String> = targets.iter().map(|t| t.to_uppercase()).collect();
        targets.sort();
        targets.dedup();
        Self {
            base: base.to_uppercase(),
            targets,
            minute_epoch: at.timestamp() - at.timestamp().rem_euclid(60),
        }
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }
}

#[derive(Debug, Clone)]
pub struct FxEntry {
    pub rates: HashMap<String, Decimal>,
    pub as_of: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct FxCache {
    ttl: chrono::Duration,
    entries: RwLock<HashMap<FxKey, FxEntry>>,
}

impl FxCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(60)),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Copy-out lookup; expired entries read as misses.
    pub fn get(&self, key: &FxKey, now: DateTime<Utc>) -> Option<FxEntry> {
        let entries = self.entries.read();
        let entry = entries.get(key)?;
        if now >= entry.expires_at {
            return None;
        }
        Some(entry.clone())
    }

    pub fn insert(
        &self,
        key: FxKey,
        rates: HashMap<String, Decimal>,
        as_of: DateTime<Utc>,
        now: DateTime<Utc>,
    ) {
        let entry = FxEntry {
            rates,
            as_of,
            expires_at: now + self.ttl,
        };
        self.entries.write().insert(key, entry);
    }

    /// Drop expired entries; callers may run this periodically.
    pub fn evict_expired(&self, now: DateTime<Utc>) {
        self.entries.write().retain(|_, e| now < e.expires_at);
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn rates() -> HashMap<String, Decimal> {
        let mut map = HashMap::new();
        map.insert("USD".to_string(), Decimal::new(110_000_000, 8).unwrap());
        map
    }

    #[test]
    fn test_key_invariant_under_permutation() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 12, 30, 15).unwrap();
        let a = FxKey::new(
            "EUR",
            &["USD".to_string(), "GBP".to_string(), "JPY".to_string()],
            at,
        );
        let b = FxKey::new(
            "EUR",
            &["JPY".to_string(), "USD".to_string(), "GBP".to_string()],
            at,
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_minute_truncation() {
        let base = Utc.with_ymd_and_hms(2024, 1, 2, 12, 30, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 2, 12, 30, 59).unwrap();
        let next_minute = Utc.with_ymd_and_hms(2024, 1, 2, 12, 31, 0).unwrap();
        let targets = vec!["USD".to_string()];
        assert_eq!(
            FxKey::new("EUR", &targets, base),
            FxKey::new("EUR", &targets, later)
        );
        assert_ne!(
            FxKey::new("EUR", &targets, base),
            FxKey::new("EUR", &targets, next_minute)
        );
    }

    #[test]
    fn test_expiry() {
        let cache = FxCache::new(Duration::from_secs(60));
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let key = FxKey::new("EUR", &["USD".to_string()], at);
        cache.insert(key.clone(), rates(), at, at);

        assert!(cache.get(&key, at + chrono::Duration::seconds(30)).is_some());
        assert!(cache.get(&key, at + chrono::Duration::seconds(61)).is_none());
    }

    #[test]
    fn test_defensive_copy() {
        let cache = FxCache::new(Duration::from_secs(60));
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let key = FxKey::new("EUR", &["USD".to_string()], at);
        cache.insert(key.clone(), rates(), at, at);

        let mut copy = cache.get(&key, at).unwrap();
        copy.rates.insert("USD".to_string(), Decimal::new(1, 0).unwrap());
        // The cached entry is unchanged.
        let fresh = cache.get(&key, at).unwrap();
        assert_eq!(fresh.rates["USD"].scaled, 110_000_000);
    }
}
