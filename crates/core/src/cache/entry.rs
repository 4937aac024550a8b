use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Smallest soft TTL handed out when stale-while-revalidate is enabled.
pub const MIN_SOFT_TTL: Duration = Duration::from_millis(1);

/// A stored value together with the moment it was written.
///
/// `value == None` is the explicit "no value" marker: the key was cached as
/// holding nothing, which is different from the key being absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Option<Value>,
    pub written_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Wraps a value with the current time.
    pub fn new(value: Option<Value>) -> Self {
        Self::with_timestamp(value, Utc::now())
    }

    pub fn with_timestamp(value: Option<Value>, written_at: DateTime<Utc>) -> Self {
        Self { value, written_at }
    }

    /// Time elapsed since the entry was written. Entries written in the future
    /// (clock skew between instances) have zero age.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.written_at).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true once the entry is at least `soft_ttl` old.
    ///
    /// `None` disables staleness: every entry is fresh.
    pub fn is_stale(&self, soft_ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        soft_ttl.is_some_and(|ttl| self.age(now) >= ttl)
    }
}

/// Derives the soft TTL from the hard L1 TTL.
///
/// Returns `None` when either the TTL or the fraction is zero, which turns
/// stale-while-revalidate off. Fractions above one are clamped to one.
pub fn soft_ttl(l1_ttl: Duration, fraction: f64) -> Option<Duration> {
    if l1_ttl.is_zero() || !(fraction > 0.0) {
        return None;
    }
    Some(l1_ttl.mul_f64(fraction.min(1.0)).max(MIN_SOFT_TTL))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;

    #[test]
    fn test_fresh_entry_is_not_stale() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(Some(json!(1)), now - TimeDelta::seconds(4));

        assert!(!entry.is_stale(Some(Duration::from_secs(5)), now));
    }

    #[test]
    fn test_entry_at_soft_ttl_is_stale() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(Some(json!(1)), now - TimeDelta::seconds(5));

        assert!(entry.is_stale(Some(Duration::from_secs(5)), now));
    }

    #[test]
    fn test_disabled_soft_ttl_never_stale() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(Some(json!(1)), now - TimeDelta::days(30));

        assert!(!entry.is_stale(None, now));
    }

    #[test]
    fn test_future_entry_has_zero_age() {
        let now = Utc::now();
        let entry = CacheEntry::with_timestamp(None, now + TimeDelta::seconds(10));

        assert_eq!(entry.age(now), Duration::ZERO);
    }

    #[test]
    fn test_soft_ttl_default_fraction() {
        assert_eq!(
            soft_ttl(Duration::from_secs(600), 0.8),
            Some(Duration::from_secs(480))
        );
    }

    #[test]
    fn test_soft_ttl_disabled() {
        assert_eq!(soft_ttl(Duration::ZERO, 0.8), None);
        assert_eq!(soft_ttl(Duration::from_secs(600), 0.0), None);
        assert_eq!(soft_ttl(Duration::from_secs(600), f64::NAN), None);
    }

    #[test]
    fn test_soft_ttl_clamped() {
        assert_eq!(soft_ttl(Duration::from_nanos(10), 0.5), Some(MIN_SOFT_TTL));
        assert_eq!(
            soft_ttl(Duration::from_secs(10), 3.0),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_null_marker_serializes() {
        let entry = CacheEntry::new(None);
        let json = serde_json::to_string(&entry).unwrap();
        let parsed: CacheEntry = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.value, None);
        assert_eq!(parsed.written_at, entry.written_at);
    }
}
