use std::{env, str::FromStr, time::Duration};

use tiercache_core::cache::{soft_ttl, BreakerSettings, DEFAULT_INVALIDATION_CHANNEL};

use crate::cache::L2FailurePolicy;

/// Cache configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Global switch; when off every cache is a no-op (default: true)
    pub enabled: bool,
    pub l1_enabled: bool,
    pub l2_enabled: bool,
    /// Maximum entries per L1 store (default: 10,000)
    pub l1_max_entries: usize,
    /// L1 write-based TTL in seconds (default: 600)
    pub l1_ttl_seconds: u64,
    /// L2 TTL in seconds (default: 3600)
    pub l2_ttl_seconds: u64,
    /// Fraction of the L1 TTL after which entries are refreshed in the
    /// background; 0 disables (default: 0.8)
    pub soft_ttl_fraction: f64,
    /// Fixed cache names; empty means caches are created on demand
    pub cache_names: Vec<String>,
    pub l2_failure_policy: L2FailurePolicy,
    /// Per-call L2 timeout in milliseconds; 0 disables (default: 500)
    pub l2_timeout_ms: u64,
    /// Breaker failure-rate threshold in percent (default: 50)
    pub cb_failure_rate: f64,
    pub cb_window_size: usize,
    pub cb_minimum_calls: usize,
    pub cb_open_seconds: u64,
    pub cb_half_open_calls: u32,
    pub invalidation_enabled: bool,
    /// Pub/sub channel for invalidation messages (default: "cache-invalidate")
    pub invalidation_channel: String,
    /// Redis connection URL (default: "redis://localhost:6379")
    /// Note: Only used when the `redis` feature is enabled.
    pub redis_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `CACHE_ENABLED` (default: true)
    /// - `CACHE_L1_ENABLED` (default: true)
    /// - `CACHE_L2_ENABLED` (default: true)
    /// - `CACHE_L1_MAX_ENTRIES` (default: 10,000)
    /// - `CACHE_L1_TTL_SECONDS` (default: 600)
    /// - `CACHE_L2_TTL_SECONDS` (default: 3600)
    /// - `CACHE_SOFT_TTL_FRACTION` (default: 0.8)
    /// - `CACHE_NAMES` - comma separated (default: empty)
    /// - `CACHE_L2_FAILURE_POLICY` - `propagate` or `degrade` (default: propagate)
    /// - `CACHE_L2_TIMEOUT_MS` (default: 500)
    /// - `CACHE_CB_FAILURE_RATE` (default: 50)
    /// - `CACHE_CB_WINDOW_SIZE` (default: 20)
    /// - `CACHE_CB_MINIMUM_CALLS` (default: 10)
    /// - `CACHE_CB_OPEN_SECONDS` (default: 30)
    /// - `CACHE_CB_HALF_OPEN_CALLS` (default: 3)
    /// - `CACHE_INVALIDATION_ENABLED` (default: true)
    /// - `CACHE_INVALIDATION_CHANNEL` (default: "cache-invalidate")
    /// - `REDIS_URL` (default: "redis://localhost:6379")
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::defaults();
        let flag = |key: &str, default: bool| {
            lookup(key)
                .and_then(|v| parse_bool(&v))
                .unwrap_or(default)
        };

        Self {
            enabled: flag("CACHE_ENABLED", defaults.enabled),
            l1_enabled: flag("CACHE_L1_ENABLED", defaults.l1_enabled),
            l2_enabled: flag("CACHE_L2_ENABLED", defaults.l2_enabled),
            l1_max_entries: parsed(&lookup, "CACHE_L1_MAX_ENTRIES")
                .unwrap_or(defaults.l1_max_entries),
            l1_ttl_seconds: parsed(&lookup, "CACHE_L1_TTL_SECONDS")
                .unwrap_or(defaults.l1_ttl_seconds),
            l2_ttl_seconds: parsed(&lookup, "CACHE_L2_TTL_SECONDS")
                .unwrap_or(defaults.l2_ttl_seconds),
            soft_ttl_fraction: lookup("CACHE_SOFT_TTL_FRACTION")
                .and_then(|v| v.trim().parse::<f64>().ok())
                .filter(|f| f.is_finite() && *f >= 0.0)
                .unwrap_or(defaults.soft_ttl_fraction),
            cache_names: lookup("CACHE_NAMES")
                .map(|v| parse_names(&v))
                .unwrap_or_default(),
            l2_failure_policy: parsed(&lookup, "CACHE_L2_FAILURE_POLICY")
                .unwrap_or(defaults.l2_failure_policy),
            l2_timeout_ms: parsed(&lookup, "CACHE_L2_TIMEOUT_MS").unwrap_or(defaults.l2_timeout_ms),
            cb_failure_rate: parsed(&lookup, "CACHE_CB_FAILURE_RATE")
                .unwrap_or(defaults.cb_failure_rate),
            cb_window_size: parsed(&lookup, "CACHE_CB_WINDOW_SIZE")
                .unwrap_or(defaults.cb_window_size),
            cb_minimum_calls: parsed(&lookup, "CACHE_CB_MINIMUM_CALLS")
                .unwrap_or(defaults.cb_minimum_calls),
            cb_open_seconds: parsed(&lookup, "CACHE_CB_OPEN_SECONDS")
                .unwrap_or(defaults.cb_open_seconds),
            cb_half_open_calls: parsed(&lookup, "CACHE_CB_HALF_OPEN_CALLS")
                .unwrap_or(defaults.cb_half_open_calls),
            invalidation_enabled: flag("CACHE_INVALIDATION_ENABLED", defaults.invalidation_enabled),
            invalidation_channel: lookup("CACHE_INVALIDATION_CHANNEL")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.invalidation_channel),
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
        }
    }

    fn defaults() -> Self {
        Self {
            enabled: true,
            l1_enabled: true,
            l2_enabled: true,
            l1_max_entries: 10_000,
            l1_ttl_seconds: 600,
            l2_ttl_seconds: 3600,
            soft_ttl_fraction: 0.8,
            cache_names: Vec::new(),
            l2_failure_policy: L2FailurePolicy::Propagate,
            l2_timeout_ms: 500,
            cb_failure_rate: 50.0,
            cb_window_size: 20,
            cb_minimum_calls: 10,
            cb_open_seconds: 30,
            cb_half_open_calls: 3,
            invalidation_enabled: true,
            invalidation_channel: DEFAULT_INVALIDATION_CHANNEL.to_string(),
            redis_url: "redis://localhost:6379".to_string(),
        }
    }

    pub fn l1_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_ttl_seconds)
    }

    pub fn l2_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_ttl_seconds)
    }

    /// Soft TTL derived from the L1 TTL, `None` when disabled.
    pub fn soft_ttl(&self) -> Option<Duration> {
        soft_ttl(self.l1_ttl(), self.soft_ttl_fraction)
    }

    pub fn l2_timeout(&self) -> Option<Duration> {
        (self.l2_timeout_ms > 0).then(|| Duration::from_millis(self.l2_timeout_ms))
    }

    pub fn breaker_settings(&self) -> BreakerSettings {
        BreakerSettings {
            failure_rate_threshold: self.cb_failure_rate,
            window_size: self.cb_window_size.max(1),
            minimum_calls: self.cb_minimum_calls.max(1),
            open_duration: Duration::from_secs(self.cb_open_seconds),
            half_open_calls: self.cb_half_open_calls.max(1),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::defaults()
    }
}

fn parsed<F, T>(lookup: &F, key: &str) -> Option<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(key).and_then(|v| v.trim().parse().ok())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_names(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}
