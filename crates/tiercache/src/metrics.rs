//! Cache metrics.
//!
//! Everything goes through the `metrics` facade; the embedding process
//! installs whatever recorder it exports with. Without a recorder every call
//! here is a no-op.

use std::sync::Once;
use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use tiercache_core::cache::CircuitState;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_GETS_TOTAL: &str = "tiercache_cache_gets_total";
    pub const CACHE_REFRESH_TOTAL: &str = "tiercache_cache_refresh_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "tiercache_cache_evictions_total";
    pub const CACHE_CLEARS_TOTAL: &str = "tiercache_cache_clears_total";
    pub const CACHE_INFLIGHT: &str = "tiercache_cache_inflight";
    pub const CACHE_LOADER_SECONDS: &str = "tiercache_cache_loader_seconds";

    pub const INVALIDATION_PUBLISH_FAILURES_TOTAL: &str =
        "tiercache_invalidation_publish_failures_total";
    pub const INVALIDATION_MESSAGES_TOTAL: &str = "tiercache_invalidation_messages_total";

    pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "tiercache_circuit_transitions_total";
    pub const CIRCUIT_STATE: &str = "tiercache_circuit_state";
}

/// Cache level a lookup was answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    L1,
    L2,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::L1 => "l1",
            Level::L2 => "l2",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Hit => "hit",
            Outcome::Miss => "miss",
        }
    }
}

/// Lifecycle step of a single-flight load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPhase {
    Started,
    Success,
    Failure,
    DuplicateSuppressed,
}

impl RefreshPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshPhase::Started => "started",
            RefreshPhase::Success => "success",
            RefreshPhase::Failure => "failure",
            RefreshPhase::DuplicateSuppressed => "duplicate_suppressed",
        }
    }
}

/// Metric handle bound to one logical cache.
#[derive(Debug, Clone)]
pub struct CacheMetrics {
    cache: String,
}

impl CacheMetrics {
    pub fn new(cache: &str) -> Self {
        describe_metrics();
        Self {
            cache: cache.to_string(),
        }
    }

    pub fn lookup(&self, level: Level, outcome: Outcome) {
        counter!(
            names::CACHE_GETS_TOTAL,
            "cache" => self.cache.clone(),
            "level" => level.as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    pub fn refresh(&self, phase: RefreshPhase) {
        counter!(
            names::CACHE_REFRESH_TOTAL,
            "cache" => self.cache.clone(),
            "phase" => phase.as_str()
        )
        .increment(1);
    }

    pub fn eviction(&self) {
        counter!(names::CACHE_EVICTIONS_TOTAL, "cache" => self.cache.clone()).increment(1);
    }

    pub fn clear(&self) {
        counter!(names::CACHE_CLEARS_TOTAL, "cache" => self.cache.clone()).increment(1);
    }

    pub fn in_flight(&self, count: usize) {
        gauge!(names::CACHE_INFLIGHT, "cache" => self.cache.clone()).set(count as f64);
    }

    pub fn loader_duration(&self, elapsed: Duration) {
        histogram!(names::CACHE_LOADER_SECONDS, "cache" => self.cache.clone())
            .record(elapsed.as_secs_f64());
    }
}

/// Record an invalidation message that could not be published.
pub fn record_publish_failure(operation: &'static str) {
    counter!(
        names::INVALIDATION_PUBLISH_FAILURES_TOTAL,
        "operation" => operation
    )
    .increment(1);
}

/// Record an incoming invalidation message, `applied` or `ignored`.
pub fn record_invalidation_message(outcome: &'static str) {
    counter!(names::INVALIDATION_MESSAGES_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a circuit breaker state change.
pub fn record_circuit_transition(breaker: &str, to: CircuitState) {
    counter!(
        names::CIRCUIT_TRANSITIONS_TOTAL,
        "breaker" => breaker.to_string(),
        "to" => to.as_str()
    )
    .increment(1);
    gauge!(names::CIRCUIT_STATE, "breaker" => breaker.to_string()).set(to.as_gauge());
}

/// Register descriptions with the installed recorder. Runs once per process.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            names::CACHE_GETS_TOTAL,
            Unit::Count,
            "Cache lookups by level and outcome."
        );
        describe_counter!(
            names::CACHE_REFRESH_TOTAL,
            Unit::Count,
            "Single-flight loads by phase."
        );
        describe_counter!(
            names::CACHE_EVICTIONS_TOTAL,
            Unit::Count,
            "Explicit key evictions."
        );
        describe_counter!(names::CACHE_CLEARS_TOTAL, Unit::Count, "Full cache clears.");
        describe_gauge!(
            names::CACHE_INFLIGHT,
            Unit::Count,
            "Loads currently executing."
        );
        describe_histogram!(
            names::CACHE_LOADER_SECONDS,
            Unit::Seconds,
            "Loader latency in seconds."
        );
        describe_counter!(
            names::INVALIDATION_PUBLISH_FAILURES_TOTAL,
            Unit::Count,
            "Invalidation messages dropped because publishing failed."
        );
        describe_counter!(
            names::INVALIDATION_MESSAGES_TOTAL,
            Unit::Count,
            "Invalidation messages received, applied or ignored."
        );
        describe_counter!(
            names::CIRCUIT_TRANSITIONS_TOTAL,
            Unit::Count,
            "Circuit breaker state changes."
        );
        describe_gauge!(
            names::CIRCUIT_STATE,
            "Circuit breaker state: 0 closed, 1 open, 2 half-open."
        );
    });
}
