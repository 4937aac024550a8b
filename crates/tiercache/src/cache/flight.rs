//! Single-flight load coordination.
//!
//! At most one load per key runs at a time on this instance. The first
//! caller registers a shared future and spawns the load; everyone arriving
//! while it runs attaches to the same future. The registration is removed
//! when the load task ends, whether it returned, failed or panicked.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tokio::sync::oneshot;

use tiercache_core::cache::{CacheError, Result};

use crate::metrics::{CacheMetrics, RefreshPhase};

/// Outcome of a load, cloneable for every waiter.
pub type SharedLoad = Shared<BoxFuture<'static, Result<Option<Value>>>>;

/// How a caller got hold of a load.
#[derive(Clone)]
pub enum Flight {
    /// This caller spawned the load.
    Started(SharedLoad),
    /// A load for the key was already running.
    Joined(SharedLoad),
}

impl Flight {
    pub fn is_started(&self) -> bool {
        matches!(self, Flight::Started(_))
    }

    pub fn into_future(self) -> SharedLoad {
        match self {
            Flight::Started(load) | Flight::Joined(load) => load,
        }
    }
}

struct InFlight {
    id: u64,
    load: SharedLoad,
}

/// Per-key registry of running loads for one logical cache.
pub struct RefreshCoordinator {
    flights: Arc<DashMap<String, InFlight>>,
    next_id: AtomicU64,
    metrics: CacheMetrics,
}

impl RefreshCoordinator {
    pub fn new(metrics: CacheMetrics) -> Self {
        Self {
            flights: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            metrics,
        }
    }

    /// Number of loads currently running.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Joins the running load for `key`, or spawns `make_load()` as a new one.
    ///
    /// `make_load` is only called when this caller wins the registration.
    /// Must be called from within a tokio runtime.
    pub fn trigger<F>(&self, key: &str, make_load: F) -> Flight
    where
        F: FnOnce() -> BoxFuture<'static, Result<Option<Value>>>,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let load: SharedLoad = {
            let key = key.to_string();
            async move {
                rx.await.unwrap_or_else(|_| {
                    Err(CacheError::RetrievalFailed {
                        key,
                        cause: "load task aborted".to_string(),
                    })
                })
            }
            .boxed()
            .shared()
        };

        match self.flights.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                self.metrics.refresh(RefreshPhase::DuplicateSuppressed);
                tracing::trace!(key, "Joined in-flight load");
                return Flight::Joined(existing.get().load.clone());
            }
            Entry::Vacant(slot) => {
                slot.insert(InFlight {
                    id,
                    load: load.clone(),
                });
            }
        }
        self.metrics.in_flight(self.flights.len());
        self.metrics.refresh(RefreshPhase::Started);

        let guard = FlightGuard {
            flights: Arc::clone(&self.flights),
            key: key.to_string(),
            id,
            metrics: self.metrics.clone(),
        };
        let work = make_load();

        tokio::spawn(async move {
            let result = work.await;
            drop(guard);
            let _ = tx.send(result);
        });

        Flight::Started(load)
    }
}

/// Removes a registration when its load task ends.
struct FlightGuard {
    flights: Arc<DashMap<String, InFlight>>,
    key: String,
    id: u64,
    metrics: CacheMetrics,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flights
            .remove_if(&self.key, |_, flight| flight.id == self.id);
        self.metrics.in_flight(self.flights.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    fn coordinator() -> RefreshCoordinator {
        RefreshCoordinator::new(CacheMetrics::new("price"))
    }

    #[tokio::test]
    async fn test_single_load_per_key() {
        let coordinator = coordinator();
        let release = Arc::new(Notify::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let make = || {
            let release = Arc::clone(&release);
            let calls = Arc::clone(&calls);
            move || {
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    release.notified().await;
                    Ok::<_, CacheError>(Some(json!(42)))
                }
                .boxed()
            }
        };

        let first = coordinator.trigger("p1", make());
        let second = coordinator.trigger("p1", make());
        assert!(first.is_started());
        assert!(!second.is_started());
        assert_eq!(coordinator.in_flight(), 1);

        release.notify_one();
        let (a, b) = tokio::join!(first.into_future(), second.into_future());

        assert_eq!(a, Ok(Some(json!(42))));
        assert_eq!(b, Ok(Some(json!(42))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registration_removed_after_completion() {
        let coordinator = coordinator();

        let flight = coordinator.trigger("p1", || {
            async { Ok::<_, CacheError>(Some(json!(1))) }.boxed()
        });
        flight.into_future().await.unwrap();

        assert_eq!(coordinator.in_flight(), 0);
        let next = coordinator.trigger("p1", || {
            async { Ok::<_, CacheError>(Some(json!(2))) }.boxed()
        });
        assert!(next.is_started());
        assert_eq!(next.into_future().await, Ok(Some(json!(2))));
    }

    #[tokio::test]
    async fn test_registration_removed_after_failure() {
        let coordinator = coordinator();

        let flight = coordinator.trigger("p1", || {
            async {
                Err::<Option<Value>, _>(CacheError::RetrievalFailed {
                    key: "p1".to_string(),
                    cause: "boom".to_string(),
                })
            }
            .boxed()
        });

        assert!(flight.into_future().await.is_err());
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_registration_removed_after_panic() {
        let coordinator = coordinator();

        let flight = coordinator.trigger("p1", || async { panic!("loader exploded") }.boxed());

        let result = flight.into_future().await;
        assert!(matches!(result, Err(CacheError::RetrievalFailed { .. })));

        // The guard runs during unwinding; give the runtime a moment.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let coordinator = coordinator();

        let a = coordinator.trigger("p1", || {
            async { Ok::<_, CacheError>(Some(json!("a"))) }.boxed()
        });
        let b = coordinator.trigger("p2", || {
            async { Ok::<_, CacheError>(Some(json!("b"))) }.boxed()
        });

        assert!(a.is_started());
        assert!(b.is_started());
        assert_eq!(a.into_future().await, Ok(Some(json!("a"))));
        assert_eq!(b.into_future().await, Ok(Some(json!("b"))));
    }
}
