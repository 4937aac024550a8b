//! Circuit breaker around the shared store.
//!
//! Wraps every L2 operation in [`CircuitBreaker::call`]. While the breaker is
//! open calls fail with `CacheError::CircuitOpen` without touching the
//! network. Calls exceeding the optional call timeout count as failures.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tiercache_core::cache::{
    BreakerMachine, BreakerSettings, CacheEntry, CacheError, CircuitState, Result, Store,
    StoreProvider, Transition,
};

use crate::metrics::record_circuit_transition;

/// Default breaker name, shared by every L2 store of a process.
pub const DEFAULT_BREAKER_NAME: &str = "cacheL2";

/// Async circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    machine: Mutex<BreakerMachine>,
    call_timeout: Option<Duration>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            name: name.into(),
            machine: Mutex::new(BreakerMachine::new(settings)),
            call_timeout: None,
        }
    }

    /// Fails calls that take longer than `timeout` with `CacheError::Timeout`.
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout.filter(|d| !d.is_zero());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state()
    }

    /// Runs `call` through the breaker.
    pub async fn call<T, F>(&self, store: &str, operation: &str, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let admission = self.lock().try_acquire(Instant::now());
        self.observe(admission.transition);
        if !admission.permitted {
            tracing::trace!(breaker = %self.name, store, operation, "Circuit open, call rejected");
            return Err(CacheError::CircuitOpen {
                breaker: self.name.clone(),
            });
        }

        let generation = admission.generation;
        let mut permit = Permit {
            breaker: self,
            generation,
            settled: false,
        };

        let result = match self.call_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(CacheError::Timeout {
                    store: store.to_string(),
                    operation: operation.to_string(),
                }),
            },
            None => call.await,
        };
        permit.settled = true;

        let now = Instant::now();
        let transition = {
            let mut machine = self.lock();
            match &result {
                Ok(_) => machine.on_success(generation, now),
                // A payload that fails to decode says nothing about store health.
                Err(CacheError::Serialization(_)) => {
                    machine.release(generation);
                    None
                }
                Err(_) => machine.on_failure(generation, now),
            }
        };
        self.observe(transition);

        result
    }

    fn lock(&self) -> MutexGuard<'_, BreakerMachine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn observe(&self, transition: Option<Transition>) {
        let Some(Transition { from, to }) = transition else {
            return;
        };
        match to {
            CircuitState::Open => {
                tracing::warn!(breaker = %self.name, %from, %to, "Circuit breaker opened")
            }
            CircuitState::HalfOpen => {
                tracing::info!(breaker = %self.name, %from, %to, "Circuit breaker half-open")
            }
            CircuitState::Closed => {
                tracing::info!(breaker = %self.name, %from, %to, "Circuit breaker closed")
            }
        }
        record_circuit_transition(&self.name, to);
    }
}

/// Hands a half-open permit back when a call is dropped before it settles.
struct Permit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    settled: bool,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.lock().release(self.generation);
        }
    }
}

/// A [`Store`] whose every operation goes through a [`CircuitBreaker`].
pub struct BreakerStore {
    inner: Arc<dyn Store>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerStore {
    pub fn new(inner: Arc<dyn Store>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl Store for BreakerStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        self.breaker
            .call(self.inner.name(), "get", self.inner.get(key))
            .await
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<()> {
        self.breaker
            .call(self.inner.name(), "put", self.inner.put(key, entry))
            .await
    }

    async fn evict(&self, key: &str) -> Result<()> {
        self.breaker
            .call(self.inner.name(), "evict", self.inner.evict(key))
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.breaker
            .call(self.inner.name(), "clear", self.inner.clear())
            .await
    }
}

/// Wraps every store of a provider with one shared breaker.
pub struct BreakerStoreProvider {
    inner: Arc<dyn StoreProvider>,
    breaker: Arc<CircuitBreaker>,
}

impl BreakerStoreProvider {
    pub fn new(inner: Arc<dyn StoreProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

impl StoreProvider for BreakerStoreProvider {
    fn store(&self, name: &str) -> Option<Arc<dyn Store>> {
        self.inner.store(name).map(|store| {
            Arc::new(BreakerStore::new(store, Arc::clone(&self.breaker))) as Arc<dyn Store>
        })
    }

    fn names(&self) -> Vec<String> {
        self.inner.names()
    }
}
