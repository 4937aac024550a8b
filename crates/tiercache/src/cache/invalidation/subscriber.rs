//! Invalidation subscriber.
//!
//! Applies bus messages to the local L1 registry. Never creates a store and
//! never fails: malformed or unknown messages are logged and ignored.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use tiercache_core::cache::{InvalidationMessage, PubSubTransport, Store};

use crate::cache::memory::MemoryStoreRegistry;
use crate::metrics::record_invalidation_message;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Applies invalidation messages to the L1 stores of this instance.
#[derive(Debug, Clone)]
pub struct InvalidationSubscriber {
    l1: Arc<MemoryStoreRegistry>,
}

impl InvalidationSubscriber {
    pub fn new(l1: Arc<MemoryStoreRegistry>) -> Self {
        Self { l1 }
    }

    /// Handles a raw text payload. Returns whether it was applied.
    pub async fn handle_message(&self, payload: Option<&str>) -> bool {
        let Some(payload) = payload else {
            tracing::warn!("Ignoring empty invalidation message");
            record_invalidation_message("ignored");
            return false;
        };

        match payload.trim().parse::<InvalidationMessage>() {
            Ok(message) => self.apply(&message).await,
            Err(err) => {
                tracing::warn!(payload, error = %err, "Ignoring invalidation message");
                record_invalidation_message("ignored");
                false
            }
        }
    }

    /// Handles a raw byte payload, decoded as lossy UTF-8.
    pub async fn handle_bytes(&self, payload: Option<&[u8]>) -> bool {
        match payload {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                self.handle_message(Some(&text)).await
            }
            None => self.handle_message(None).await,
        }
    }

    /// Applies a parsed message. Returns whether a local store was touched.
    pub async fn apply(&self, message: &InvalidationMessage) -> bool {
        let applied = match message {
            InvalidationMessage::ClearAll => {
                for store in self.l1.stores() {
                    if let Err(err) = store.clear().await {
                        tracing::warn!(cache = %store.name(), error = %err, "Failed to clear L1");
                    }
                }
                true
            }
            InvalidationMessage::Clear { cache } => match self.l1.lookup(cache) {
                Some(store) => {
                    if let Err(err) = store.clear().await {
                        tracing::warn!(cache = %cache, error = %err, "Failed to clear L1");
                    }
                    true
                }
                None => false,
            },
            InvalidationMessage::Evict { cache, key } => match self.l1.lookup(cache) {
                Some(store) => {
                    if let Err(err) = store.evict(key).await {
                        tracing::warn!(cache = %cache, key = %key, error = %err, "Failed to evict from L1");
                    }
                    true
                }
                None => false,
            },
        };

        if applied {
            tracing::debug!(%message, "Applied invalidation message");
            record_invalidation_message("applied");
        } else {
            tracing::debug!(%message, "No local cache for invalidation message");
            record_invalidation_message("ignored");
        }
        applied
    }

    /// Consumes `channel` until `shutdown` fires.
    ///
    /// Resubscribes with exponential backoff whenever the subscription cannot
    /// be established or the stream closes.
    pub async fn run(
        self,
        transport: Arc<dyn PubSubTransport>,
        channel: String,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match transport.subscribe(&channel).await {
                Ok(mut receiver) => {
                    tracing::info!(%channel, "Invalidation subscriber listening");
                    backoff = INITIAL_BACKOFF;

                    loop {
                        tokio::select! {
                            result = receiver.recv() => match result {
                                Ok(payload) => {
                                    self.handle_message(Some(&payload)).await;
                                }
                                Err(broadcast::error::RecvError::Lagged(n)) => {
                                    tracing::warn!(%channel, lagged = n, "Invalidation subscriber lagged");
                                }
                                Err(broadcast::error::RecvError::Closed) => {
                                    tracing::warn!(%channel, "Invalidation channel closed");
                                    break;
                                }
                            },
                            _ = shutdown.recv() => {
                                tracing::debug!(%channel, "Invalidation subscriber shutting down");
                                return;
                            }
                        }
                    }
                }
                Err(err) => {
                    tracing::error!(%channel, error = %err, "Failed to subscribe to invalidation channel");
                }
            }

            tracing::info!(%channel, delay_secs = backoff.as_secs(), "Resubscribing");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => return,
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Spawns [`Self::run`] on the current runtime.
    pub fn spawn(
        self,
        transport: Arc<dyn PubSubTransport>,
        channel: impl Into<String>,
        shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(transport, channel.into(), shutdown))
    }
}
