//! In-memory pub/sub transport.
//!
//! Delivers invalidation payloads between components of one process using
//! tokio broadcast channels. Stands in for Redis in single-instance
//! deployments and tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use tiercache_core::cache::{PubSubTransport, Result};

/// Channel capacity for pub/sub messages.
const CHANNEL_CAPACITY: usize = 100;

/// In-memory pub/sub transport with one broadcast channel per channel name.
#[derive(Debug, Clone)]
pub struct MemoryPubSub {
    channels: Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>,
}

impl MemoryPubSub {
    /// Creates a new empty pub/sub instance.
    pub fn new() -> Self {
        Self {
            channels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Gets or creates the sender for `channel`.
    async fn get_or_create_channel(&self, channel: &str) -> broadcast::Sender<String> {
        // Try read lock first to avoid write contention
        {
            let channels = self.channels.read().await;
            if let Some(sender) = channels.get(channel) {
                return sender.clone();
            }
        }

        let mut channels = self.channels.write().await;

        // Double-check after acquiring write lock
        if let Some(sender) = channels.get(channel) {
            return sender.clone();
        }

        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        channels.insert(channel.to_string(), sender.clone());
        sender
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubTransport for MemoryPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let sender = self.get_or_create_channel(channel).await;

        // No receivers just means nobody is listening yet.
        let _ = sender.send(payload.to_string());

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        let sender = self.get_or_create_channel(channel).await;
        Ok(sender.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_and_subscribe() {
        let pubsub = MemoryPubSub::new();

        let mut receiver = pubsub.subscribe("cache-invalidate").await.unwrap();
        pubsub
            .publish("cache-invalidate", "EVICT price p1")
            .await
            .unwrap();

        assert_eq!(receiver.recv().await.unwrap(), "EVICT price p1");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let pubsub = MemoryPubSub::new();

        let mut receiver1 = pubsub.subscribe("cache-invalidate").await.unwrap();
        let mut receiver2 = pubsub.subscribe("cache-invalidate").await.unwrap();
        pubsub.publish("cache-invalidate", "CLEAR_ALL").await.unwrap();

        assert_eq!(receiver1.recv().await.unwrap(), "CLEAR_ALL");
        assert_eq!(receiver2.recv().await.unwrap(), "CLEAR_ALL");
    }

    #[tokio::test]
    async fn test_channels_are_isolated() {
        let pubsub = MemoryPubSub::new();

        let mut receiver = pubsub.subscribe("a").await.unwrap();
        pubsub.publish("b", "CLEAR price").await.unwrap();
        pubsub.publish("a", "CLEAR stock").await.unwrap();

        assert_eq!(receiver.recv().await.unwrap(), "CLEAR stock");
    }

    #[tokio::test]
    async fn test_publish_no_subscribers() {
        let pubsub = MemoryPubSub::new();
        assert!(pubsub.publish("cache-invalidate", "CLEAR_ALL").await.is_ok());
    }

    #[tokio::test]
    async fn test_channel_reuse() {
        let pubsub = MemoryPubSub::new();

        let _receiver1 = pubsub.subscribe("cache-invalidate").await.unwrap();
        let _receiver2 = pubsub.subscribe("cache-invalidate").await.unwrap();

        let channels = pubsub.channels.read().await;
        assert_eq!(channels.len(), 1);
    }
}
