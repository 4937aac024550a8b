//! Redis pub/sub transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::{broadcast, RwLock};

use tiercache_core::cache::{CacheError, PubSubTransport, Result};

use super::error::map_redis_error;

/// Channel capacity for forwarded messages.
const CHANNEL_CAPACITY: usize = 100;

type Subscriptions = Arc<RwLock<HashMap<String, broadcast::Sender<String>>>>;

/// Redis pub/sub transport for invalidation messages.
///
/// One Redis subscription per channel is shared by every local receiver.
/// When the Redis stream ends the broadcast sender is dropped, receivers see
/// `Closed` and are expected to subscribe again.
pub struct RedisPubSub {
    client: redis::Client,
    subscriptions: Subscriptions,
}

impl RedisPubSub {
    /// Creates a new Redis pub/sub connection.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    ///
    /// # Errors
    ///
    /// Returns `CacheError::ConnectionFailed` if the connection cannot be established.
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;

        // Verify connection by getting a connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        Ok(Self {
            client,
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
        })
    }
}

#[async_trait]
impl PubSubTransport for RedisPubSub {
    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e| CacheError::PublishFailed(e.to_string()))?;

        Ok(())
    }

    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>> {
        {
            let subscriptions = self.subscriptions.read().await;
            if let Some(sender) = subscriptions.get(channel) {
                return Ok(sender.subscribe());
            }
        }

        // Subscribe on Redis before registering so failures reach the caller.
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_error)?;
        pubsub.subscribe(channel).await.map_err(map_redis_error)?;

        let (tx, rx) = broadcast::channel(CHANNEL_CAPACITY);
        {
            let mut subscriptions = self.subscriptions.write().await;
            // Double-check in case another task subscribed meanwhile
            if let Some(sender) = subscriptions.get(channel) {
                return Ok(sender.subscribe());
            }
            subscriptions.insert(channel.to_string(), tx.clone());
        }

        let channel = channel.to_string();
        let subscriptions = Arc::clone(&self.subscriptions);

        tokio::spawn(async move {
            let mut stream = pubsub.on_message();

            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    // Ignore send errors (no receivers)
                    Ok(payload) => {
                        let _ = tx.send(payload);
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "Failed to read pub/sub payload");
                    }
                }
            }

            tracing::info!(channel = %channel, "Redis subscription stream ended");

            // Drop the sender so receivers observe the closed channel.
            subscriptions.write().await.remove(&channel);
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Helper to get Redis URL from environment.
    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// Skip test if Redis not available.
    async fn get_test_pubsub() -> Option<RedisPubSub> {
        RedisPubSub::new(&redis_url()).await.ok()
    }

    fn unique_channel() -> String {
        format!(
            "cache-invalidate-test-{}",
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        )
    }

    #[tokio::test]
    async fn test_redis_pubsub_publish_and_receive() {
        let Some(pubsub) = get_test_pubsub().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };
        let channel = unique_channel();

        let mut rx = pubsub.subscribe(&channel).await.unwrap();
        pubsub.publish(&channel, "EVICT price p1").await.unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        match received {
            Ok(Ok(payload)) => assert_eq!(payload, "EVICT price p1"),
            Ok(Err(e)) => panic!("Receive error: {:?}", e),
            Err(_) => panic!("Timeout waiting for message"),
        }
    }

    #[tokio::test]
    async fn test_redis_pubsub_multiple_subscribers() {
        let Some(pubsub) = get_test_pubsub().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };
        let channel = unique_channel();

        let mut rx1 = pubsub.subscribe(&channel).await.unwrap();
        let mut rx2 = pubsub.subscribe(&channel).await.unwrap();
        pubsub.publish(&channel, "CLEAR_ALL").await.unwrap();

        let timeout = Duration::from_secs(2);
        assert!(tokio::time::timeout(timeout, rx1.recv()).await.is_ok());
        assert!(tokio::time::timeout(timeout, rx2.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn test_redis_pubsub_different_channels() {
        let Some(pubsub) = get_test_pubsub().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let mut rx = pubsub.subscribe(&unique_channel()).await.unwrap();
        pubsub.publish(&unique_channel(), "CLEAR_ALL").await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(
            received.is_err(),
            "Should not receive message for different channel"
        );
    }
}
