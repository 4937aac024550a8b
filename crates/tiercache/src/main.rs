use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::{signal, sync::broadcast};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tiercache::cache::{ChannelPublisher, InvalidationSubscriber, MemoryStoreRegistry, RedisPubSub};
use tiercache::{Config, InvalidationMessage};
use tiercache_core::cache::PubSubTransport;

/// tiercache - Operate the cache invalidation bus
#[derive(Parser, Debug)]
#[command(name = "tiercache")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Redis connection URL
    #[arg(long, default_value = "redis://localhost:6379", env = "REDIS_URL")]
    redis_url: String,

    /// Invalidation channel
    #[arg(
        long,
        short,
        default_value = "cache-invalidate",
        env = "CACHE_INVALIDATION_CHANNEL"
    )]
    channel: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply bus messages to a local L1 registry and log each one
    Listen,
    /// Evict one key from a cache on every instance
    Evict { cache: String, key: String },
    /// Clear one cache on every instance
    Clear { cache: String },
    /// Clear every cache on every instance
    ClearAll,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tiercache=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let transport: Arc<dyn PubSubTransport> = Arc::new(RedisPubSub::new(&cli.redis_url).await?);

    let message = match cli.command {
        Command::Listen => return listen(transport, cli.channel).await,
        Command::Evict { cache, key } => InvalidationMessage::evict(cache, key),
        Command::Clear { cache } => InvalidationMessage::clear(cache),
        Command::ClearAll => InvalidationMessage::ClearAll,
    };

    let publisher = ChannelPublisher::new(transport, cli.channel);
    publisher.send(&message).await?;
    tracing::info!(channel = %publisher.channel(), %message, "Message published");

    Ok(())
}

/// Runs a subscriber against an L1 registry built from the environment.
async fn listen(transport: Arc<dyn PubSubTransport>, channel: String) -> Result<()> {
    let config = Config::from_env();
    let l1 = if config.cache_names.is_empty() {
        MemoryStoreRegistry::dynamic(config.l1_max_entries, Some(config.l1_ttl()))
    } else {
        MemoryStoreRegistry::fixed(
            config.cache_names.iter().cloned(),
            config.l1_max_entries,
            Some(config.l1_ttl()),
        )
    };

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = InvalidationSubscriber::new(Arc::new(l1)).spawn(transport, channel, shutdown_rx);

    shutdown_signal().await;
    let _ = shutdown_tx.send(());
    handle.await?;

    tracing::info!("Listener stopped");
    Ok(())
}

/// Wait for shutdown signals (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down...");
        }
    }
}
