//! Memory daemon binary.
//!
//! Configuration comes entirely from `AGENTDB_*` environment variables;
//! see [`agentdb_core::MemoryConfig`] for the full set and defaults.

use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentdb_core::embeddings::{EmbeddingProvider, MockEmbedder};
use agentdb_core::MemoryConfig;
use agentdb_daemon::{DaemonServer, MemoryService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = MemoryConfig::from_env();

    let default_filter = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let provider: Arc<dyn EmbeddingProvider> = build_provider(&config)?;
    info!(
        dimension = config.dimension,
        socket = %config.socket_path.display(),
        provider = provider.model_name(),
        "starting memory daemon"
    );

    let service = MemoryService::initialize(config.clone(), provider)
        .await
        .context("failed to initialize memory service")?;
    let server = DaemonServer::new(config, service);
    let shutdown = server.shutdown_handle();

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received");
        shutdown.trigger();
    });

    server.run().await.context("daemon terminated with error")?;
    Ok(())
}

fn build_provider(config: &MemoryConfig) -> anyhow::Result<Arc<dyn EmbeddingProvider>> {
    #[cfg(feature = "http-embeddings")]
    if let Some(url) = &config.embedding_url {
        let provider = agentdb_core::embeddings::HttpEmbedder::new(url.clone(), config.dimension)
            .context("failed to build HTTP embedding provider")?;
        return Ok(Arc::new(provider));
    }
    if config.embedding_url.is_some() {
        warn!("embedding endpoint configured but http-embeddings feature is disabled");
    }
    Ok(Arc::new(MockEmbedder::new(config.dimension)))
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut hangup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        tokio::select! {
            _ = interrupt.recv() => {}
            _ = terminate.recv() => {}
            _ = hangup.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
