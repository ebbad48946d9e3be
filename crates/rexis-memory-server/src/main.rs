//! Rexis Memory Server
//!
//! Exposes the rexis-memory tool surface over HTTP (default) or line-delimited
//! JSON on stdin/stdout.

mod auth;
mod http;
mod logging;
mod settings;
mod stdio;

use anyhow::Context;
use clap::{Parser, Subcommand};
use rexis_memory::{
    InMemorySearchIndex, InMemoryStorage, RedisStorage, SearchIndex, Storage, ToolDispatcher,
};
use settings::{Settings, StorageBackend};
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "rexis-memory-server", version, about = "Agent memory server")]
struct Cli {
    /// YAML configuration file
    #[arg(long, env = "APP_CONFIG_FILE")]
    config: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Namespace applied when a call carries none
    #[arg(long)]
    default_namespace: Option<String>,

    /// Storage backend
    #[arg(long, value_enum)]
    storage: Option<StorageBackend>,

    #[command(subcommand)]
    transport: Option<Transport>,
}

#[derive(Debug, Clone, Copy, Subcommand)]
enum Transport {
    /// Serve HTTP
    Http,
    /// Serve line-delimited JSON on stdin/stdout
    Stdio,
}

impl Cli {
    fn apply(&self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(namespace) = &self.default_namespace {
            settings.default_namespace = Some(namespace.clone());
        }
        if let Some(storage) = self.storage {
            settings.storage = storage;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let transport = cli.transport.unwrap_or(Transport::Http);

    let mut settings = Settings::load(cli.config.as_deref())?;
    cli.apply(&mut settings);

    logging::init(&settings, matches!(transport, Transport::Stdio))?;

    let storage: Arc<dyn Storage> = match settings.storage {
        StorageBackend::Redis => Arc::new(
            RedisStorage::connect(&settings.redis_url)
                .await
                .with_context(|| format!("failed to connect to Redis at {}", settings.redis_url))?,
        ),
        StorageBackend::Memory => {
            tracing::warn!("using in-process storage; data is lost on exit");
            Arc::new(InMemoryStorage::new())
        }
    };
    let index: Arc<dyn SearchIndex> = Arc::new(InMemorySearchIndex::new());

    let dispatcher = Arc::new(ToolDispatcher::new(settings.memory_config(), storage, index));

    if settings.long_term_memory {
        let indexed = dispatcher
            .long_term_memory()
            .rebuild_index()
            .await
            .context("failed to rebuild the search index")?;
        tracing::info!(records = indexed, "search index rebuilt");
    }

    tracing::info!(
        transport = ?transport,
        storage = ?settings.storage,
        long_term_memory = settings.long_term_memory,
        "starting rexis-memory-server"
    );

    let result = match transport {
        Transport::Http => http::serve(Arc::clone(&dispatcher), &settings).await,
        Transport::Stdio => stdio::serve(Arc::clone(&dispatcher)).await,
    };

    dispatcher.wait_idle().await;
    dispatcher.shutdown().await;
    tracing::info!("server stopped");

    result
}
