//! Process entrypoint. Grounded on `native-server/src/main.rs`'s startup
//! sequence (tracing init → config load → component wiring → hyper serve
//! with graceful shutdown) and `main.go`'s wiring order (store → engine →
//! handler → routes) and shutdown order (stop accepting upgrades, close
//! the replicator, close the store, all inside a bounded grace deadline).
//! Exit codes: 0 clean shutdown, non-zero on initialization failure.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use etherply_sync::auth::Authenticator;
use etherply_sync::bus::Bus;
use etherply_sync::config::Config;
use etherply_sync::engine::Engine;
use etherply_sync::http::{serve, AppState};
use etherply_sync::metrics::Metrics;
use etherply_sync::presence::PresenceManager;
use etherply_sync::replication::{ChangeEvent, ChangeHandler, NatsReplicator, ReplicationConfig, Replicator};
use etherply_sync::store::{SledStore, Store};
use etherply_sync::strategy::new_strategy;
use etherply_sync::webhook::WebhookDispatcher;

struct EngineChangeHandler {
    engine: Arc<Engine>,
}

#[async_trait::async_trait]
impl ChangeHandler for EngineChangeHandler {
    async fn handle(&self, event: ChangeEvent) -> etherply_sync::error::Result<()> {
        self.engine
            .apply_remote_changes(&event.workspace_id, &event.changes)
            .await
    }
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("etherply-sync: fatal: {e}");
        std::process::exit(1);
    }
}

async fn run() -> etherply_sync::error::Result<()> {
    let config = Config::load();
    init_tracing(&config);
    config.validate()?;

    tracing::info!(
        port = config.port,
        strategy = config.sync_strategy.name(),
        region = %config.region,
        replication = config.replication_enabled(),
        "starting etherply-sync"
    );

    let store: Arc<dyn Store> = Arc::new(SledStore::open(&config.storage_path)?);
    let strategy = new_strategy(config.sync_strategy);
    let bus = Arc::new(Bus::new());
    let metrics = Arc::new(Metrics::new()?);
    let engine = Arc::new(Engine::new(store.clone(), strategy, bus, metrics));

    let mut replicator: Option<Arc<NatsReplicator>> = None;
    if config.replication_enabled() {
        let replication_config = ReplicationConfig::new(
            config.server_id.clone(),
            config.region.clone(),
            config.nats_urls.clone(),
        );
        match NatsReplicator::connect(replication_config).await {
            Ok(r) => {
                let r = Arc::new(r);
                engine
                    .set_replicator(r.clone(), config.region.clone(), config.server_id.clone())
                    .await;

                let handler = Box::new(EngineChangeHandler { engine: engine.clone() });
                r.subscribe(handler).await?;
                replicator = Some(r);
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to initialize replicator");
                return Err(e);
            }
        }
    }

    let (stats_cache, presence_cache) = AppState::new_response_caches();
    let state = Arc::new(AppState {
        engine,
        presence: Arc::new(PresenceManager::new()),
        webhook: Arc::new(WebhookDispatcher::new(config.webhook_url.clone())),
        authenticator: Arc::new(Authenticator::new(config.jwt_secret.clone())),
        store: store.clone(),
        started_at: Instant::now(),
        stats_cache,
        presence_cache,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "listening");

    serve(addr, state, shutdown_signal()).await?;

    tracing::info!(
        grace_period_secs = config.shutdown_timeout.as_secs(),
        "stopped accepting upgrades, draining replication and storage"
    );
    let drain = async {
        if let Some(replicator) = replicator {
            if let Err(e) = replicator.close().await {
                tracing::warn!(error = %e, "error closing replicator during shutdown");
            }
        }
        if let Err(e) = store.close() {
            tracing::warn!(error = %e, "error closing store during shutdown");
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        tracing::warn!("shutdown grace period elapsed before drain completed");
    }

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received, draining connections");
}

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.log_format == "text" {
        subscriber.init();
    } else {
        subscriber.json().init();
    }
}
