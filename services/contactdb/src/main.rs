//! Contact database HTTP service entry point.
//!
//! # Purpose
//! Loads configuration, connects the storage backend, builds the engine and serves the API
//! plus the Prometheus metrics endpoint until shutdown.
use anyhow::Context;
use contactdb::app::{AppState, build_router};
use contactdb::config::{ContactDbConfig, StorageBackend};
use contactdb::engine::Engine;
use contactdb::observability;
use contactdb::store::ContactStore;
use contactdb::store::memory::InMemoryStore;
use contactdb::store::postgres::PostgresStore;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ContactDbConfig::from_env_or_yaml().context("contactdb config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: ContactDbConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability(observability::SERVICE_NAME);
    let state = build_state(&config).await?;
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let addr = config.bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        %addr,
        backend = state.engine.store().backend_name(),
        "contactdb listening"
    );
    axum::serve(listener, build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown)
        .await?;

    metrics_task.abort();
    let _ = metrics_task.await;
    tracing::info!("contactdb stopped");
    Ok(())
}

async fn build_state(config: &ContactDbConfig) -> anyhow::Result<AppState> {
    let store: Arc<dyn ContactStore> = match config.storage {
        StorageBackend::Memory => {
            tracing::warn!("using in-memory storage; data is lost on restart");
            Arc::new(InMemoryStore::new())
        }
        StorageBackend::Postgres => {
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect to postgres")?,
            )
        }
    };
    Ok(AppState {
        engine: Engine::new(store),
    })
}
