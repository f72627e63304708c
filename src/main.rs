use anyhow::Context;
use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use signing_keys::config::{self, KeyStoreBackend, LifecycleConfig};
use signing_keys::db::PgKeyStore;
use signing_keys::keys::{KeyLifecycleService, KeyStore, MemoryKeyStore, StaticLegacyApiKeys};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let backend: KeyStoreBackend = config::KEY_STORE_BACKEND.parse()?;

    let store: Arc<dyn KeyStore> = match backend {
        KeyStoreBackend::Memory => {
            tracing::warn!("using in-memory key store; signing keys will not survive a restart");
            Arc::new(MemoryKeyStore::new())
        }
        KeyStoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(*config::DATABASE_MAX_CONNECTIONS)
                .connect(config::DATABASE_URL.as_str())
                .await
                .context("failed to connect to the signing key database")?;
            sqlx::migrate!()
                .run(&pool)
                .await
                .context("failed to run signing key migrations")?;
            Arc::new(PgKeyStore::new(pool))
        }
    };

    let lifecycle = LifecycleConfig::from_env();
    tracing::info!(
        ?backend,
        lock_wait_ms = lifecycle.lock_wait.as_millis() as u64,
        retry_attempts = lifecycle.retry.max_attempts,
        "signing key service configured"
    );
    let service = KeyLifecycleService::builder(store)
        .legacy_api_keys(Arc::new(StaticLegacyApiKeys::from_env()))
        .config(lifecycle)
        .build();

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = signing_keys::app(service)
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .layer(prometheus_layer);

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .context("invalid BIND_ADDRESS/BIND_PORT")?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
