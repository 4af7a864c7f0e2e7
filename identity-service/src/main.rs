use identity_service::{
    build_router,
    config::IdentityConfig,
    oauth_http_client,
    services::{default_providers, Database, EphemeralStore, RedisStore},
    AppState,
};
use service_core::observability::{init_metrics, init_tracing};
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;

    let metrics_handle = match init_metrics() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Metrics exporter disabled");
            None
        }
    };

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting identity service"
    );

    let store = Arc::new(Database::connect(&config.database).await?);

    // Redis is optional: without it refresh tokens and invitations report as not enabled.
    let ephemeral: Option<Arc<dyn EphemeralStore>> = match &config.redis {
        Some(redis_config) => match RedisStore::new(redis_config).await {
            Ok(redis) => Some(Arc::new(redis)),
            Err(e) => {
                tracing::warn!(error = %e, "Redis unreachable, continuing without it");
                None
            }
        },
        None => {
            tracing::warn!("REDIS_URL not set, continuing without Redis");
            None
        }
    };

    let providers = default_providers(oauth_http_client(&config.oauth)?);
    let addr = config.common.bind_address();
    let state = AppState::new(config.clone(), store, ephemeral, providers, metrics_handle)?;
    let app = build_router(state);

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
