use service_core::observability::logging::init_tracing;
use sso_service::{
    AppState, build_router,
    config::SsoConfig,
    handlers::StaticPages,
    services::{
        CasClient, IdentityResolver, NoopHooks, PgDirectory, RedisSessionStore, RedisTicketStore,
        directory,
    },
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = SsoConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        mode = ?config.auth_mode,
        "Starting SSO broker"
    );

    // Directory (persisted people and groups)
    let pool = directory::create_pool(&config.database)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;
    directory::run_migrations(&pool)
        .await
        .map_err(|e| service_core::error::AppError::DatabaseError(anyhow::anyhow!(e)))?;
    let directory = Arc::new(PgDirectory::new(pool));
    tracing::info!("Directory initialized");

    // Ticket and session stores share the Redis deployment
    let tickets = Arc::new(RedisTicketStore::new(&config.redis, config.ticket_ttl_seconds).await?);
    let sessions =
        Arc::new(RedisSessionStore::new(&config.redis, config.session_ttl_seconds).await?);
    tracing::info!("Ticket and session stores initialized");

    let resolver = IdentityResolver::new(
        directory.clone(),
        Arc::new(NoopHooks),
        config.resolver_options(),
    );

    let cas_client = CasClient::new(&config.cas_client);

    let login_rate_limiter = service_core::middleware::rate_limit::create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );

    let state = AppState {
        config: config.clone(),
        directory,
        tickets,
        sessions,
        resolver,
        cas_client,
        pages: Arc::new(StaticPages),
        login_rate_limiter,
    };

    let app = build_router(state).await?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(config.common.shutdown_grace_seconds))
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal(grace_seconds: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
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

    tokio::time::sleep(tokio::time::Duration::from_secs(grace_seconds)).await;
}
