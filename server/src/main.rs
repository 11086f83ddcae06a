//! Querycast HTTP server.
//!
//! Starts flight searches over the mock sources and streams their results over
//! WebSocket, SSE and long-poll.

use axum::Router;
use axum::routing::get;
use querycast_core::event_log::EventLog;
use querycast_postgres::PostgresEventLog;
use querycast_runtime::engine::SearchEngine;
use querycast_runtime::memory_bus::InMemoryNotificationBus;
use querycast_runtime::memory_log::InMemoryEventLog;
use querycast_runtime::metrics::MetricsServer;
use querycast_server::{Config, default_sources};
use querycast_web::{AppState, router};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,querycast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Querycast server");

    let config = Config::from_env();
    info!(
        bind = %config.bind_addr(),
        public_base_url = %config.server.public_base_url,
        durable_log = config.database_url.is_some(),
        "Configuration loaded"
    );

    if let Some(addr) = config.server.metrics_addr {
        spawn_metrics_server(addr).await?;
    }

    let log: Arc<dyn EventLog> = match &config.database_url {
        Some(url) => {
            info!("Connecting to event log database...");
            let log = PostgresEventLog::new(url).await?;
            log.migrate().await?;
            info!("Event log database ready");
            Arc::new(log)
        }
        None => Arc::new(InMemoryEventLog::new()),
    };
    let bus = Arc::new(InMemoryNotificationBus::with_capacity(
        config.engine.bus_capacity,
    ));

    let engine = Arc::new(SearchEngine::new(
        log,
        bus,
        default_sources(),
        config.engine_config(),
    ));
    let janitor = engine.spawn_janitor();

    let state = AppState::new(Arc::clone(&engine), &config.server.public_base_url)
        .with_sse_idle(config.sse_idle());
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        timeout_secs = config.server.shutdown_timeout,
        "Cancelling running searches"
    );
    engine.shutdown(config.shutdown_timeout()).await;
    if let Err(e) = janitor.await {
        error!(error = %e, "Retention janitor task failed");
    }

    info!("Server stopped");
    Ok(())
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
async fn spawn_metrics_server(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let mut metrics = MetricsServer::new(addr);
    metrics.start()?;
    let metrics = Arc::new(metrics);

    let app = Router::new().route(
        "/metrics",
        get(move || {
            let metrics = Arc::clone(&metrics);
            async move { metrics.render().unwrap_or_default() }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Metrics server failed");
        }
    });
    info!(%addr, "Metrics endpoint listening");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
