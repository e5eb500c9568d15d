use std::sync::Arc;

use anyhow::Context;
use snip::{config, handlers, shortener::Shortener, store, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (ignore error if file is absent, env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "snip=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = config::AppConfig::from_env()?;
    tracing::info!(
        rpc_port = config.rpc_port,
        http_port = config.http_port,
        base_url = %config.shortener.base_url,
        expiry_mode = ?config.shortener.expiry_mode,
        "Starting snip"
    );

    let store = store::connect(&config).await?;
    let shortener = Arc::new(Shortener::new(store, config.shortener.clone()));
    let state = Arc::new(AppState::new(shortener));

    let cors = handlers::cors_layer(&config.cors_allowed_origins);
    let rpc_app = handlers::rpc_router(state.clone(), cors.clone());
    let redirect_app = handlers::redirect_router(state, cors);

    // ── Serve ──────────────────────────────────────────────────────────────
    let rpc_addr = format!("{}:{}", config.host, config.rpc_port);
    let rpc_listener = tokio::net::TcpListener::bind(&rpc_addr)
        .await
        .with_context(|| format!("binding RPC listener on {rpc_addr}"))?;
    tracing::info!("RPC API listening on http://{}", rpc_listener.local_addr()?);

    let http_addr = format!("{}:{}", config.host, config.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr)
        .await
        .with_context(|| format!("binding redirect listener on {http_addr}"))?;
    tracing::info!(
        "Redirect server listening on http://{}",
        http_listener.local_addr()?
    );

    tokio::try_join!(
        async {
            axum::serve(rpc_listener, rpc_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("RPC server failed")
        },
        async {
            axum::serve(http_listener, redirect_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("redirect server failed")
        },
    )?;

    tracing::info!("Shut down cleanly");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM. Click increments still in flight
/// at this point may be dropped.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
