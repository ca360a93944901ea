use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pgfleet::api;
use pgfleet::config::Config;
use pgfleet::services::collector::Scheduler;
use pgfleet::state::AppContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().map_err(|e| anyhow::anyhow!("configuration error: {e}"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    tracing::info!("pgfleet {} starting", env!("CARGO_PKG_VERSION"));

    let ctx = AppContext::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("startup failed: {e}"))?;

    let shutdown = CancellationToken::new();
    let scheduler_handles = Scheduler::new(ctx.clone(), shutdown.clone()).spawn();

    let listener = tokio::net::TcpListener::bind(&ctx.config.listen_addr).await?;
    tracing::info!(addr = %ctx.config.listen_addr, "HTTP API listening");

    let server_shutdown = shutdown.clone();
    let server = axum::serve(listener, api::router(ctx.clone()))
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await });

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                shutdown.cancel();
            }
        }
    });

    server.await?;

    for handle in scheduler_handles {
        let _ = handle.await;
    }
    ctx.shutdown().await;
    tracing::info!("pgfleet stopped");
    Ok(())
}
