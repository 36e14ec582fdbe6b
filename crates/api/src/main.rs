use std::net::SocketAddr;

use anyhow::Context;

use quotegate_api::{app, config::GateConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    quotegate_observability::init();

    let config = GateConfig::from_env().context("invalid configuration")?;
    let gateway = app::bootstrap(&config)?;
    let router = gateway.router()?;

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for shutdown signal: {err}");
            }
        })
        .await
        .context("server error")?;

    gateway.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}
