use anyhow::Context;
use clap::Parser;
use pharmachain_node::config::{Cli, NodeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = NodeConfig::from(Cli::parse());
    let state = pharmachain_node::build_state(&config)
        .await
        .context("starting backends")?;
    let app = pharmachain_node::http::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("pharmachain node listening on {addr}");

    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
