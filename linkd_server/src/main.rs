use std::sync::Arc;

use clap::Parser;
use linkd_core::{SessionManager, SidecarConnector};
use linkd_server::config::Args;
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── main ──────────────────────────────────────────────────────────────────────
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let store = args.store()?;
    info!("Credentials kept in {}", store.dir().display());

    let manager = SessionManager::start(
        Arc::new(SidecarConnector::new(args.sidecar())),
        Arc::new(store),
        args.policy(),
    )
    .await;

    let addr = args.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("linkd control surface listening on http://{addr}");
    axum::serve(listener, linkd_server::router(manager)).await?;

    Ok(())
}
