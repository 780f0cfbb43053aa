use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use expense_api::{build_router, build_state, ApiConfig};
use expense_observability::init_tracing;
use tracing::{debug, info, warn};

const PURGE_INTERVAL: Duration = Duration::from_secs(15 * 60);
const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("expense_api");

    let config = ApiConfig::from_env();
    let state = build_state(&config).await?;

    let assistant = state.assistant.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PURGE_INTERVAL);
        loop {
            ticker.tick().await;
            match assistant.purge_expired_reports().await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired reports"),
                Err(error) => warn!(error = %error, "report purge failed"),
            }
        }
    });

    let limiter = state.limiter.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(LIMITER_SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let dropped = limiter.sweep();
            if dropped > 0 {
                debug!(dropped, tracked = limiter.tracked_clients(), "swept idle rate-limit clients");
            }
        }
    });

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!(bind = %config.bind, "expense api started");

    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
