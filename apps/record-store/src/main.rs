use std::net::SocketAddr;
use std::path::Path;

use record_store::config::AppConfig;
use record_store::routes::build_router;
use record_store::state::AppState;
use record_store::telemetry::init_tracing;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cfg = AppConfig::from_env();
    let _log_guard = init_tracing("info", cfg.log_path.as_deref())?;

    if !Path::new(&cfg.data_dir).is_dir() {
        warn!(data_dir = %cfg.data_dir, "data directory does not exist; every read will be not_found");
    }
    let state = AppState::with_data_dir(&cfg.data_dir, cfg.max_limit);
    let app = build_router(state);

    let addr: SocketAddr = cfg.bind_addr.parse()?;
    info!(data_dir = %cfg.data_dir, max_limit = cfg.max_limit, "Starting record store on {addr}");
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("record store stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
