use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::info;

use roomledger::api::{self, ApiState};
use roomledger::engine::{Engine, EngineConfig};
use roomledger::sweeper;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("ROOMLEDGER_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    roomledger::observability::init(metrics_port);

    let port = std::env::var("ROOMLEDGER_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("ROOMLEDGER_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("ROOMLEDGER_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let admin_token = std::env::var("ROOMLEDGER_ADMIN_TOKEN").unwrap_or_default();
    let hold_ttl_secs: i64 = std::env::var("ROOMLEDGER_HOLD_TTL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(900);
    let sweep_interval_secs: u64 = std::env::var("ROOMLEDGER_SWEEP_INTERVAL_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(5);
    let compact_threshold: u64 = std::env::var("ROOMLEDGER_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    // Ensure the data directory exists before the WAL opens in it
    std::fs::create_dir_all(&data_dir)?;
    let wal_path = PathBuf::from(&data_dir).join("roomledger.wal");

    let engine = Arc::new(Engine::new(
        wal_path,
        EngineConfig {
            hold_ttl_ms: hold_ttl_secs.saturating_mul(1000),
        },
    )?);

    tokio::spawn(sweeper::run_sweeper(
        engine.clone(),
        Duration::from_secs(sweep_interval_secs),
    ));
    tokio::spawn(sweeper::run_compactor(engine.clone(), compact_threshold));

    if admin_token.is_empty() {
        tracing::warn!("ROOMLEDGER_ADMIN_TOKEN not set; admin endpoints will reject everything");
    }

    let state = Arc::new(ApiState {
        engine,
        admin_token,
    });
    let app = api::router(state);

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("roomledger listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  hold_ttl: {hold_ttl_secs}s, sweep every {sweep_interval_secs}s");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight
    // requests
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("roomledger stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
