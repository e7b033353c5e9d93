use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod attendance;
mod config;
mod dbus_interface;
mod dispatch;
mod engine;
mod handoff;
mod network;
mod store;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("presenced starting");

    let config = config::Config::from_env();
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let store = Arc::new(store::Store::open(&config.db_path)?);
    let engine = engine::spawn_engine(&config, Arc::clone(&store))?;

    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(event) => tracing::info!(?event, "engine event"),
                Err(RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event log fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let service = dbus_interface::AttendanceService::new(engine.clone(), store);
    let _conn = zbus::connection::Builder::session()?
        .name("org.presence.Attendance1")?
        .serve_at("/org/presence/Attendance1", service)?
        .build()
        .await?;

    tracing::info!("presenced ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("presenced shutting down");
    engine.shutdown();

    Ok(())
}
