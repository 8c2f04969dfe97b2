use anyhow::{Context, Result};
use rollcall_store::Store;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;
mod gemini;
mod views;

use dbus_interface::{AttendanceService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = config::Config::from_env();

    // Load state synchronously (fail-fast): a store we cannot read is never
    // overwritten.
    let store = Store::open(&config.db_path)
        .with_context(|| format!("opening store at {}", config.db_path.display()))?;
    let tracker = store.load().context("loading roster and reports")?;
    let engine = engine::spawn_engine(tracker, store)?;

    let backend = gemini::GeminiClient::new(
        config.gemini_api_key.clone(),
        &config.gemini_model,
        &config.gemini_endpoint,
    );
    if !backend.is_configured() {
        tracing::warn!("ROLLCALL_GEMINI_API_KEY not set; report generation will fail");
    }
    if config.teacher.password.is_blank() {
        tracing::warn!("ROLLCALL_TEACHER_PASSWORD not set; teacher login is disabled");
    }

    let service = AttendanceService::new(engine, backend, config.teacher);
    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .context("registering on the session bus")?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "rollcalld ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
