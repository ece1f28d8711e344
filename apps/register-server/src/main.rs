//! Registration daemon entry point.

mod app;
mod config;

use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting HoloSens register server"
    );

    let path = config::config_path();
    let config = config::Config::load(path.as_deref())?;
    tracing::info!(bind = %config.bind, legacy_prefix = config.legacy_prefix, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(app::run(config))?;

    tracing::info!("register server shut down cleanly");
    Ok(())
}
