use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod mode;
mod pipeline;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("binoxd starting");

    let config = config::Config::from_env();
    pipeline::run(config)?;

    tracing::info!("binoxd stopped");
    Ok(())
}
