mod bootstrap;

use anyhow::Result;
use starboard_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use starboard_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config)?;

    let tracked_highlights = app.engine.store().snapshot().await.record_count();
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        highlight_channel_id = %app.config.starboard.channel_id,
        gateway_url = %app.config.discord.gateway_url,
        tracked_highlights,
        "starboard-server started"
    );

    tokio::select! {
        result = app.gateway_runner.start() => result?,
        signal = wait_for_shutdown() => signal?,
    }
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "starboard-server stopping"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
