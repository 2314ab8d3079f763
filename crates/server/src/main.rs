mod bootstrap;
mod health;
mod service;

use std::time::Duration;

use anyhow::Result;
use intentbot_core::config::{AppConfig, LoadOptions};
use intentbot_core::ApplicationError;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use intentbot_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.trim().to_ascii_lowercase()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = match bootstrap::bootstrap_with_config(config).await {
        Ok(app) => app,
        Err(error) => {
            let failure = ApplicationError::from(error);
            tracing::error!(
                event_name = "system.bootstrap.failed",
                correlation_id = "bootstrap",
                error_class = failure.class(),
                error = %failure,
                "application bootstrap failed"
            );
            return Err(failure.into_interface("bootstrap").into());
        }
    };

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState {
            bot_user_id: app.config.bot.user_id.clone(),
            intents: app.catalog.len(),
            classifier: app.classifier_mode,
        },
    )
    .await?;

    let consumer = app.consumer;
    let consumer_task = tokio::spawn(async move { consumer.run().await });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bot_user_id = %app.config.bot.user_id,
        queue = %app.config.queue_name(),
        auto_ask = app.runtime.bot().auto_ask,
        "intentbot-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "intentbot-server stopping"
    );

    consumer_task.abort();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, consumer_task).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "consumer did not stop within the grace period"
        );
    }

    Ok(())
}
