mod bootstrap;
mod health;

use std::time::Duration;

use anyhow::Result;
use pocketbook_core::config::{AppConfig, LoadOptions, LogFormat};
use tracing_subscriber::EnvFilter;

use crate::bootstrap::Application;
use crate::health::ReadinessState;

fn init_logging(config: &AppConfig) {
    // RUST_LOG wins over the configured level when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        LogFormat::Compact => builder.compact().init(),
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let Application { config, db_pool, store, slack_runner } = bootstrap::bootstrap(config).await?;

    let readiness = ReadinessState::new(db_pool.clone(), store);
    health::spawn(&config.server.bind_address, config.server.health_check_port, readiness).await?;

    let mut runner = tokio::spawn(async move { slack_runner.start().await });

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        command = %config.slack.command,
        "pocketbook-server started"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        grace_secs = config.server.graceful_shutdown_secs,
        "pocketbook-server stopping"
    );

    let grace = Duration::from_secs(config.server.graceful_shutdown_secs);
    match tokio::time::timeout(grace, &mut runner).await {
        Ok(Ok(Err(error))) => tracing::warn!(
            event_name = "system.server.runner_failed",
            correlation_id = "shutdown",
            error = %error,
            "slack runner exited with an error"
        ),
        Ok(_) => {}
        Err(_) => {
            runner.abort();
            tracing::warn!(
                event_name = "system.server.runner_aborted",
                correlation_id = "shutdown",
                "slack runner did not stop within the grace period"
            );
        }
    }

    db_pool.close().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result?,
            _ = terminate.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok(())
    }
}
