mod bootstrap;
mod events;
mod health;
mod mail;
pub mod portal;
mod receipt;

use std::time::Duration;

use anyhow::Result;
use taller_core::config::{AppConfig, LoadOptions};
use taller_workflow::TokenPurger;

fn init_logging(config: &AppConfig) {
    use taller_core::config::LogFormat::*;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

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

pub async fn run() -> Result<()> {
    // Logging has to be up before bootstrap emits anything.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let relay = app.config.notifications.relay_url.clone().map(|url| app.events.spawn_relay(url));
    let purger = TokenPurger::new(app.workshop.clone())
        .with_interval(Duration::from_secs(app.config.tokens.purge_interval_secs))
        .spawn();

    let router = health::router(app.db_pool.clone(), app.mail_delivery)
        .merge(portal::router(app.workshop.clone()));
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!(
        event_name = "system.server.started",
        bind_address = %address,
        public_base_url = %app.config.server.public_base_url,
        listeners = app.events.subscribers(),
        "taller-server started"
    );
    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(event_name = "system.server.stopping", "taller-server stopping");
    purger.abort();
    if let Some(relay) = relay {
        relay.abort();
    }
    let drain = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(drain, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.pool_close_timeout",
            "database pool did not close within the graceful shutdown window"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(event_name = "system.server.signal_error", error = %error, "ctrl-c handler failed");
    }
}
