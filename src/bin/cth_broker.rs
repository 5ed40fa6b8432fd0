//! Broker daemon entry point.
//!
//! Loads configuration, builds the spool-backed queue, starts the
//! broker, and parks until interrupted. The websocket transport mounts
//! on the hosting web server and drives the broker handle.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cth_broker::config::LOG_ENV_VAR;
use cth_broker::queue::init_queue;
use cth_broker::{Broker, Config};

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let queue = init_queue(&config.queue, &config.broker.spool)?;
    let broker = Arc::new(Broker::new(config, queue));
    broker.start().await?;

    info!(
        websocket_path = %broker.config().broker.websocket_path,
        "Broker running; waiting for transport sessions"
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
