//! NATS message handlers

pub mod ping;
pub mod route;

use std::sync::Arc;

use anyhow::Result;
use async_nats::Client;
use tokio::select;
use tracing::{error, info};

use crate::services::planner::RoutePlanner;

/// Subject prefix of every handler
pub const SUBJECT_PREFIX: &str = "routefinder";

fn subject(name: &str) -> String {
    format!("{}.{}", SUBJECT_PREFIX, name)
}

/// Start all message handlers
pub async fn start_handlers(client: Client, planner: Arc<RoutePlanner>) -> Result<()> {
    info!("Starting message handlers...");

    let ping_sub = client.subscribe(subject("ping")).await?;
    let calculate_sub = client.subscribe(subject("routes.calculate")).await?;

    info!("Subscribed to {} and {}", subject("ping"), subject("routes.calculate"));

    let ping_client = client.clone();
    let ping_handle = tokio::spawn(async move {
        ping::handle_ping(ping_client, ping_sub).await
    });

    let calculate_client = client.clone();
    let calculate_handle = tokio::spawn(async move {
        route::handle_calculate(calculate_client, calculate_sub, planner).await
    });

    select! {
        result = ping_handle => {
            error!("Ping handler finished: {:?}", result);
        }
        result = calculate_handle => {
            error!("Routes calculate handler finished: {:?}", result);
        }
    }

    Ok(())
}
