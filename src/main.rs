//! RouteFinder Worker - delivery route planning service
//!
//! This worker connects to NATS and answers route calculation requests.
//! The `plan` subcommand runs a single request offline.

mod cli;
mod config;
mod defaults;
mod handlers;
mod services;
mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::services::geocoding::create_resolver;
use crate::services::planner::RoutePlanner;
use crate::services::routing::{create_travel_time_provider_with_fallback, TravelTimeProvider};
use crate::types::CalculateRoutesRequest;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs directory - use LOGS_DIR env var or default to ../logs (relative to worker)
    let logs_dir = std::env::var("LOGS_DIR")
        .unwrap_or_else(|_| "../logs".to_string());
    std::fs::create_dir_all(&logs_dir).ok();

    // File appender for persistent logs (daily rotation)
    let file_appender = RollingFileAppender::new(
        Rotation::DAILY,
        &logs_dir,
        "worker.log",
    );
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    // Console logs go to stderr so `plan` output stays clean JSON
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,routefinder_worker=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    let mut config = Config::from_env()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::Plan { input, seed } => {
            if seed.is_some() {
                config.planner.random_seed = seed;
            }
            plan_file(config, &input).await
        }
    }
}

/// Wire the resolver and travel time provider into a planner
async fn build_planner(config: &Config) -> Result<RoutePlanner> {
    let resolver = create_resolver(&config.geocoder)?;
    info!("Address resolver initialized: {}", resolver.name());

    let provider: Arc<dyn TravelTimeProvider> = Arc::from(
        create_travel_time_provider_with_fallback(config.graphhopper_url.clone()).await
    );
    info!("Travel time provider initialized: {}", provider.name());

    Ok(RoutePlanner::new(
        resolver,
        provider,
        config.depot.clone(),
        config.planner.clone(),
    ))
}

async fn serve(config: Config) -> Result<()> {
    info!("Starting RouteFinder Worker...");

    let planner = Arc::new(build_planner(&config).await?);

    // Connect to NATS (supports optional NATS_USER/NATS_PASSWORD auth).
    let nats_client = match (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD")) {
        (Ok(user), Ok(password)) if !user.is_empty() => {
            async_nats::ConnectOptions::new()
                .user_and_password(user, password)
                .connect(&config.nats_url)
                .await?
        }
        _ => async_nats::connect(&config.nats_url).await?,
    };
    info!("Connected to NATS at {}", config.nats_url);

    let handler_result = handlers::start_handlers(nats_client, planner).await;

    if let Err(e) = handler_result {
        error!("Handler error: {}", e);
        return Err(e);
    }

    Ok(())
}

async fn plan_file(config: Config, input: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(input)
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let request: CalculateRoutesRequest = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse {}", input.display()))?;

    let planner = build_planner(&config).await?;
    let routes = planner.plan(&request).await?;

    println!("{}", serde_json::to_string_pretty(&routes)?);
    Ok(())
}
