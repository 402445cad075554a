//! Configuration management

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::defaults::{default_depot, DEFAULT_NATS_URL};
use crate::services::geocoding::GeocoderSettings;
use crate::services::planner::{Depot, PlannerConfig};
use crate::types::Coordinates;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// NATS server URL
    pub nats_url: String,

    /// Postal code resolver stack
    pub geocoder: GeocoderSettings,

    /// GraphHopper routing engine URL (optional, falls back to mock if unavailable)
    pub graphhopper_url: Option<String>,

    /// Where every route starts
    pub depot: Depot,

    pub planner: PlannerConfig,
}

/// Parse an optional environment variable
fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid value for {}: '{}'", name, raw)),
        _ => Ok(None),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let nats_url = std::env::var("NATS_URL").unwrap_or_else(|_| DEFAULT_NATS_URL.to_string());

        let mut geocoder = GeocoderSettings::default();
        if let Ok(backend) = std::env::var("GEOCODER_BACKEND") {
            geocoder.backend = backend.trim().to_lowercase();
        }
        if let Ok(url) = std::env::var("NOMINATIM_URL") {
            geocoder.nominatim_url = url;
        }
        if let Some(ms) = env_parse::<u64>("NOMINATIM_RATE_LIMIT_MS")? {
            geocoder.rate_limit_interval = Duration::from_millis(ms);
        }
        if let Some(threshold) = env_parse::<u32>("NOMINATIM_CB_THRESHOLD")? {
            geocoder.circuit_breaker_threshold = threshold;
        }
        if let Some(secs) = env_parse::<u64>("NOMINATIM_CB_RECOVERY_SECS")? {
            geocoder.circuit_breaker_recovery = Duration::from_secs(secs);
        }
        geocoder.lookup_table_path = env_parse::<PathBuf>("POSTAL_LOOKUP_PATH")?;

        let graphhopper_url = std::env::var("GRAPHHOPPER_URL").ok().filter(|u| !u.trim().is_empty());

        let mut depot = default_depot();
        let lat = env_parse::<f64>("DEPOT_LAT")?;
        let lng = env_parse::<f64>("DEPOT_LNG")?;
        match (lat, lng) {
            (Some(lat), Some(lng)) => depot.coordinates = Coordinates::new(lat, lng),
            (None, None) => {}
            _ => anyhow::bail!("DEPOT_LAT and DEPOT_LNG must be set together"),
        }
        if let Ok(label) = std::env::var("DEPOT_LABEL") {
            depot.label = label;
        }

        let mut planner = PlannerConfig::default();
        if let Some(capacity) = env_parse::<usize>("VEHICLE_CAPACITY")? {
            if capacity == 0 {
                anyhow::bail!("VEHICLE_CAPACITY must be positive");
            }
            planner.vehicle_capacity = capacity;
        }
        if let Some(concurrency) = env_parse::<usize>("MATRIX_CONCURRENCY")? {
            planner.matrix_concurrency = concurrency.max(1);
        }
        planner.random_seed = env_parse::<u64>("PLANNER_RANDOM_SEED")?;

        Ok(Self {
            nats_url,
            geocoder,
            graphhopper_url,
            depot,
            planner,
        })
    }
}
