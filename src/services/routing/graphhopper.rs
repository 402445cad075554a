//! GraphHopper routing engine client
//!
//! GraphHopper API documentation:
//! https://docs.graphhopper.com/#tag/Routing-API

use async_trait::async_trait;
use anyhow::{Result, Context};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::types::Coordinates;
use super::TravelTimeProvider;

/// GraphHopper client configuration
#[derive(Debug, Clone)]
pub struct GraphHopperConfig {
    /// Base URL of GraphHopper server (e.g., "http://localhost:8989")
    pub base_url: String,
    /// Vehicle profile
    pub profile: String,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for GraphHopperConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8989".to_string(),
            profile: "car".to_string(),
            timeout_seconds: 10,
        }
    }
}

impl GraphHopperConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }
}

/// GraphHopper routing client
pub struct GraphHopperClient {
    client: Client,
    config: GraphHopperConfig,
}

impl GraphHopperClient {
    pub fn new(config: GraphHopperConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Build the point-to-point route URL (no geometry)
    fn route_url(&self, origin: &Coordinates, destination: &Coordinates) -> String {
        format!(
            "{}/route?point={},{}&point={},{}&profile={}&calc_points=false&points_encoded=false",
            self.config.base_url,
            origin.lat,
            origin.lng,
            destination.lat,
            destination.lng,
            self.config.profile,
        )
    }
}

#[async_trait]
impl TravelTimeProvider for GraphHopperClient {
    async fn travel_time(&self, origin: &Coordinates, destination: &Coordinates) -> Result<Option<f64>> {
        let url = self.route_url(origin, destination);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send request to GraphHopper")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("GraphHopper returned error {}: {}", status, body);
        }

        let route: RouteResponse = response
            .json()
            .await
            .context("Failed to parse GraphHopper response")?;

        Ok(seconds_from_response(&route))
    }

    fn name(&self) -> &str {
        "GraphHopper"
    }
}

/// Travel time of the first path, milliseconds converted to seconds
fn seconds_from_response(route: &RouteResponse) -> Option<f64> {
    match route.paths.first() {
        Some(path) => Some(path.time as f64 / 1000.0),
        None => {
            debug!("GraphHopper returned no paths");
            None
        }
    }
}

// GraphHopper API types

#[derive(Debug, Deserialize)]
struct RouteResponse {
    #[serde(default)]
    paths: Vec<RoutePath>,
}

#[derive(Debug, Deserialize)]
struct RoutePath {
    /// Travel time in milliseconds
    time: u64,
}
