//! Travel time providers for matrix calculations
//!
//! Uses GraphHopper for production, mock for tests.

mod graphhopper;

pub use graphhopper::{GraphHopperClient, GraphHopperConfig};

use async_trait::async_trait;
use anyhow::Result;
use crate::services::geo::{estimated_drive_seconds, AVERAGE_SPEED_KMH, ROAD_COEFFICIENT};
use crate::types::Coordinates;

/// Travel time provider trait for abstraction (GraphHopper, mock, etc.)
#[async_trait]
pub trait TravelTimeProvider: Send + Sync {
    /// Travel time in seconds from `origin` to `destination`.
    /// `Ok(None)` means the engine knows no route between the two points.
    async fn travel_time(&self, origin: &Coordinates, destination: &Coordinates) -> Result<Option<f64>>;

    /// Get service name for logging
    fn name(&self) -> &str;
}

/// Mock travel time provider for tests
/// Uses Haversine distance × coefficient for estimation
pub struct MockRoutingService {
    /// Coefficient for converting straight-line to road distance (default: 1.3)
    road_coefficient: f64,
    /// Average speed in km/h for time estimation (default: 40)
    average_speed_kmh: f64,
}

impl Default for MockRoutingService {
    fn default() -> Self {
        Self {
            road_coefficient: ROAD_COEFFICIENT,
            average_speed_kmh: AVERAGE_SPEED_KMH,
        }
    }
}

impl MockRoutingService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TravelTimeProvider for MockRoutingService {
    async fn travel_time(&self, origin: &Coordinates, destination: &Coordinates) -> Result<Option<f64>> {
        Ok(Some(estimated_drive_seconds(
            origin,
            destination,
            self.road_coefficient,
            self.average_speed_kmh,
        )))
    }

    fn name(&self) -> &str {
        "MockRouting"
    }
}

/// Create travel time provider with automatic GraphHopper detection and fallback
///
/// Tries to connect to GraphHopper if URL is provided. Falls back to mock
/// routing if GraphHopper is unavailable or URL is not configured.
pub async fn create_travel_time_provider_with_fallback(
    graphhopper_url: Option<String>,
) -> Box<dyn TravelTimeProvider> {
    use tracing::{info, warn};

    if let Some(url) = graphhopper_url {
        match check_graphhopper_health(&url).await {
            Ok(()) => match GraphHopperClient::new(GraphHopperConfig::new(&url)) {
                Ok(client) => {
                    info!("GraphHopper routing service available at {}", url);
                    return Box::new(client);
                }
                Err(e) => {
                    warn!("Failed to create GraphHopper client: {}. Falling back to mock routing.", e);
                }
            },
            Err(e) => {
                warn!("GraphHopper not available at {}: {}. Falling back to mock routing.", url, e);
            }
        }
    }

    info!("Using mock routing service (GraphHopper not configured or unavailable)");
    Box::new(MockRoutingService::new())
}

/// Check if GraphHopper is healthy
async fn check_graphhopper_health(base_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()?;

    let url = format!("{}/health", base_url.trim_end_matches('/'));
    let response = client.get(&url).send().await?;

    if response.status().is_success() {
        Ok(())
    } else {
        anyhow::bail!("GraphHopper returned status {}", response.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn king_of_prussia() -> Coordinates {
        Coordinates { lat: 40.0893, lng: -75.3960 }
    }

    fn philadelphia() -> Coordinates {
        Coordinates { lat: 39.9526, lng: -75.1652 }
    }

    #[tokio::test]
    async fn test_mock_routing_same_point_is_zero() {
        let service = MockRoutingService::new();
        let seconds = service.travel_time(&philadelphia(), &philadelphia()).await.unwrap().unwrap();
        assert!(seconds.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_mock_routing_travel_time_reasonable() {
        let service = MockRoutingService::new();
        let seconds = service
            .travel_time(&king_of_prussia(), &philadelphia())
            .await
            .unwrap()
            .unwrap();

        // ~25 km straight, ~32 km road at 40 km/h ≈ 48 minutes
        let minutes = seconds / 60.0;
        assert!(minutes > 35.0 && minutes < 60.0, "Expected ~48 minutes, got {}", minutes);
    }

    #[tokio::test]
    async fn test_mock_routing_is_symmetric() {
        let service = MockRoutingService::new();
        let there = service.travel_time(&king_of_prussia(), &philadelphia()).await.unwrap().unwrap();
        let back = service.travel_time(&philadelphia(), &king_of_prussia()).await.unwrap().unwrap();
        assert!((there - back).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_mock_routing_custom_params() {
        let slow = MockRoutingService::new();
        let fast = MockRoutingService { road_coefficient: 1.3, average_speed_kmh: 80.0 };
        let slow_s = slow.travel_time(&king_of_prussia(), &philadelphia()).await.unwrap().unwrap();
        let fast_s = fast.travel_time(&king_of_prussia(), &philadelphia()).await.unwrap().unwrap();
        assert!((slow_s / fast_s - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_routing_service_name() {
        let mock = MockRoutingService::new();
        assert_eq!(mock.name(), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_provider_with_fallback_no_url() {
        let service = create_travel_time_provider_with_fallback(None).await;
        assert_eq!(service.name(), "MockRouting");
    }

    #[tokio::test]
    async fn test_create_provider_with_fallback_invalid_url() {
        let service = create_travel_time_provider_with_fallback(
            Some("http://localhost:99999".to_string())
        ).await;
        assert_eq!(service.name(), "MockRouting");
    }
}
