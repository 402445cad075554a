//! Route calculation request/response types

use serde::{Deserialize, Serialize};

use super::Coordinates;

/// Tracking id placed on the synthetic depot stop
pub const WAREHOUSE_PACKAGE_ID: &str = "WAREHOUSE";

/// Driver id marker used by the overflow pseudo-route
pub const OVERFLOW_DRIVER_ID: &str = "OVERFLOW";

/// A single package addressed to a postal code
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageInput {
    #[serde(default)]
    pub postal: String,
    #[serde(default)]
    pub tracking_id: String,
}

/// A bag of packages delivered as one aggregate stop
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BagInput {
    pub label: String,
    #[serde(default)]
    pub items: Vec<PackageInput>,
}

/// Driver supplied by the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInput {
    pub id: i64,
    pub max_hours: f64,
}

/// How drivers are allocated and grown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Fill one driver before starting the next; drivers apportioned across regions
    #[default]
    Auto,
    /// Every region sees every driver; drivers grow round-robin
    Manual,
}

impl PlanMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            PlanMode::Auto => "auto",
            PlanMode::Manual => "manual",
        }
    }
}

/// Request payload for `routes.calculate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRoutesRequest {
    #[serde(default)]
    pub loose_packages: Vec<PackageInput>,
    #[serde(default)]
    pub bags: Vec<BagInput>,
    #[serde(default)]
    pub drivers: Vec<DriverInput>,
    #[serde(default)]
    pub mode: PlanMode,
}

impl CalculateRoutesRequest {
    /// Number of packages across loose packages and bags
    pub fn package_count(&self) -> usize {
        self.loose_packages.len() + self.bags.iter().map(|b| b.items.len()).sum::<usize>()
    }
}

/// Driver reference on a planned route: numeric id or the overflow marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DriverRef {
    Driver(i64),
    Marker(String),
}

impl DriverRef {
    pub fn overflow() -> Self {
        DriverRef::Marker(OVERFLOW_DRIVER_ID.to_string())
    }

    pub fn is_overflow(&self) -> bool {
        matches!(self, DriverRef::Marker(m) if m == OVERFLOW_DRIVER_ID)
    }
}

/// A stop as returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStopDto {
    pub address: String,
    pub coordinates: Coordinates,
    pub region_code: String,
    pub package_ids: Vec<String>,
}

/// A planned route as returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRouteDto {
    pub route: Vec<RouteStopDto>,
    pub total_hours: f64,
    pub driver_id: DriverRef,
    pub driver_max: f64,
}
