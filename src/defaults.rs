use crate::services::planner::Depot;
use crate::types::Coordinates;

pub const DEFAULT_NATS_URL: &str = "nats://localhost:4222";

pub const DEFAULT_DEPOT_LAT: f64 = 40.10144209586004;
pub const DEFAULT_DEPOT_LNG: f64 = -75.30578283911566;
pub const DEFAULT_DEPOT_LABEL: &str = "Starting Location";

pub fn default_depot() -> Depot {
    Depot {
        label: DEFAULT_DEPOT_LABEL.to_string(),
        coordinates: Coordinates::new(DEFAULT_DEPOT_LAT, DEFAULT_DEPOT_LNG),
    }
}
