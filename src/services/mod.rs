//! Business logic services

pub mod geo;
pub mod geocoding;
pub mod nominatim;
pub mod planner;
pub mod routing;
