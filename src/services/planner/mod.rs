//! Heuristic route planner
//!
//! Assigns delivery stops to driver routes under capacity, shift length and
//! compactness constraints, then shortens each route with 2-opt.
//! Stops no driver can take are reported as an overflow pseudo-route.

mod config;
mod construct;
mod error;
mod matrix;
mod model;
mod orchestrator;
mod overflow;
mod partition;
mod stops;
mod two_opt;

pub use config::PlannerConfig;
pub use error::PlanningError;
pub use model::Depot;
pub use orchestrator::RoutePlanner;
