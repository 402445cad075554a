//! Planning data model

use std::collections::BTreeSet;

use crate::types::{
    Coordinates, DriverRef, PlannedRouteDto, RouteStopDto, WAREHOUSE_PACKAGE_ID,
};

use super::config::TierProfile;
use super::matrix::TravelTimeMatrix;

/// Matrix index reserved for the depot in every region
pub const DEPOT_INDEX: usize = 0;

/// Starting location shared by all routes
#[derive(Debug, Clone, PartialEq)]
pub struct Depot {
    pub label: String,
    pub coordinates: Coordinates,
}

/// A routing point carrying one or more packages
#[derive(Debug, Clone, PartialEq)]
pub struct Stop {
    pub id: String,
    pub display_label: String,
    pub coordinates: Coordinates,
    pub region_code: String,
    pub package_ids: Vec<String>,
    /// Bag merged from several addresses; never split
    pub is_aggregate: bool,
    /// Row/column in the region's matrix, assigned once per region
    pub matrix_index: usize,
}

impl Stop {
    pub fn package_count(&self) -> usize {
        self.package_ids.len()
    }

    pub fn to_dto(&self) -> RouteStopDto {
        RouteStopDto {
            address: self.display_label.clone(),
            coordinates: self.coordinates,
            region_code: self.region_code.clone(),
            package_ids: self.package_ids.clone(),
        }
    }
}

impl Depot {
    /// Depot marker as the first stop of a route in `region_code`
    pub fn as_stop(&self, region_code: &str) -> Stop {
        Stop {
            id: WAREHOUSE_PACKAGE_ID.to_string(),
            display_label: self.label.clone(),
            coordinates: self.coordinates,
            region_code: region_code.to_string(),
            package_ids: vec![WAREHOUSE_PACKAGE_ID.to_string()],
            is_aggregate: false,
            matrix_index: DEPOT_INDEX,
        }
    }
}

/// Driver constraints, immutable during planning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriverSlot {
    pub id: i64,
    pub max_hours: f64,
    pub package_capacity: usize,
}

/// Stops of one region with their matrix; `stops[k].matrix_index == k + 1`
#[derive(Debug, Clone)]
pub struct RegionProblem {
    pub region_code: String,
    pub depot: Stop,
    pub stops: Vec<Stop>,
    pub matrix: TravelTimeMatrix,
}

impl RegionProblem {
    /// Number the stops and pair them with their matrix
    pub fn new(region_code: &str, depot: &Depot, mut stops: Vec<Stop>, matrix: TravelTimeMatrix) -> Self {
        for (k, stop) in stops.iter_mut().enumerate() {
            stop.matrix_index = k + 1;
        }
        Self {
            region_code: region_code.to_string(),
            depot: depot.as_stop(region_code),
            stops,
            matrix,
        }
    }

    /// Stop by matrix index
    pub fn stop(&self, index: usize) -> &Stop {
        if index == DEPOT_INDEX {
            &self.depot
        } else {
            &self.stops[index - 1]
        }
    }

    /// Packages at a matrix index; the depot carries none
    pub fn packages_at(&self, index: usize) -> usize {
        if index == DEPOT_INDEX {
            0
        } else {
            self.stops[index - 1].package_count()
        }
    }

    pub fn total_packages(&self) -> usize {
        self.stops.iter().map(Stop::package_count).sum()
    }

    /// Matrix indices of all non-depot stops
    pub fn stop_indices(&self) -> impl Iterator<Item = usize> {
        1..=self.stops.len()
    }
}

/// Lifecycle of a driver slot during construction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Idle,
    Seeded,
    Growing,
    Finalized,
    /// No valid seed; the slot yields no route
    Rejected,
}

impl SlotPhase {
    /// Seeded or growing
    pub fn is_active(self) -> bool {
        matches!(self, SlotPhase::Seeded | SlotPhase::Growing)
    }
}

/// Mutable route of one driver slot during construction
#[derive(Debug, Clone)]
pub struct RouteBuildState {
    pub driver: DriverSlot,
    pub phase: SlotPhase,
    /// Matrix indices, depot first
    pub stop_sequence: Vec<usize>,
    pub packages_loaded: usize,
    pub drive_seconds: u64,
    pub service_seconds: u64,
    /// Soft package budget; equals the hard cap in automatic mode
    pub package_budget: usize,
    pub profile: TierProfile,
}

impl RouteBuildState {
    pub fn new(driver: DriverSlot, package_budget: usize, profile: TierProfile) -> Self {
        Self {
            driver,
            phase: SlotPhase::Idle,
            stop_sequence: vec![DEPOT_INDEX],
            packages_loaded: 0,
            drive_seconds: 0,
            service_seconds: 0,
            package_budget: package_budget.min(driver.package_capacity),
            profile,
        }
    }

    pub fn last_stop(&self) -> usize {
        self.stop_sequence.last().copied().unwrap_or(DEPOT_INDEX)
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.drive_seconds.saturating_add(self.service_seconds)
    }

    pub fn has_stops(&self) -> bool {
        self.stop_sequence.len() > 1
    }

    /// Packages this route can still take under both caps
    pub fn remaining_packages(&self) -> usize {
        self.package_budget.saturating_sub(self.packages_loaded)
    }

    pub fn push_stop(&mut self, index: usize, travel_seconds: u64, service_seconds: u64, packages: usize) {
        self.stop_sequence.push(index);
        self.drive_seconds = self.drive_seconds.saturating_add(travel_seconds);
        self.service_seconds += service_seconds;
        self.packages_loaded += packages;
    }

    /// Recompute drive time after the sequence was reordered
    pub fn refresh_drive_seconds(&mut self, matrix: &TravelTimeMatrix) {
        self.drive_seconds = matrix.path_seconds(&self.stop_sequence);
    }

    pub fn total_hours(&self) -> f64 {
        self.elapsed_seconds() as f64 / 3600.0
    }
}

/// Unassigned pool and per-driver routes of one region
#[derive(Debug, Clone)]
pub struct PlanningState {
    pub unassigned: BTreeSet<usize>,
    pub routes: Vec<RouteBuildState>,
}

impl PlanningState {
    pub fn new(problem: &RegionProblem, routes: Vec<RouteBuildState>) -> Self {
        Self {
            unassigned: problem.stop_indices().collect(),
            routes,
        }
    }

    /// Move a stop from the pool onto a route
    pub fn assign(&mut self, route: usize, index: usize, problem: &RegionProblem, service_seconds: u64) {
        let state = &mut self.routes[route];
        let travel = problem.matrix.get(state.last_stop(), index);
        self.unassigned.remove(&index);
        state.push_stop(index, travel, service_seconds, problem.packages_at(index));
    }
}

/// A finalized route of one driver
#[derive(Debug, Clone)]
pub struct PlannedRoute {
    pub driver_id: i64,
    pub driver_max_hours: f64,
    /// Depot first
    pub ordered_stops: Vec<Stop>,
    pub total_hours: f64,
}

impl PlannedRoute {
    pub fn from_state(state: &RouteBuildState, problem: &RegionProblem) -> Self {
        Self {
            driver_id: state.driver.id,
            driver_max_hours: state.driver.max_hours,
            ordered_stops: state
                .stop_sequence
                .iter()
                .map(|&index| problem.stop(index).clone())
                .collect(),
            total_hours: state.total_hours(),
        }
    }

    /// Packages on the route, depot excluded
    pub fn package_count(&self) -> usize {
        self.ordered_stops
            .iter()
            .filter(|stop| stop.matrix_index != DEPOT_INDEX)
            .map(Stop::package_count)
            .sum()
    }

    pub fn to_dto(&self) -> PlannedRouteDto {
        PlannedRouteDto {
            route: self.ordered_stops.iter().map(Stop::to_dto).collect(),
            total_hours: self.total_hours,
            driver_id: DriverRef::Driver(self.driver_id),
            driver_max: self.driver_max_hours,
        }
    }
}

/// Pseudo-route listing stops no driver could take
pub fn overflow_dto(stops: &[Stop]) -> PlannedRouteDto {
    PlannedRouteDto {
        route: stops.iter().map(Stop::to_dto).collect(),
        total_hours: 0.0,
        driver_id: DriverRef::overflow(),
        driver_max: 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depot() -> Depot {
        Depot {
            label: "Starting Location".to_string(),
            coordinates: Coordinates::new(40.1, -75.3),
        }
    }

    fn stop(id: &str, packages: usize) -> Stop {
        Stop {
            id: id.to_string(),
            display_label: id.to_string(),
            coordinates: Coordinates::new(40.2, -75.2),
            region_code: "PE".to_string(),
            package_ids: (0..packages).map(|p| format!("{}-{}", id, p)).collect(),
            is_aggregate: false,
            matrix_index: 0,
        }
    }

    fn problem() -> RegionProblem {
        let matrix = TravelTimeMatrix::from_rows(vec![
            vec![0, 100, 200],
            vec![100, 0, 50],
            vec![200, 50, 0],
        ]);
        RegionProblem::new("PE", &depot(), vec![stop("a", 2), stop("b", 3)], matrix)
    }

    #[test]
    fn test_region_problem_numbers_stops() {
        let problem = problem();
        assert_eq!(problem.stop(0).package_ids, vec![WAREHOUSE_PACKAGE_ID.to_string()]);
        assert_eq!(problem.stop(1).id, "a");
        assert_eq!(problem.stop(2).matrix_index, 2);
        assert_eq!(problem.packages_at(0), 0);
        assert_eq!(problem.packages_at(2), 3);
        assert_eq!(problem.total_packages(), 5);
        assert_eq!(problem.stop_indices().collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn test_planning_state_assign() {
        let problem = problem();
        let driver = DriverSlot { id: 1, max_hours: 4.0, package_capacity: 48 };
        let mut state = PlanningState::new(&problem, vec![RouteBuildState::new(driver, 48, TierProfile::short_shift())]);

        state.assign(0, 2, &problem, 210);
        state.assign(0, 1, &problem, 180);

        let route = &state.routes[0];
        assert!(state.unassigned.is_empty());
        assert_eq!(route.stop_sequence, vec![0, 2, 1]);
        assert_eq!(route.drive_seconds, 250);
        assert_eq!(route.service_seconds, 390);
        assert_eq!(route.packages_loaded, 5);
        assert_eq!(route.last_stop(), 1);
    }

    #[test]
    fn test_budget_never_exceeds_capacity() {
        let driver = DriverSlot { id: 1, max_hours: 4.0, package_capacity: 48 };
        let route = RouteBuildState::new(driver, 60, TierProfile::short_shift());
        assert_eq!(route.package_budget, 48);
        assert_eq!(route.remaining_packages(), 48);
        assert!(!route.has_stops());
    }

    #[test]
    fn test_planned_route_dto_starts_at_depot() {
        let problem = problem();
        let driver = DriverSlot { id: 9, max_hours: 4.0, package_capacity: 48 };
        let mut state = PlanningState::new(&problem, vec![RouteBuildState::new(driver, 48, TierProfile::short_shift())]);
        state.assign(0, 1, &problem, 1800);

        let planned = PlannedRoute::from_state(&state.routes[0], &problem);
        assert_eq!(planned.package_count(), 2);
        assert!((planned.total_hours - 0.5277).abs() < 0.001);

        let dto = planned.to_dto();
        assert_eq!(dto.route[0].package_ids, vec!["WAREHOUSE".to_string()]);
        assert_eq!(dto.route[0].address, "Starting Location");
        assert_eq!(dto.driver_id, DriverRef::Driver(9));
        assert_eq!(dto.driver_max, 4.0);
    }

    #[test]
    fn test_overflow_dto() {
        let dto = overflow_dto(&[stop("x", 1)]);
        assert!(dto.driver_id.is_overflow());
        assert_eq!(dto.total_hours, 0.0);
        assert_eq!(dto.driver_max, 0.0);
        assert_eq!(dto.route.len(), 1);
    }
}
