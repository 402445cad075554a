//! Planning pipeline
//!
//! resolve postal codes -> build stops -> partition by region -> per region:
//! split oversized stops, build the matrix, construct, improve, reconcile
//! leftovers. Regions run concurrently; the response lists each region's
//! routes in region order followed by a single overflow entry, if any.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join_all;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tracing::{info, warn};

use crate::services::geocoding::{resolve_postal_codes, AddressResolver};
use crate::services::routing::TravelTimeProvider;
use crate::types::{CalculateRoutesRequest, PlanMode, PlannedRouteDto};

use super::config::PlannerConfig;
use super::construct::{strategy_for, RouteConstructor};
use super::error::{PlanningError, PlanningStage};
use super::matrix::build_matrix;
use super::model::{overflow_dto, Depot, DriverSlot, PlannedRoute, PlanningState, RegionProblem, Stop};
use super::overflow::resolve_overflow;
use super::partition::{apportion_drivers, partition_by_region, RegionGroup};
use super::stops::{build_stops, collect_postal_codes, split_oversized};
use super::two_opt::improve_route;

/// Outcome of one region
#[derive(Debug, Clone)]
pub struct RegionPlan {
    pub routes: Vec<PlannedRoute>,
    /// Stops no route could take
    pub overflow: Vec<Stop>,
}

/// Reject requests that cannot be planned; returns the driver slots
pub fn validate_request(
    request: &CalculateRoutesRequest,
    vehicle_capacity: usize,
) -> Result<Vec<DriverSlot>, PlanningError> {
    if request.package_count() == 0 {
        return Err(PlanningError::InvalidInput(
            "at least one package (loose or bagged) is required".to_string(),
        ));
    }
    if request.drivers.is_empty() {
        return Err(PlanningError::InvalidInput("at least one driver is required".to_string()));
    }

    let mut seen = HashSet::new();
    for driver in &request.drivers {
        if !driver.max_hours.is_finite() || driver.max_hours <= 0.0 {
            return Err(PlanningError::InvalidInput(format!(
                "driver {} has invalid maxHours {}",
                driver.id, driver.max_hours
            )));
        }
        if !seen.insert(driver.id) {
            return Err(PlanningError::InvalidInput(format!("duplicate driver id {}", driver.id)));
        }
    }

    Ok(request
        .drivers
        .iter()
        .map(|d| DriverSlot {
            id: d.id,
            max_hours: d.max_hours,
            package_capacity: vehicle_capacity,
        })
        .collect())
}

/// Construct, improve and reconcile the routes of one region
pub fn plan_region(
    problem: &RegionProblem,
    drivers: &[DriverSlot],
    mode: PlanMode,
    config: &PlannerConfig,
    rng: &mut dyn RngCore,
) -> RegionPlan {
    let strategy = strategy_for(mode);
    let routes = strategy.initial_routes(drivers, problem.total_packages(), config);
    if routes.len() < drivers.len() {
        warn!(
            "Region {}: only the first {} of {} drivers are planned",
            problem.region_code,
            routes.len(),
            drivers.len()
        );
    }

    let mut state = PlanningState::new(problem, routes);
    let constructor = RouteConstructor::new(problem, config);
    strategy.construct(&constructor, &mut state, rng);

    let mut reversals = 0;
    for route in state.routes.iter_mut().filter(|r| r.has_stops()) {
        reversals += improve_route(&mut route.stop_sequence, &problem.matrix, config.two_opt_max_iterations);
        route.refresh_drive_seconds(&problem.matrix);
    }

    let orphans: Vec<usize> = state.unassigned.iter().copied().collect();
    let leftovers = resolve_overflow(problem, &mut state.routes, &orphans, config);

    let routes: Vec<PlannedRoute> = state
        .routes
        .iter()
        .filter(|r| r.has_stops())
        .map(|r| PlannedRoute::from_state(r, problem))
        .collect();

    info!(
        "Region {} ({}): {} routes, {} unreachable matrix queries, {} 2-opt reversals, {} orphans, {} overflow",
        problem.region_code,
        mode.as_str(),
        routes.len(),
        problem.matrix.failures(),
        reversals,
        orphans.len(),
        leftovers.len()
    );

    RegionPlan {
        routes,
        overflow: leftovers.into_iter().map(|i| problem.stop(i).clone()).collect(),
    }
}

/// Route planner with its collaborators
pub struct RoutePlanner {
    resolver: Arc<dyn AddressResolver>,
    provider: Arc<dyn TravelTimeProvider>,
    depot: Depot,
    config: PlannerConfig,
}

impl RoutePlanner {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        provider: Arc<dyn TravelTimeProvider>,
        depot: Depot,
        config: PlannerConfig,
    ) -> Self {
        Self { resolver, provider, depot, config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    /// Plan routes for a request
    pub async fn plan(&self, request: &CalculateRoutesRequest) -> Result<Vec<PlannedRouteDto>, PlanningError> {
        let drivers = validate_request(request, self.config.vehicle_capacity)?;

        let postal_codes = collect_postal_codes(request);
        let resolved = resolve_postal_codes(
            self.resolver.as_ref(),
            &postal_codes,
            self.config.geocode_concurrency,
        )
        .await;

        let stops = build_stops(request, &resolved);
        let groups = partition_by_region(stops);
        let allocations = apportion_drivers(&groups, &drivers, request.mode);

        info!(
            "Planning {} packages for {} drivers in {} regions ({} mode)",
            request.package_count(),
            drivers.len(),
            groups.len(),
            request.mode.as_str()
        );

        let plans = try_join_all(
            groups
                .into_iter()
                .zip(allocations)
                .enumerate()
                .map(|(index, (group, slots))| self.plan_group(index, group, slots, request.mode)),
        )
        .await?;

        let mut response = Vec::new();
        let mut overflow = Vec::new();
        for plan in plans {
            response.extend(plan.routes.iter().map(PlannedRoute::to_dto));
            overflow.extend(plan.overflow);
        }

        if !overflow.is_empty() {
            let packages: usize = overflow.iter().map(Stop::package_count).sum();
            warn!("{} stops ({} packages) could not be assigned", overflow.len(), packages);
            response.push(overflow_dto(&overflow));
        }

        Ok(response)
    }

    async fn plan_group(
        &self,
        index: usize,
        group: RegionGroup,
        drivers: Vec<DriverSlot>,
        mode: PlanMode,
    ) -> Result<RegionPlan, PlanningError> {
        let region = group.region_code.clone();
        if drivers.is_empty() {
            warn!("Region {} has no drivers, {} stops overflow", region, group.stops.len());
            return Ok(RegionPlan { routes: Vec::new(), overflow: group.stops });
        }

        let split_cap = strategy_for(mode).split_cap(&drivers, group.package_count(), &self.config);
        let stops = split_oversized(group.stops, split_cap);

        let points: Vec<_> = std::iter::once(self.depot.coordinates)
            .chain(stops.iter().map(|s| s.coordinates))
            .collect();
        let provider = Arc::clone(&self.provider);
        let concurrency = self.config.matrix_concurrency;
        let call_timeout = self.config.provider_timeout;
        let matrix = tokio::spawn(async move {
            build_matrix(&points, provider.as_ref(), concurrency, call_timeout).await
        })
        .await
        .map_err(|source| PlanningError::Internal {
            region: region.clone(),
            stage: PlanningStage::MatrixBuild,
            source,
        })?;

        let problem = RegionProblem::new(&region, &self.depot, stops, matrix);
        let config = self.config.clone();
        let seed = config.random_seed.map(|s| s.wrapping_add(index as u64));

        tokio::task::spawn_blocking(move || {
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            plan_region(&problem, &drivers, mode, &config, &mut rng)
        })
        .await
        .map_err(|source| PlanningError::Internal {
            region,
            stage: PlanningStage::Construction,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::geocoding::{LookupTableResolver, ResolvedAddress};
    use crate::services::routing::MockRoutingService;
    use crate::types::{BagInput, Coordinates, DriverInput, PackageInput, WAREHOUSE_PACKAGE_ID};
    use anyhow::Result;
    use async_trait::async_trait;

    struct UnreachableProvider;

    #[async_trait]
    impl TravelTimeProvider for UnreachableProvider {
        async fn travel_time(&self, _: &Coordinates, _: &Coordinates) -> Result<Option<f64>> {
            Ok(None)
        }

        fn name(&self) -> &str {
            "unreachable"
        }
    }

    fn depot() -> Depot {
        Depot {
            label: "Starting Location".to_string(),
            coordinates: Coordinates::new(40.10144209586004, -75.30578283911566),
        }
    }

    fn lookup() -> LookupTableResolver {
        let mut table = LookupTableResolver::new();
        for (postal, lat, lng, region) in [
            ("19401", 40.110, -75.306, "PE"),
            ("19403", 40.105, -75.315, "PE"),
            ("19405", 40.098, -75.298, "PE"),
            ("08002", 40.090, -75.320, "NE"),
            ("08003", 40.094, -75.325, "NE"),
        ] {
            table.insert(
                postal,
                ResolvedAddress {
                    coordinates: Coordinates::new(lat, lng),
                    region_code: region.to_string(),
                },
            );
        }
        table
    }

    fn planner_with(provider: Arc<dyn TravelTimeProvider>, config: PlannerConfig) -> RoutePlanner {
        RoutePlanner::new(Arc::new(lookup()), provider, depot(), config)
    }

    fn planner() -> RoutePlanner {
        planner_with(Arc::new(MockRoutingService::new()), PlannerConfig::seeded(17))
    }

    fn package(postal: &str, tracking_id: &str) -> PackageInput {
        PackageInput {
            postal: postal.to_string(),
            tracking_id: tracking_id.to_string(),
        }
    }

    fn driver(id: i64, max_hours: f64) -> DriverInput {
        DriverInput { id, max_hours }
    }

    fn package_ids(routes: &[PlannedRouteDto]) -> Vec<String> {
        let mut ids: Vec<String> = routes
            .iter()
            .flat_map(|r| r.route.iter())
            .flat_map(|s| s.package_ids.iter().cloned())
            .filter(|id| id != WAREHOUSE_PACKAGE_ID)
            .collect();
        ids.sort();
        ids
    }

    #[test]
    fn test_validate_request() {
        let valid = CalculateRoutesRequest {
            loose_packages: vec![package("19401", "A")],
            drivers: vec![driver(1, 8.0)],
            ..Default::default()
        };
        let slots = validate_request(&valid, 48).unwrap();
        assert_eq!(slots, vec![DriverSlot { id: 1, max_hours: 8.0, package_capacity: 48 }]);

        let no_packages = CalculateRoutesRequest { drivers: vec![driver(1, 8.0)], ..Default::default() };
        assert!(matches!(validate_request(&no_packages, 48), Err(PlanningError::InvalidInput(_))));

        let no_drivers = CalculateRoutesRequest { drivers: vec![], ..valid.clone() };
        assert!(matches!(validate_request(&no_drivers, 48), Err(PlanningError::InvalidInput(_))));

        for hours in [0.0, -2.0, f64::NAN, f64::INFINITY] {
            let bad = CalculateRoutesRequest { drivers: vec![driver(1, hours)], ..valid.clone() };
            assert!(validate_request(&bad, 48).is_err());
        }

        let duplicate = CalculateRoutesRequest { drivers: vec![driver(1, 8.0), driver(1, 4.0)], ..valid };
        let err = validate_request(&duplicate, 48).unwrap_err();
        assert!(err.to_string().contains("duplicate driver id 1"));
    }

    #[tokio::test]
    async fn test_three_nearby_stops_single_route() {
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("19401", "A"), package("19403", "B"), package("19405", "C")],
            drivers: vec![driver(1, 4.0)],
            ..Default::default()
        };

        let routes = planner().plan(&request).await.unwrap();

        assert_eq!(routes.len(), 1);
        let route = &routes[0];
        assert_eq!(route.route.len(), 4);
        assert_eq!(route.route[0].package_ids, vec![WAREHOUSE_PACKAGE_ID.to_string()]);
        assert_eq!(route.route[0].address, "Starting Location");
        assert_eq!(route.driver_max, 4.0);
        // Service alone is 450 s; the legs are a few minutes each
        assert!(route.total_hours > 450.0 / 3600.0);
        assert!(route.total_hours < 0.5);
        assert_eq!(package_ids(&routes), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_oversized_stop_split_across_drivers() {
        let request = CalculateRoutesRequest {
            loose_packages: (0..50).map(|i| package("19401", &format!("T{:02}", i))).collect(),
            drivers: vec![driver(1, 2.0), driver(2, 2.0)],
            ..Default::default()
        };

        let routes = planner().plan(&request).await.unwrap();

        assert_eq!(routes.len(), 2);
        for route in &routes {
            assert!(!route.driver_id.is_overflow());
            let packages: usize = route.route[1..].iter().map(|s| s.package_ids.len()).sum();
            assert!(packages <= 48);
        }
        assert_eq!(package_ids(&routes).len(), 50);
    }

    #[tokio::test]
    async fn test_manual_split_keeps_short_shift_driver_busy() {
        // Budgets are 42 and 14, so the stop is cut into chunks of at most 14
        let request = CalculateRoutesRequest {
            loose_packages: (0..50).map(|i| package("19401", &format!("T{:02}", i))).collect(),
            drivers: vec![driver(1, 6.0), driver(2, 2.0)],
            mode: PlanMode::Manual,
            ..Default::default()
        };

        let routes = planner().plan(&request).await.unwrap();

        assert!(routes.iter().all(|r| !r.driver_id.is_overflow()));
        assert_eq!(routes.len(), 2);
        for route in &routes {
            let packages: usize = route.route[1..].iter().map(|s| s.package_ids.len()).sum();
            assert!(route.route[1..].iter().all(|s| s.package_ids.len() <= 14));
            if route.driver_id == crate::types::DriverRef::Driver(2) {
                assert!(packages <= 14);
            } else {
                assert!(packages <= 42);
            }
        }
        assert_eq!(package_ids(&routes).len(), 50);
    }

    #[tokio::test]
    async fn test_plan_runs_inside_spawned_task() {
        let planner = Arc::new(planner());
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("19401", "A"), package("08002", "B")],
            drivers: vec![driver(1, 4.0)],
            mode: PlanMode::Manual,
            ..Default::default()
        };

        let task = {
            let planner = Arc::clone(&planner);
            tokio::spawn(async move { planner.plan(&request).await })
        };

        let routes = task.await.unwrap().unwrap();
        assert_eq!(package_ids(&routes), vec!["A", "B"]);
    }

    #[tokio::test]
    async fn test_every_package_planned_exactly_once() {
        let request = CalculateRoutesRequest {
            loose_packages: vec![
                package("19401", "A"),
                package("08002", "B"),
                package("19403", "C"),
                package("19401", "D"),
                package("99999", "LOST"),
            ],
            bags: vec![BagInput {
                label: "Bag 1".to_string(),
                items: vec![package("19405", "E"), package("08003", "F"), package("08003", "G")],
            }],
            drivers: vec![driver(1, 6.0), driver(2, 6.0)],
            mode: PlanMode::Auto,
        };

        let routes = planner().plan(&request).await.unwrap();

        assert_eq!(package_ids(&routes), vec!["A", "B", "C", "D", "E", "F", "G"]);
        for route in routes.iter().filter(|r| !r.driver_id.is_overflow()) {
            assert_eq!(route.route[0].package_ids, vec![WAREHOUSE_PACKAGE_ID.to_string()]);
            assert!(route.total_hours <= route.driver_max + 300.0 / 3600.0);
        }
    }

    #[tokio::test]
    async fn test_unreachable_stops_all_overflow() {
        let planner = planner_with(Arc::new(UnreachableProvider), PlannerConfig::seeded(1));
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("19401", "A"), package("19403", "B"), package("08002", "C")],
            drivers: vec![driver(1, 8.0), driver(2, 8.0)],
            ..Default::default()
        };

        let routes = planner.plan(&request).await.unwrap();

        assert_eq!(routes.len(), 1);
        let overflow = &routes[0];
        assert!(overflow.driver_id.is_overflow());
        assert_eq!(overflow.total_hours, 0.0);
        assert_eq!(overflow.driver_max, 0.0);
        assert_eq!(overflow.route.len(), 3);
        assert_eq!(package_ids(&routes), vec!["A", "B", "C"]);
    }

    #[tokio::test]
    async fn test_region_without_drivers_overflows() {
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("08002", "A"), package("19401", "B"), package("19403", "C")],
            drivers: vec![driver(1, 8.0)],
            mode: PlanMode::Auto,
            ..Default::default()
        };

        let routes = planner().plan(&request).await.unwrap();

        // NE is planned first and takes the only driver
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].route[1].region_code, "NE");
        let overflow = routes.last().unwrap();
        assert!(overflow.driver_id.is_overflow());
        assert_eq!(overflow.route.len(), 2);
    }

    #[tokio::test]
    async fn test_manual_mode_reuses_drivers_per_region() {
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("08002", "A"), package("19401", "B")],
            drivers: vec![driver(5, 8.0)],
            mode: PlanMode::Manual,
            ..Default::default()
        };

        let routes = planner().plan(&request).await.unwrap();

        assert_eq!(routes.len(), 2);
        assert!(routes.iter().all(|r| r.driver_id == crate::types::DriverRef::Driver(5)));
    }

    #[tokio::test]
    async fn test_fixed_seed_is_reproducible() {
        let request = CalculateRoutesRequest {
            loose_packages: ["19401", "19403", "19405", "08002", "08003"]
                .iter()
                .enumerate()
                .flat_map(|(i, postal)| (0..3).map(move |k| package(postal, &format!("{}-{}", i, k))))
                .collect(),
            drivers: vec![driver(1, 3.0), driver(2, 3.0), driver(3, 5.0)],
            mode: PlanMode::Manual,
            ..Default::default()
        };

        let first = planner().plan(&request).await.unwrap();
        let second = planner().plan(&request).await.unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_planning() {
        let request = CalculateRoutesRequest {
            loose_packages: vec![package("19401", "A")],
            ..Default::default()
        };

        let err = planner().plan(&request).await.unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }
}
