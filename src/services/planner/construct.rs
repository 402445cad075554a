//! Constrained-growth route construction
//!
//! Each driver slot is seeded with a close, dense stop near the depot and then
//! grown greedily from its last stop. Growth is bounded by the load caps, the
//! driver's time budget, the step limit (last stop to candidate) and the
//! diameter limit (candidate to every stop already on the route). When a
//! lightly loaded route stalls, looser tiers are tried before giving up.

use rand::{Rng, RngCore};
use tracing::debug;

use crate::types::PlanMode;

use super::config::{ConstraintTier, PlannerConfig, TierProfile};
use super::model::{DriverSlot, PlanningState, RegionProblem, RouteBuildState, SlotPhase, DEPOT_INDEX};

const SCORE_EPSILON: f64 = 1e-9;

/// Seed/grow primitives over one region
pub struct RouteConstructor<'a> {
    problem: &'a RegionProblem,
    config: &'a PlannerConfig,
}

impl<'a> RouteConstructor<'a> {
    pub fn new(problem: &'a RegionProblem, config: &'a PlannerConfig) -> Self {
        Self { problem, config }
    }

    pub fn problem(&self) -> &RegionProblem {
        self.problem
    }

    fn service_at(&self, index: usize) -> u64 {
        self.config.service_seconds(self.problem.packages_at(index))
    }

    fn travel(&self, from: usize, to: usize) -> u64 {
        self.problem.matrix.get(from, to)
    }

    fn fits_load(&self, route: &RouteBuildState, index: usize) -> bool {
        self.problem.packages_at(index) <= route.remaining_packages()
    }

    fn fits_time(&self, route: &RouteBuildState, travel: u64, index: usize) -> bool {
        let projected = route
            .elapsed_seconds()
            .saturating_add(travel)
            .saturating_add(self.service_at(index));
        projected <= self.config.time_budget_seconds(route.driver.max_hours)
    }

    /// Unassigned stops this slot could start from
    fn seed_candidates(&self, state: &PlanningState, route: &RouteBuildState) -> Vec<usize> {
        let stem_radius = self.config.stem_radius_seconds(route.driver.max_hours);
        state
            .unassigned
            .iter()
            .copied()
            .filter(|&c| {
                let stem = self.travel(DEPOT_INDEX, c);
                stem <= stem_radius && self.fits_load(route, c) && self.fits_time(route, stem, c)
            })
            .collect()
    }

    /// Pick the seed with the lowest score (closest and densest)
    ///
    /// Bags take precedence when any is eligible. Candidates near one of
    /// `existing_seeds` are skipped unless nothing else remains. Ties are
    /// broken by `rng`.
    pub fn select_seed(
        &self,
        state: &PlanningState,
        route: &RouteBuildState,
        existing_seeds: &[usize],
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        let eligible = self.seed_candidates(state, route);
        if eligible.is_empty() {
            return None;
        }

        let bags: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&c| self.problem.stop(c).is_aggregate)
            .collect();
        let mut pool = if bags.is_empty() { eligible.clone() } else { bags };

        if !existing_seeds.is_empty() {
            let exclusion = self.config.seed_exclusion_seconds;
            let apart: Vec<usize> = pool
                .iter()
                .copied()
                .filter(|&c| {
                    existing_seeds
                        .iter()
                        .all(|&s| self.travel(s, c).min(self.travel(c, s)) > exclusion)
                })
                .collect();
            if !apart.is_empty() {
                pool = apart;
            }
        }

        let scored: Vec<(usize, f64)> = pool
            .iter()
            .map(|&c| (c, self.seed_score(c, &eligible)))
            .collect();
        let best = scored
            .iter()
            .map(|&(_, score)| score)
            .fold(f64::INFINITY, f64::min);
        let ties: Vec<usize> = scored
            .iter()
            .filter(|&&(_, score)| (score - best).abs() < SCORE_EPSILON)
            .map(|&(c, _)| c)
            .collect();

        match ties.len() {
            0 => None,
            1 => Some(ties[0]),
            n => Some(ties[rng.gen_range(0..n)]),
        }
    }

    fn seed_score(&self, candidate: usize, eligible: &[usize]) -> f64 {
        let radius = self.config.neighbor_radius_seconds;
        let neighbor_packages: usize = eligible
            .iter()
            .filter(|&&o| o != candidate && self.travel(candidate, o) <= radius)
            .map(|&o| self.problem.packages_at(o))
            .sum();

        self.travel(DEPOT_INDEX, candidate) as f64
            - self.problem.packages_at(candidate) as f64 * self.config.seed_package_bonus_seconds
            - neighbor_packages as f64 * self.config.seed_density_bonus_seconds
    }

    /// Seed route `slot`; an unseedable slot becomes `Rejected`
    pub fn seed_route(
        &self,
        state: &mut PlanningState,
        slot: usize,
        existing_seeds: &[usize],
        rng: &mut dyn RngCore,
    ) -> Option<usize> {
        match self.select_seed(state, &state.routes[slot], existing_seeds, rng) {
            Some(seed) => {
                state.assign(slot, seed, self.problem, self.service_at(seed));
                state.routes[slot].phase = SlotPhase::Seeded;
                debug!(
                    "Driver {} seeded with stop {}",
                    state.routes[slot].driver.id,
                    self.problem.stop(seed).id
                );
                Some(seed)
            }
            None => {
                state.routes[slot].phase = SlotPhase::Rejected;
                debug!("Driver {} has no valid seed", state.routes[slot].driver.id);
                None
            }
        }
    }

    /// Packages on unassigned stops around `index`, its own included
    fn density(&self, state: &PlanningState, index: usize) -> usize {
        let radius = self.config.neighbor_radius_seconds;
        let neighbors: usize = state
            .unassigned
            .iter()
            .filter(|&&o| o != index && self.travel(index, o) <= radius)
            .map(|&o| self.problem.packages_at(o))
            .sum();
        self.problem.packages_at(index) + neighbors
    }

    fn extension_fits(&self, route: &RouteBuildState, candidate: usize, tier: &ConstraintTier) -> bool {
        if !self.fits_load(route, candidate) {
            return false;
        }

        let step = self.travel(route.last_stop(), candidate);
        if step > tier.step_seconds {
            return false;
        }

        let within_diameter = route.stop_sequence[1..].iter().all(|&s| {
            self.travel(candidate, s) <= tier.diameter_seconds
                && self.travel(s, candidate) <= tier.diameter_seconds
        });

        within_diameter && self.fits_time(route, step, candidate)
    }

    /// Best extension at one tier
    ///
    /// Stops at the last stop's address come first; otherwise the shortest
    /// step wins, ties going to the denser stop and then the lower index.
    fn best_extension(&self, state: &PlanningState, route: &RouteBuildState, tier: &ConstraintTier) -> Option<usize> {
        let last = route.last_stop();
        let last_coordinates = self.problem.stop(last).coordinates;
        let mut best_step = u64::MAX;
        let mut closest: Vec<usize> = Vec::new();

        for &candidate in &state.unassigned {
            if !self.extension_fits(route, candidate, tier) {
                continue;
            }
            if last != DEPOT_INDEX && self.problem.stop(candidate).coordinates == last_coordinates {
                return Some(candidate);
            }

            let step = self.travel(last, candidate);
            if step < best_step {
                best_step = step;
                closest.clear();
                closest.push(candidate);
            } else if step == best_step {
                closest.push(candidate);
            }
        }

        closest
            .into_iter()
            .max_by(|&a, &b| {
                self.density(state, a)
                    .cmp(&self.density(state, b))
                    .then(b.cmp(&a))
            })
    }

    /// Next stop for a route, relaxing tiers while the route is light
    pub fn next_extension(&self, state: &PlanningState, route: &RouteBuildState) -> Option<usize> {
        let threshold = self.config.relaxation_threshold();

        for (level, tier) in route.profile.tiers.iter().enumerate() {
            if level > 0 && route.packages_loaded >= threshold {
                break;
            }
            if let Some(candidate) = self.best_extension(state, route, tier) {
                if level > 0 {
                    debug!(
                        "Driver {} admitted stop {} at relaxation tier {}",
                        route.driver.id,
                        self.problem.stop(candidate).id,
                        level
                    );
                }
                return Some(candidate);
            }
        }

        None
    }

    /// Extend route `slot` by one stop; a route that cannot grow is finalized
    pub fn grow_step(&self, state: &mut PlanningState, slot: usize) -> bool {
        match self.next_extension(state, &state.routes[slot]) {
            Some(candidate) => {
                state.assign(slot, candidate, self.problem, self.service_at(candidate));
                state.routes[slot].phase = SlotPhase::Growing;
                true
            }
            None => {
                state.routes[slot].phase = SlotPhase::Finalized;
                false
            }
        }
    }
}

/// Driver allocation and growth order of one planning mode
pub trait ConstructionStrategy: Send + Sync {
    fn mode(&self) -> PlanMode;

    /// Package budget of each driver slot
    fn package_budgets(&self, drivers: &[DriverSlot], region_packages: usize, config: &PlannerConfig) -> Vec<usize>;

    /// Constraint profile of each driver slot
    fn profiles(&self, drivers: &[DriverSlot], config: &PlannerConfig) -> Vec<TierProfile>;

    /// Assign stops from `state.unassigned` to `state.routes`
    fn construct(&self, constructor: &RouteConstructor<'_>, state: &mut PlanningState, rng: &mut dyn RngCore);

    /// Largest package count a single non-bag stop may keep
    ///
    /// Chunks fit the smallest budget, so every driver can take at least one.
    fn split_cap(&self, drivers: &[DriverSlot], region_packages: usize, config: &PlannerConfig) -> usize {
        self.package_budgets(drivers, region_packages, config)
            .into_iter()
            .min()
            .unwrap_or(config.vehicle_capacity)
            .min(config.vehicle_capacity)
            .max(1)
    }

    /// Fresh build states, one per driver slot up to the safety cap
    fn initial_routes(&self, drivers: &[DriverSlot], region_packages: usize, config: &PlannerConfig) -> Vec<RouteBuildState> {
        let drivers = &drivers[..drivers.len().min(config.max_drivers)];
        let budgets = self.package_budgets(drivers, region_packages, config);
        let profiles = self.profiles(drivers, config);

        drivers
            .iter()
            .zip(budgets)
            .zip(profiles)
            .map(|((driver, budget), profile)| RouteBuildState::new(*driver, budget, profile))
            .collect()
    }
}

/// Fills one driver completely before starting the next
pub struct AutomaticStrategy;

impl ConstructionStrategy for AutomaticStrategy {
    fn mode(&self) -> PlanMode {
        PlanMode::Auto
    }

    fn package_budgets(&self, drivers: &[DriverSlot], _region_packages: usize, config: &PlannerConfig) -> Vec<usize> {
        vec![config.vehicle_capacity; drivers.len()]
    }

    /// One shared profile, taken from the longest shift
    fn profiles(&self, drivers: &[DriverSlot], config: &PlannerConfig) -> Vec<TierProfile> {
        let longest = drivers.iter().map(|d| d.max_hours).fold(0.0, f64::max);
        vec![config.profile_for(longest); drivers.len()]
    }

    fn construct(&self, constructor: &RouteConstructor<'_>, state: &mut PlanningState, rng: &mut dyn RngCore) {
        let max_steps = constructor.problem().stops.len();

        for slot in 0..state.routes.len() {
            if state.unassigned.is_empty() {
                break;
            }
            if constructor.seed_route(state, slot, &[], rng).is_none() {
                continue;
            }

            let mut steps = 0;
            while steps < max_steps && constructor.grow_step(state, slot) {
                steps += 1;
            }
            state.routes[slot].phase = SlotPhase::Finalized;
        }
    }
}

/// Seeds every driver first, then grows all routes in turn
pub struct ManualStrategy;

impl ConstructionStrategy for ManualStrategy {
    fn mode(&self) -> PlanMode {
        PlanMode::Manual
    }

    /// Share of the region's packages proportional to each driver's hours
    fn package_budgets(&self, drivers: &[DriverSlot], region_packages: usize, config: &PlannerConfig) -> Vec<usize> {
        let total_hours: f64 = drivers.iter().map(|d| d.max_hours).sum();
        drivers
            .iter()
            .map(|driver| {
                if total_hours <= 0.0 {
                    return config.vehicle_capacity;
                }
                let share = region_packages as f64 * driver.max_hours / total_hours;
                let budget = (share * (1.0 + config.soft_budget_slack)).ceil() as usize;
                budget.clamp(1, config.vehicle_capacity)
            })
            .collect()
    }

    fn profiles(&self, drivers: &[DriverSlot], config: &PlannerConfig) -> Vec<TierProfile> {
        drivers.iter().map(|d| config.profile_for(d.max_hours)).collect()
    }

    fn construct(&self, constructor: &RouteConstructor<'_>, state: &mut PlanningState, rng: &mut dyn RngCore) {
        let mut seeds: Vec<usize> = Vec::new();
        for slot in 0..state.routes.len() {
            if state.unassigned.is_empty() {
                break;
            }
            if let Some(seed) = constructor.seed_route(state, slot, &seeds, rng) {
                seeds.push(seed);
            }
        }

        let max_rounds = constructor.problem().stops.len();
        let mut rounds = 0;
        while rounds < max_rounds {
            let mut grew = false;
            for slot in 0..state.routes.len() {
                if state.routes[slot].phase.is_active() && constructor.grow_step(state, slot) {
                    grew = true;
                }
            }
            if !grew {
                break;
            }
            rounds += 1;
        }

        for route in state.routes.iter_mut().filter(|r| r.phase.is_active()) {
            route.phase = SlotPhase::Finalized;
        }
    }
}

/// Strategy for a planning mode
pub fn strategy_for(mode: PlanMode) -> Box<dyn ConstructionStrategy> {
    match mode {
        PlanMode::Auto => Box::new(AutomaticStrategy),
        PlanMode::Manual => Box::new(ManualStrategy),
    }
}
