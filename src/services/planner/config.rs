//! Route planner configuration
//!
//! Every tuning constant of the engine lives here. The thresholds and bonus
//! weights are empirically tuned defaults; only the constraint mechanism
//! (hard cap, then tier relaxation, then overflow) is a contract.

use std::time::Duration;

/// Step and diameter limits of one relaxation tier, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintTier {
    /// Max travel time from the route's last stop to the candidate
    pub step_seconds: u64,
    /// Max travel time between the candidate and any stop already on the route
    pub diameter_seconds: u64,
}

impl ConstraintTier {
    pub const fn new(step_seconds: u64, diameter_seconds: u64) -> Self {
        Self { step_seconds, diameter_seconds }
    }
}

/// Standard tier followed by two progressively looser tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierProfile {
    pub tiers: [ConstraintTier; 3],
}

impl TierProfile {
    /// Tiers for shifts up to `short_shift_max_hours`
    pub const fn short_shift() -> Self {
        Self {
            tiers: [
                ConstraintTier::new(420, 1200),
                ConstraintTier::new(720, 1800),
                ConstraintTier::new(1080, 2400),
            ],
        }
    }

    /// Tiers for longer shifts, which may spread further
    pub const fn long_shift() -> Self {
        Self {
            tiers: [
                ConstraintTier::new(420, 1800),
                ConstraintTier::new(900, 2700),
                ConstraintTier::new(1500, 3600),
            ],
        }
    }
}

/// Configuration for the route planner
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Hard package cap of one vehicle
    pub vehicle_capacity: usize,
    /// Fixed handling time at every stop
    pub stop_service_seconds: u64,
    /// Handling time added per package at a stop
    pub package_service_seconds: u64,
    /// Allowed overrun of a driver's shift
    pub grace_seconds: u64,
    /// Stem radius granted per hour of shift (longer shifts seed farther out)
    pub stem_seconds_per_shift_hour: u64,
    /// Radius within which other stops count towards a candidate's density
    pub neighbor_radius_seconds: u64,
    /// Seed score bonus per package on the candidate itself
    pub seed_package_bonus_seconds: f64,
    /// Seed score bonus per package on neighboring stops
    pub seed_density_bonus_seconds: f64,
    /// Manual mode: seeds avoid other seeds' surroundings within this radius
    pub seed_exclusion_seconds: u64,
    /// Looser tiers are tried only while the route holds fewer packages than
    /// this share of vehicle capacity
    pub relaxation_capacity_fraction: f64,
    /// Shifts up to this length use `short_shift_profile`
    pub short_shift_max_hours: f64,
    pub short_shift_profile: TierProfile,
    pub long_shift_profile: TierProfile,
    /// Manual mode: extra headroom on the proportional package budget
    pub soft_budget_slack: f64,
    /// Max added travel when splicing a leftover stop onto a route
    pub overflow_detour_ceiling_seconds: u64,
    /// Max full 2-opt passes per route
    pub two_opt_max_iterations: usize,
    /// Hard cap on driver slots considered per region
    pub max_drivers: usize,
    /// Concurrent travel time queries per matrix build
    pub matrix_concurrency: usize,
    /// Timeout of one travel time query
    pub provider_timeout: Duration,
    /// Concurrent postal code lookups (remote lookups serialize anyway)
    pub geocode_concurrency: usize,
    /// Fixed seed for tie-breaking; None draws from entropy
    pub random_seed: Option<u64>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            vehicle_capacity: 48,
            stop_service_seconds: 120,
            package_service_seconds: 30,
            grace_seconds: 300,
            stem_seconds_per_shift_hour: 900,
            neighbor_radius_seconds: 300,
            seed_package_bonus_seconds: 20.0,
            seed_density_bonus_seconds: 10.0,
            seed_exclusion_seconds: 600,
            relaxation_capacity_fraction: 0.4,
            short_shift_max_hours: 5.0,
            short_shift_profile: TierProfile::short_shift(),
            long_shift_profile: TierProfile::long_shift(),
            soft_budget_slack: 0.10,
            overflow_detour_ceiling_seconds: 2700,
            two_opt_max_iterations: 1000,
            max_drivers: 200,
            matrix_concurrency: 8,
            provider_timeout: Duration::from_secs(10),
            geocode_concurrency: 16,
            random_seed: None,
        }
    }
}

impl PlannerConfig {
    /// Default configuration with a fixed random seed (reproducible plans)
    pub fn seeded(seed: u64) -> Self {
        Self {
            random_seed: Some(seed),
            ..Default::default()
        }
    }

    /// Service time at a stop carrying `package_count` packages
    pub fn service_seconds(&self, package_count: usize) -> u64 {
        self.stop_service_seconds + self.package_service_seconds * package_count as u64
    }

    /// Drive plus service time a driver may accumulate, grace included
    pub fn time_budget_seconds(&self, max_hours: f64) -> u64 {
        (max_hours.max(0.0) * 3600.0).round() as u64 + self.grace_seconds
    }

    /// Max depot-to-seed travel time for a shift length
    pub fn stem_radius_seconds(&self, max_hours: f64) -> u64 {
        (self.stem_seconds_per_shift_hour as f64 * max_hours.max(0.0)).round() as u64
    }

    /// Package count below which looser tiers may be tried
    pub fn relaxation_threshold(&self) -> usize {
        (self.vehicle_capacity as f64 * self.relaxation_capacity_fraction).ceil() as usize
    }

    /// Tier profile for a shift length
    pub fn profile_for(&self, max_hours: f64) -> TierProfile {
        if max_hours <= self.short_shift_max_hours {
            self.short_shift_profile
        } else {
            self.long_shift_profile
        }
    }
}
