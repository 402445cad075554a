//! Leftover stop reconciliation

use tracing::debug;

use super::config::PlannerConfig;
use super::model::{RegionProblem, RouteBuildState};

/// Append each orphan to the route it extends most cheaply
///
/// Routes are tried in ascending order of travel time from their last stop.
/// A splice must keep the route within its package caps and time budget and
/// may not add more than the detour ceiling. Returns the orphans no route
/// could take, in input order.
pub fn resolve_overflow(
    problem: &RegionProblem,
    routes: &mut [RouteBuildState],
    orphans: &[usize],
    config: &PlannerConfig,
) -> Vec<usize> {
    let mut leftovers = Vec::new();

    for &orphan in orphans {
        let packages = problem.packages_at(orphan);
        let service = config.service_seconds(packages);

        let mut order: Vec<(u64, usize)> = routes
            .iter()
            .enumerate()
            .filter(|(_, route)| route.has_stops())
            .map(|(r, route)| (problem.matrix.get(route.last_stop(), orphan), r))
            .collect();
        order.sort_by_key(|&(added, _)| added);

        let target = order.into_iter().find(|&(added, r)| {
            let route = &routes[r];
            added <= config.overflow_detour_ceiling_seconds
                && packages <= route.remaining_packages()
                && route.elapsed_seconds() + added + service
                    <= config.time_budget_seconds(route.driver.max_hours)
        });

        match target {
            Some((added, r)) => {
                debug!(
                    "Spliced stop {} onto driver {} (+{} s)",
                    problem.stop(orphan).id,
                    routes[r].driver.id,
                    added
                );
                routes[r].push_stop(orphan, added, service, packages);
            }
            None => leftovers.push(orphan),
        }
    }

    leftovers
}
