//! Region partitioning and driver apportioning

use std::collections::BTreeMap;

use crate::types::PlanMode;

use super::model::{DriverSlot, Stop};

/// Stops of one region code
#[derive(Debug, Clone)]
pub struct RegionGroup {
    pub region_code: String,
    pub stops: Vec<Stop>,
}

impl RegionGroup {
    pub fn package_count(&self) -> usize {
        self.stops.iter().map(Stop::package_count).sum()
    }
}

/// Group stops by region code, ordered by code; stop order is kept within a group
pub fn partition_by_region(stops: Vec<Stop>) -> Vec<RegionGroup> {
    let mut groups: BTreeMap<String, Vec<Stop>> = BTreeMap::new();
    for stop in stops {
        groups.entry(stop.region_code.clone()).or_default().push(stop);
    }

    groups
        .into_iter()
        .map(|(region_code, stops)| RegionGroup { region_code, stops })
        .collect()
}

/// Driver slots available to each group
///
/// Manual mode hands every region the full list. Automatic mode splits the
/// list in input order by each region's share of packages; the last region
/// takes whatever remains so the counts add up to the driver total.
pub fn apportion_drivers(groups: &[RegionGroup], drivers: &[DriverSlot], mode: PlanMode) -> Vec<Vec<DriverSlot>> {
    match mode {
        PlanMode::Manual => groups.iter().map(|_| drivers.to_vec()).collect(),
        PlanMode::Auto => {
            let total_packages: usize = groups.iter().map(RegionGroup::package_count).sum();
            let mut remaining = drivers.len();
            let mut cursor = 0;

            groups
                .iter()
                .enumerate()
                .map(|(k, group)| {
                    let count = if k + 1 == groups.len() {
                        remaining
                    } else {
                        let share = if total_packages == 0 {
                            0.0
                        } else {
                            group.package_count() as f64 / total_packages as f64
                        };
                        let proportional = (drivers.len() as f64 * share).round() as usize;
                        proportional.max(1).min(remaining)
                    };

                    let slots = drivers[cursor..cursor + count].to_vec();
                    cursor += count;
                    remaining -= count;
                    slots
                })
                .collect()
        }
    }
}
