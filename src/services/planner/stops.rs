//! Stop intake and oversized stop splitting

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::services::geocoding::ResolvedAddress;
use crate::types::{CalculateRoutesRequest, Coordinates, PackageInput};

use super::model::Stop;

fn is_usable(package: &PackageInput) -> bool {
    !package.postal.trim().is_empty() && !package.tracking_id.trim().is_empty()
}

/// Postal codes referenced by the request (duplicates included)
pub fn collect_postal_codes(request: &CalculateRoutesRequest) -> Vec<String> {
    request
        .loose_packages
        .iter()
        .chain(request.bags.iter().flat_map(|bag| bag.items.iter()))
        .filter(|package| is_usable(package))
        .map(|package| package.postal.trim().to_string())
        .collect()
}

/// Turn the request into stops using resolved postal codes
///
/// Loose packages group into one stop per postal code in first-seen order.
/// Each bag becomes one aggregate stop at the centroid of its resolved items.
/// Packages whose postal code did not resolve are dropped.
pub fn build_stops(
    request: &CalculateRoutesRequest,
    resolved: &HashMap<String, ResolvedAddress>,
) -> Vec<Stop> {
    let mut stops: Vec<Stop> = Vec::new();
    let mut by_postal: HashMap<String, usize> = HashMap::new();
    let mut dropped = 0usize;

    for package in request.loose_packages.iter().filter(|p| is_usable(p)) {
        let postal = package.postal.trim();
        let Some(address) = resolved.get(postal) else {
            dropped += 1;
            continue;
        };

        let index = *by_postal.entry(postal.to_string()).or_insert_with(|| {
            stops.push(Stop {
                id: format!("zip-{}", postal),
                display_label: postal.to_string(),
                coordinates: address.coordinates,
                region_code: address.region_code.clone(),
                package_ids: Vec::new(),
                is_aggregate: false,
                matrix_index: 0,
            });
            stops.len() - 1
        });
        stops[index].package_ids.push(package.tracking_id.trim().to_string());
    }

    for (bag_index, bag) in request.bags.iter().enumerate() {
        let mut points: Vec<Coordinates> = Vec::new();
        let mut package_ids: Vec<String> = Vec::new();
        let mut regions: Vec<(String, usize)> = Vec::new();

        for item in bag.items.iter().filter(|p| is_usable(p)) {
            let Some(address) = resolved.get(item.postal.trim()) else {
                dropped += 1;
                continue;
            };
            points.push(address.coordinates);
            package_ids.push(item.tracking_id.trim().to_string());
            match regions.iter_mut().find(|(code, _)| *code == address.region_code) {
                Some((_, count)) => *count += 1,
                None => regions.push((address.region_code.clone(), 1)),
            }
        }

        let Some(centroid) = Coordinates::centroid(&points) else {
            warn!("Bag '{}' has no resolvable items, skipping", bag.label);
            continue;
        };

        // Most frequent region, first seen on ties
        let region_code = regions
            .iter()
            .fold(None::<&(String, usize)>, |best, entry| match best {
                Some(b) if b.1 >= entry.1 => Some(b),
                _ => Some(entry),
            })
            .map(|(code, _)| code.clone())
            .unwrap_or_default();

        stops.push(Stop {
            id: format!("bag-{}", bag_index + 1),
            display_label: bag.label.clone(),
            coordinates: centroid,
            region_code,
            package_ids,
            is_aggregate: true,
            matrix_index: 0,
        });
    }

    if dropped > 0 {
        warn!("Dropped {} packages with unresolvable postal codes", dropped);
    }
    debug!("Built {} stops", stops.len());

    stops
}

/// Split non-aggregate stops holding more than `cap` packages
///
/// A stop of n packages becomes ceil(n / cap) balanced chunks at the same
/// address, with ids `<id>#1`, `<id>#2`, ...
pub fn split_oversized(stops: Vec<Stop>, cap: usize) -> Vec<Stop> {
    let cap = cap.max(1);
    let mut result = Vec::with_capacity(stops.len());

    for stop in stops {
        let n = stop.package_count();
        if stop.is_aggregate || n <= cap {
            result.push(stop);
            continue;
        }

        let chunks = n.div_ceil(cap);
        let base = n / chunks;
        let extra = n % chunks;
        debug!("Splitting stop {} ({} packages) into {} chunks", stop.id, n, chunks);

        let mut remaining = stop.package_ids.clone().into_iter();
        for k in 0..chunks {
            let size = base + usize::from(k < extra);
            result.push(Stop {
                id: format!("{}#{}", stop.id, k + 1),
                package_ids: remaining.by_ref().take(size).collect(),
                ..stop.clone()
            });
        }
    }

    result
}
