//! Location types

use serde::{Deserialize, Serialize};

/// Coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub const fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Bit-exact identity key, used to deduplicate matrix queries
    pub fn identity_key(&self) -> (u64, u64) {
        (self.lat.to_bits(), self.lng.to_bits())
    }

    /// Arithmetic mean of a set of points (None for an empty set)
    pub fn centroid(points: &[Coordinates]) -> Option<Coordinates> {
        if points.is_empty() {
            return None;
        }
        let n = points.len() as f64;
        let (lat, lng) = points
            .iter()
            .fold((0.0, 0.0), |(lat, lng), p| (lat + p.lat, lng + p.lng));
        Some(Coordinates { lat: lat / n, lng: lng / n })
    }
}
