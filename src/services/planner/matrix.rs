//! Travel time matrix assembly

use std::collections::HashMap;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use crate::services::routing::TravelTimeProvider;
use crate::types::Coordinates;

/// Cell value for pairs without a known route
///
/// Large enough to fail every step, diameter and stem check, small enough
/// that adding a few cells never overflows.
pub const UNREACHABLE_SECONDS: u64 = u64::MAX / 4;

/// Dense directed travel times in seconds (row = origin, column = destination)
#[derive(Debug, Clone, PartialEq)]
pub struct TravelTimeMatrix {
    durations: Vec<Vec<u64>>,
    failures: usize,
}

impl TravelTimeMatrix {
    /// Build from explicit rows; the diagonal is forced to zero
    pub fn from_rows(mut durations: Vec<Vec<u64>>) -> Self {
        for (i, row) in durations.iter_mut().enumerate() {
            if let Some(cell) = row.get_mut(i) {
                *cell = 0;
            }
        }
        Self { durations, failures: 0 }
    }

    pub fn get(&self, from: usize, to: usize) -> u64 {
        self.durations[from][to]
    }

    /// Provider queries that ended as unreachable
    pub fn failures(&self) -> usize {
        self.failures
    }

    /// Sum of consecutive legs along a sequence of matrix indices
    pub fn path_seconds(&self, sequence: &[usize]) -> u64 {
        sequence
            .windows(2)
            .map(|leg| self.get(leg[0], leg[1]))
            .fold(0u64, |total, leg| total.saturating_add(leg))
    }
}

/// Build the matrix for `points` (index 0 is the depot)
///
/// Each distinct ordered coordinate pair is queried once; points sharing
/// coordinates get zero between them. Provider errors, timeouts and empty
/// answers become `UNREACHABLE_SECONDS` and count as failures.
pub async fn build_matrix(
    points: &[Coordinates],
    provider: &dyn TravelTimeProvider,
    concurrency: usize,
    call_timeout: Duration,
) -> TravelTimeMatrix {
    let mut unique: Vec<Coordinates> = Vec::new();
    let mut unique_index: HashMap<(u64, u64), usize> = HashMap::new();
    let point_to_unique: Vec<usize> = points
        .iter()
        .map(|point| {
            *unique_index.entry(point.identity_key()).or_insert_with(|| {
                unique.push(*point);
                unique.len() - 1
            })
        })
        .collect();

    let m = unique.len();
    let pairs: Vec<(usize, usize)> = (0..m)
        .flat_map(|a| (0..m).filter(move |&b| b != a).map(move |b| (a, b)))
        .collect();

    info!(
        "Building {}x{} travel time matrix ({} unique points, {} queries via {})",
        points.len(),
        points.len(),
        m,
        pairs.len(),
        provider.name()
    );

    let unique_ref = &unique;
    let results: Vec<((usize, usize), Option<u64>)> = stream::iter(pairs)
        .map(|(a, b)| async move {
            let seconds = query_cell(provider, &unique_ref[a], &unique_ref[b], call_timeout).await;
            ((a, b), seconds)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut condensed = vec![vec![0u64; m]; m];
    let mut failures = 0;
    for ((a, b), seconds) in results {
        condensed[a][b] = match seconds {
            Some(s) => s,
            None => {
                failures += 1;
                UNREACHABLE_SECONDS
            }
        };
    }

    if failures > 0 {
        warn!("Travel time matrix: {} of {} queries unreachable", failures, m * m.saturating_sub(1));
    }

    let n = points.len();
    let durations = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| condensed[point_to_unique[i]][point_to_unique[j]])
                .collect()
        })
        .collect();

    TravelTimeMatrix { durations, failures }
}

async fn query_cell(
    provider: &dyn TravelTimeProvider,
    origin: &Coordinates,
    destination: &Coordinates,
    call_timeout: Duration,
) -> Option<u64> {
    match tokio::time::timeout(call_timeout, provider.travel_time(origin, destination)).await {
        Ok(Ok(Some(seconds))) if seconds.is_finite() && seconds >= 0.0 => {
            Some((seconds.round() as u64).min(UNREACHABLE_SECONDS - 1))
        }
        Ok(Ok(Some(seconds))) => {
            debug!("Provider returned invalid travel time {}", seconds);
            None
        }
        Ok(Ok(None)) => {
            debug!(
                "No route between ({}, {}) and ({}, {})",
                origin.lat, origin.lng, destination.lat, destination.lng
            );
            None
        }
        Ok(Err(e)) => {
            warn!("Travel time query failed: {}", e);
            None
        }
        Err(_) => {
            warn!("Travel time query timed out after {:?}", call_timeout);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::routing::MockRoutingService;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts queries and answers a fixed value
    struct CountingProvider {
        calls: AtomicUsize,
        answer: Option<f64>,
    }

    #[async_trait]
    impl TravelTimeProvider for CountingProvider {
        async fn travel_time(&self, _: &Coordinates, _: &Coordinates) -> Result<Option<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.answer)
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    struct FailingProvider;

    #[async_trait]
    impl TravelTimeProvider for FailingProvider {
        async fn travel_time(&self, _: &Coordinates, _: &Coordinates) -> Result<Option<f64>> {
            anyhow::bail!("routing engine down")
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    struct SlowProvider;

    #[async_trait]
    impl TravelTimeProvider for SlowProvider {
        async fn travel_time(&self, _: &Coordinates, _: &Coordinates) -> Result<Option<f64>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(60.0))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    fn points() -> Vec<Coordinates> {
        vec![
            Coordinates::new(40.1014, -75.3058),
            Coordinates::new(40.1214, -75.3399),
            Coordinates::new(40.0893, -75.3960),
        ]
    }

    #[test]
    fn test_from_rows_forces_zero_diagonal() {
        let matrix = TravelTimeMatrix::from_rows(vec![vec![5, 10], vec![20, 7]]);
        assert_eq!(matrix.get(0, 0), 0);
        assert_eq!(matrix.get(1, 1), 0);
        assert_eq!(matrix.get(0, 1), 10);
        assert_eq!(matrix.get(1, 0), 20);
    }

    #[test]
    fn test_path_seconds() {
        let matrix = TravelTimeMatrix::from_rows(vec![
            vec![0, 100, 300],
            vec![100, 0, 50],
            vec![300, 70, 0],
        ]);
        assert_eq!(matrix.path_seconds(&[0, 1, 2]), 150);
        assert_eq!(matrix.path_seconds(&[0, 2, 1]), 370);
        assert_eq!(matrix.path_seconds(&[0]), 0);
    }

    #[tokio::test]
    async fn test_build_matrix_with_mock_provider() {
        let provider = MockRoutingService::new();
        let matrix = build_matrix(&points(), &provider, 4, Duration::from_secs(1)).await;

        assert_eq!(matrix.durations.len(), 3);
        assert_eq!(matrix.failures(), 0);
        for i in 0..3 {
            assert_eq!(matrix.get(i, i), 0);
            for j in 0..3 {
                if i != j {
                    assert!(matrix.get(i, j) < UNREACHABLE_SECONDS);
                    assert!(matrix.get(i, j) > 0);
                }
            }
        }
    }

    #[tokio::test]
    async fn test_build_matrix_queries_unique_pairs_once() {
        let provider = CountingProvider { calls: AtomicUsize::new(0), answer: Some(120.4) };
        let mut pts = points();
        // Two stops at the depot's address
        pts.push(pts[0]);
        pts.push(pts[1]);

        let matrix = build_matrix(&pts, &provider, 2, Duration::from_secs(1)).await;

        assert_eq!(provider.calls.load(Ordering::SeqCst), 6);
        assert_eq!(matrix.durations.len(), 5);
        assert_eq!(matrix.get(0, 3), 0);
        assert_eq!(matrix.get(4, 1), 0);
        assert_eq!(matrix.get(3, 4), 120);
    }

    #[tokio::test]
    async fn test_build_matrix_sentinels_provider_errors() {
        let matrix = build_matrix(&points(), &FailingProvider, 4, Duration::from_secs(1)).await;

        assert_eq!(matrix.failures(), 6);
        assert_eq!(matrix.get(1, 1), 0);
        assert_eq!(matrix.get(0, 2), UNREACHABLE_SECONDS);
        assert_eq!(matrix.get(2, 0), UNREACHABLE_SECONDS);
    }

    #[tokio::test]
    async fn test_build_matrix_sentinels_empty_answers() {
        let provider = CountingProvider { calls: AtomicUsize::new(0), answer: None };
        let matrix = build_matrix(&points()[..2], &provider, 1, Duration::from_secs(1)).await;

        assert_eq!(matrix.failures(), 2);
        assert_eq!(matrix.get(0, 1), UNREACHABLE_SECONDS);
    }

    #[tokio::test]
    async fn test_build_matrix_sentinels_timeouts() {
        let matrix = build_matrix(&points()[..2], &SlowProvider, 2, Duration::from_millis(100)).await;

        assert_eq!(matrix.failures(), 2);
        assert_eq!(matrix.get(0, 1), UNREACHABLE_SECONDS);
    }
}
