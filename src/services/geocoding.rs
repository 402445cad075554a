//! Postal code resolution with safety features
//!
//! This module turns postal codes into coordinates plus a region code:
//! - `LookupTableResolver` answers from a local table (no throttling)
//! - `NominatimGeocoder` asks Nominatim (circuit breaker; throttled by the
//!   queue)
//! - `GeocodeQueue` serializes every remote lookup behind one worker task so
//!   concurrent planning requests never exceed the remote rate limit
//! - `TieredResolver` tries the local table first and only queues misses
//! - `MockGeocoder` is deterministic and offline (tests, development)
//!
//! Configuration via GEOCODER_BACKEND env variable:
//! - "mock" → MockGeocoder (tests, development)
//! - "nominatim" → queued NominatimGeocoder (production)
//! - "none" → local lookup table only

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::services::nominatim::NominatimClient;
use crate::types::Coordinates;

/// Resolver trait - abstraction for all postal code lookups
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Resolve a postal code. Returns None if it cannot be geocoded.
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>>;

    /// Get the name of this resolver implementation
    fn name(&self) -> &'static str;
}

/// Result of a postal code lookup
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAddress {
    pub coordinates: Coordinates,
    pub region_code: String,
}

/// Resolve every unique postal code once.
///
/// Lookups run concurrently; remote resolvers serialize themselves. Errors
/// and misses are logged and left out of the returned map.
pub async fn resolve_postal_codes(
    resolver: &dyn AddressResolver,
    postal_codes: &[String],
    concurrency: usize,
) -> HashMap<String, ResolvedAddress> {
    let mut unique: Vec<String> = postal_codes.to_vec();
    unique.sort_unstable();
    unique.dedup();

    info!(
        "Resolving {} unique postal codes with {}",
        unique.len(),
        resolver.name()
    );

    let results: Vec<(String, Option<ResolvedAddress>)> = futures::stream::iter(unique)
        .map(|postal: String| async move {
            match resolver.resolve(&postal).await {
                Ok(Some(resolved)) => (postal, Some(resolved)),
                Ok(None) => {
                    warn!("Could not geocode postal code {}", postal);
                    (postal, None)
                }
                Err(e) => {
                    warn!("Error geocoding postal code {}: {:#}", postal, e);
                    (postal, None)
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results
        .into_iter()
        .filter_map(|(postal, resolved)| resolved.map(|r| (postal, r)))
        .collect()
}

// ==========================================================================
// MockGeocoder Implementation
// ==========================================================================

/// Region code returned by the mock geocoder
pub const MOCK_REGION: &str = "PA";

/// Mock geocoder for testing - returns deterministic fake coordinates
pub struct MockGeocoder;

impl MockGeocoder {
    pub fn new() -> Self {
        Self
    }

    /// Generate deterministic coordinates from the postal code hash
    /// Coordinates fall inside a box around the default depot
    fn hash_to_coordinates(postal_code: &str) -> Coordinates {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        postal_code.hash(&mut hasher);
        let hash = hasher.finish();

        const LAT_MIN: f64 = 39.90;
        const LAT_MAX: f64 = 40.30;
        const LNG_MIN: f64 = -75.60;
        const LNG_MAX: f64 = -75.00;

        let lat_normalized = ((hash >> 32) as f64) / (u32::MAX as f64);
        let lng_normalized = ((hash & 0xFFFFFFFF) as f64) / (u32::MAX as f64);

        Coordinates {
            lat: LAT_MIN + lat_normalized * (LAT_MAX - LAT_MIN),
            lng: LNG_MIN + lng_normalized * (LNG_MAX - LNG_MIN),
        }
    }
}

impl Default for MockGeocoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AddressResolver for MockGeocoder {
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>> {
        if postal_code.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(ResolvedAddress {
            coordinates: Self::hash_to_coordinates(postal_code),
            region_code: MOCK_REGION.to_string(),
        }))
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

// ==========================================================================
// LookupTableResolver Implementation
// ==========================================================================

#[derive(Debug, Deserialize)]
struct LookupRecord {
    postal: String,
    lat: f64,
    lng: f64,
    region: String,
}

/// Local postal code table, answers without any network access
#[derive(Debug, Default)]
pub struct LookupTableResolver {
    entries: HashMap<String, ResolvedAddress>,
}

impl LookupTableResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, postal_code: impl Into<String>, resolved: ResolvedAddress) {
        self.entries.insert(postal_code.into(), resolved);
    }

    /// Load from CSV with header `postal,lat,lng,region`
    pub fn from_csv_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut table = Self::new();
        for (line, record) in csv_reader.deserialize::<LookupRecord>().enumerate() {
            let record = record.with_context(|| format!("Invalid postal lookup row {}", line + 2))?;
            table.insert(
                record.postal,
                ResolvedAddress {
                    coordinates: Coordinates { lat: record.lat, lng: record.lng },
                    region_code: record.region.to_uppercase(),
                },
            );
        }
        Ok(table)
    }

    pub fn from_csv_path(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open postal lookup table {}", path.display()))?;
        Self::from_csv_reader(file)
    }

    pub fn get(&self, postal_code: &str) -> Option<&ResolvedAddress> {
        self.entries.get(postal_code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl AddressResolver for LookupTableResolver {
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>> {
        Ok(self.get(postal_code).cloned())
    }

    fn name(&self) -> &'static str {
        "lookup-table"
    }
}

// ==========================================================================
// RateLimiter Implementation
// ==========================================================================

/// Rate limiter that enforces minimum interval between calls
pub struct RateLimiter {
    last_call: Arc<Mutex<Option<Instant>>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_call: Arc::new(Mutex::new(None)),
            min_interval,
        }
    }

    /// Wait until it's safe to make another call
    pub async fn wait(&self) {
        let mut last = self.last_call.lock().await;

        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                drop(last); // Release lock while sleeping
                tokio::time::sleep(wait_time).await;
                last = self.last_call.lock().await;
            }
        }

        *last = Some(Instant::now());
    }
}

// ==========================================================================
// CircuitBreaker Implementation
// ==========================================================================

/// Circuit breaker to prevent hammering a failing service
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
    last_failure: parking_lot::Mutex<Option<Instant>>,
    recovery_time: Duration,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, recovery_time: Duration) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
            last_failure: parking_lot::Mutex::new(None),
            recovery_time,
        }
    }

    /// Check if circuit is open (blocking calls)
    pub fn is_open(&self) -> bool {
        let count = self.failure_count.load(Ordering::Relaxed);
        if count < self.threshold {
            return false;
        }
        match *self.last_failure.lock() {
            Some(last_time) => last_time.elapsed() < self.recovery_time,
            None => true,
        }
    }

    /// Record a failure
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
        *self.last_failure.lock() = Some(Instant::now());
    }

    /// Record a success (resets failure count)
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }
}

// ==========================================================================
// NominatimGeocoder Implementation
// ==========================================================================

/// Default rate limit interval (Nominatim allows 1 req/s)
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1100;

/// Default circuit breaker threshold (3 failures)
pub const DEFAULT_CIRCUIT_BREAKER_THRESHOLD: u32 = 3;

/// Default circuit breaker recovery time (5 minutes)
pub const DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS: u64 = 300;

/// Default timeout of a single remote lookup
pub const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 20;

/// Nominatim geocoder with circuit breaker protection
///
/// Not throttled on its own; `GeocodeQueue` is the single rate gate.
pub struct NominatimGeocoder {
    client: NominatimClient,
    /// Circuit breaker - pub(crate) for testing
    pub(crate) circuit_breaker: CircuitBreaker,
}

impl NominatimGeocoder {
    pub fn with_config(
        base_url: &str,
        circuit_breaker_threshold: u32,
        circuit_breaker_recovery: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: NominatimClient::new(base_url)?,
            circuit_breaker: CircuitBreaker::new(circuit_breaker_threshold, circuit_breaker_recovery),
        })
    }
}

#[async_trait]
impl AddressResolver for NominatimGeocoder {
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>> {
        if self.circuit_breaker.is_open() {
            warn!("Circuit breaker is open, rejecting geocoding request");
            anyhow::bail!("Geocoding service temporarily unavailable (circuit breaker open)");
        }

        match self.client.lookup_postal_code(postal_code).await {
            Ok(Some(output)) => {
                self.circuit_breaker.record_success();
                debug!("Geocoded {} -> {}", postal_code, output.display_name);
                Ok(Some(ResolvedAddress {
                    coordinates: output.coordinates,
                    region_code: output.region_code,
                }))
            }
            Ok(None) => {
                // No result found is not a failure
                self.circuit_breaker.record_success();
                Ok(None)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        "nominatim"
    }
}

// ==========================================================================
// GeocodeQueue Implementation
// ==========================================================================

struct GeocodeJob {
    postal_code: String,
    reply: oneshot::Sender<Result<Option<ResolvedAddress>>>,
}

/// Serialized remote lookup queue with a minimum-interval gate
///
/// One background task owns the remote resolver; every submitted lookup waits
/// its turn, so the remote service sees at most one call per interval no
/// matter how many requests are planning at once.
pub struct GeocodeQueue {
    sender: mpsc::Sender<GeocodeJob>,
    remote_name: &'static str,
}

impl GeocodeQueue {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn spawn(
        remote: Arc<dyn AddressResolver>,
        min_interval: Duration,
        call_timeout: Duration,
    ) -> Self {
        let (sender, mut receiver) = mpsc::channel::<GeocodeJob>(1024);
        let remote_name = remote.name();

        tokio::spawn(async move {
            let gate = RateLimiter::new(min_interval);
            while let Some(job) = receiver.recv().await {
                gate.wait().await;
                let result = match tokio::time::timeout(call_timeout, remote.resolve(&job.postal_code)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!(
                        "lookup of {} timed out after {:?}",
                        job.postal_code,
                        call_timeout
                    )),
                };
                let _ = job.reply.send(result);
            }
            debug!("Geocode queue closed");
        });

        Self { sender, remote_name }
    }
}

#[async_trait]
impl AddressResolver for GeocodeQueue {
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(GeocodeJob { postal_code: postal_code.to_string(), reply })
            .await
            .map_err(|_| anyhow::anyhow!("geocode queue ({}) is closed", self.remote_name))?;
        response
            .await
            .context("geocode queue dropped the lookup")?
    }

    fn name(&self) -> &'static str {
        "queued-remote"
    }
}

// ==========================================================================
// TieredResolver Implementation
// ==========================================================================

/// Local table first, remote fallback for misses
pub struct TieredResolver {
    local: Option<LookupTableResolver>,
    remote: Option<Arc<dyn AddressResolver>>,
}

impl TieredResolver {
    pub fn new(local: Option<LookupTableResolver>, remote: Option<Arc<dyn AddressResolver>>) -> Self {
        Self { local, remote }
    }
}

#[async_trait]
impl AddressResolver for TieredResolver {
    async fn resolve(&self, postal_code: &str) -> Result<Option<ResolvedAddress>> {
        if let Some(hit) = self.local.as_ref().and_then(|l| l.get(postal_code)) {
            return Ok(Some(hit.clone()));
        }
        match &self.remote {
            Some(remote) => remote.resolve(postal_code).await,
            None => Ok(None),
        }
    }

    fn name(&self) -> &'static str {
        "tiered"
    }
}

// ==========================================================================
// Factory function
// ==========================================================================

/// Resolver settings, read from the environment by `Config`
#[derive(Debug, Clone)]
pub struct GeocoderSettings {
    /// "mock", "nominatim" or "none"
    pub backend: String,
    pub nominatim_url: String,
    pub rate_limit_interval: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_recovery: Duration,
    pub lookup_timeout: Duration,
    pub lookup_table_path: Option<PathBuf>,
}

impl Default for GeocoderSettings {
    fn default() -> Self {
        Self {
            backend: "mock".to_string(),
            nominatim_url: "https://nominatim.openstreetmap.org".to_string(),
            rate_limit_interval: Duration::from_millis(DEFAULT_RATE_LIMIT_MS),
            circuit_breaker_threshold: DEFAULT_CIRCUIT_BREAKER_THRESHOLD,
            circuit_breaker_recovery: Duration::from_secs(DEFAULT_CIRCUIT_BREAKER_RECOVERY_SECS),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
            lookup_table_path: None,
        }
    }
}

/// Create the resolver stack. Must be called inside a tokio runtime.
pub fn create_resolver(settings: &GeocoderSettings) -> Result<Arc<dyn AddressResolver>> {
    let local = match &settings.lookup_table_path {
        Some(path) => {
            let table = LookupTableResolver::from_csv_path(path)?;
            info!("Loaded {} postal codes from {}", table.len(), path.display());
            Some(table)
        }
        None => None,
    };

    let remote: Option<Arc<dyn AddressResolver>> = match settings.backend.as_str() {
        "mock" => {
            info!("Using MockGeocoder");
            Some(Arc::new(MockGeocoder::new()))
        }
        "nominatim" => {
            info!("Using queued NominatimGeocoder at {}", settings.nominatim_url);
            let geocoder = NominatimGeocoder::with_config(
                &settings.nominatim_url,
                settings.circuit_breaker_threshold,
                settings.circuit_breaker_recovery,
            )?;
            Some(Arc::new(GeocodeQueue::spawn(
                Arc::new(geocoder),
                settings.rate_limit_interval,
                settings.lookup_timeout,
            )))
        }
        "none" => None,
        other => {
            warn!("Unknown GEOCODER_BACKEND '{}', using mock", other);
            Some(Arc::new(MockGeocoder::new()))
        }
    };

    Ok(Arc::new(TieredResolver::new(local, remote)))
}
