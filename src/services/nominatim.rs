//! Nominatim geocoding client

use anyhow::{Context, Result};
use serde::Deserialize;
use crate::types::Coordinates;

/// Region code used when Nominatim returns no state
pub const UNKNOWN_REGION: &str = "UNKNOWN";

/// Nominatim API response
#[derive(Debug, Deserialize)]
pub struct NominatimResult {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
pub struct NominatimAddress {
    pub state: Option<String>,
    pub postcode: Option<String>,
}

/// Postal code lookup output
#[derive(Debug, Clone)]
pub struct PostalLookupOutput {
    pub coordinates: Coordinates,
    pub region_code: String,
    pub display_name: String,
}

/// Nominatim geocoding client
pub struct NominatimClient {
    base_url: String,
    country: String,
    client: reqwest::Client,
}

impl NominatimClient {
    /// Create a new client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("RouteFinder/1.0")
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            country: "US".to_string(),
            client,
        })
    }

    fn search_url(&self, postal_code: &str) -> String {
        format!(
            "{}/search?postalcode={}&country={}&format=json&accept-language=en&addressdetails=1&limit=1",
            self.base_url,
            urlencoding::encode(postal_code),
            self.country
        )
    }

    /// Geocode a postal code to coordinates and a region code
    pub async fn lookup_postal_code(&self, postal_code: &str) -> Result<Option<PostalLookupOutput>> {
        let url = self.search_url(postal_code);

        let response = self.client
            .get(&url)
            .send()
            .await
            .context("Failed to send geocoding request")?;

        if !response.status().is_success() {
            anyhow::bail!("Nominatim returned status {}", response.status());
        }

        let results: Vec<NominatimResult> = response
            .json()
            .await
            .context("Failed to parse geocoding response")?;

        match results.into_iter().next() {
            Some(result) => Ok(Some(parse_result(result)?)),
            None => Ok(None),
        }
    }
}

fn parse_result(result: NominatimResult) -> Result<PostalLookupOutput> {
    let lat: f64 = result.lat.parse().context("Invalid latitude")?;
    let lng: f64 = result.lon.parse().context("Invalid longitude")?;

    let region_code = result
        .address
        .as_ref()
        .and_then(|a| a.state.as_deref())
        .map(region_code_from_state)
        .unwrap_or_else(|| UNKNOWN_REGION.to_string());

    Ok(PostalLookupOutput {
        coordinates: Coordinates { lat, lng },
        region_code,
        display_name: result.display_name,
    })
}

/// Region code is the first two letters of the state name, uppercased
pub fn region_code_from_state(state: &str) -> String {
    let code: String = state.trim().chars().take(2).collect::<String>().to_uppercase();
    if code.is_empty() {
        UNKNOWN_REGION.to_string()
    } else {
        code
    }
}
