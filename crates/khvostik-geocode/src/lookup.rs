use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use khvostik_types::models::coordinates_valid;

/// One forward-geocoding candidate as the external service reports it.
/// Coordinates arrive as strings.
#[derive(Debug, Clone, Deserialize)]
pub struct Candidate {
    pub lat: String,
    pub lon: String,
    #[serde(default)]
    pub display_name: String,
}

impl Candidate {
    /// Parsed `(latitude, longitude)`, or `None` if either string is not a
    /// finite number inside the coordinate ranges.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        let lat: f64 = self.lat.trim().parse().ok()?;
        let lon: f64 = self.lon.trim().parse().ok()?;
        coordinates_valid(lat, lon).then_some((lat, lon))
    }
}

/// External forward-geocoding service.
#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Candidates for a free-text query, best first. An empty list means the
    /// service answered but knows nothing.
    async fn search(&self, query: &str) -> Result<Vec<Candidate>>;
}

/// Nominatim (OpenStreetMap) `/search` endpoint.
pub struct NominatimLookup {
    client: Client,
    base_url: String,
    country_code: String,
    limit: u8,
}

impl NominatimLookup {
    pub fn new(base_url: &str, user_agent: &str, timeout: Duration, country_code: &str) -> Result<Self> {
        // Nominatim's usage policy rejects requests without an identifying agent.
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            country_code: country_code.to_string(),
            limit: 1,
        })
    }
}

#[async_trait]
impl GeoLookup for NominatimLookup {
    async fn search(&self, query: &str) -> Result<Vec<Candidate>> {
        let url = format!("{}/search", self.base_url);
        let limit = self.limit.to_string();

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("q", query),
                ("format", "json"),
                ("countrycodes", self.country_code.as_str()),
                ("limit", limit.as_str()),
            ])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            bail!("geocoder returned HTTP {}", status);
        }

        let candidates: Vec<Candidate> = resp.json().await?;
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(lat: &str, lon: &str) -> Candidate {
        Candidate {
            lat: lat.to_string(),
            lon: lon.to_string(),
            display_name: String::new(),
        }
    }

    #[test]
    fn parses_numeric_strings() {
        assert_eq!(candidate("45.1234", " 37.5678").coordinates(), Some((45.1234, 37.5678)));
    }

    #[test]
    fn rejects_non_numeric_and_out_of_range() {
        assert_eq!(candidate("north", "37.5").coordinates(), None);
        assert_eq!(candidate("45.1", "").coordinates(), None);
        assert_eq!(candidate("NaN", "37.5").coordinates(), None);
        assert_eq!(candidate("95.0", "37.5").coordinates(), None);
    }

    #[test]
    fn deserializes_nominatim_payload() {
        let raw = r#"[{"place_id":1,"lat":"44.8951","lon":"37.3142","display_name":"Анапа, Краснодарский край, Россия"}]"#;
        let parsed: Vec<Candidate> = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].coordinates(), Some((44.8951, 37.3142)));
    }
}
