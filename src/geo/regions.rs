//! Country and administrative-region lookups.
//!
//! Country codes are validated against the full ISO-3166 alpha-2 set. The
//! state and city listings behind bucketized scraping come from a
//! [`RegionIndex`], an injected lookup over a preloaded dataset.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::EngineError;
use crate::geo::population::Candidate;

/// ISO-3166 alpha-2 country codes.
const COUNTRY_CODES: &[&str] = &[
    "AD", "AE", "AF", "AG", "AI", "AL", "AM", "AO", "AQ", "AR", "AS", "AT", "AU", "AW", "AX",
    "AZ", "BA", "BB", "BD", "BE", "BF", "BG", "BH", "BI", "BJ", "BL", "BM", "BN", "BO", "BQ",
    "BR", "BS", "BT", "BV", "BW", "BY", "BZ", "CA", "CC", "CD", "CF", "CG", "CH", "CI", "CK",
    "CL", "CM", "CN", "CO", "CR", "CU", "CV", "CW", "CX", "CY", "CZ", "DE", "DJ", "DK", "DM",
    "DO", "DZ", "EC", "EE", "EG", "EH", "ER", "ES", "ET", "FI", "FJ", "FK", "FM", "FO", "FR",
    "GA", "GB", "GD", "GE", "GF", "GG", "GH", "GI", "GL", "GM", "GN", "GP", "GQ", "GR", "GS",
    "GT", "GU", "GW", "GY", "HK", "HM", "HN", "HR", "HT", "HU", "ID", "IE", "IL", "IM", "IN",
    "IO", "IQ", "IR", "IS", "IT", "JE", "JM", "JO", "JP", "KE", "KG", "KH", "KI", "KM", "KN",
    "KP", "KR", "KW", "KY", "KZ", "LA", "LB", "LC", "LI", "LK", "LR", "LS", "LT", "LU", "LV",
    "LY", "MA", "MC", "MD", "ME", "MF", "MG", "MH", "MK", "ML", "MM", "MN", "MO", "MP", "MQ",
    "MR", "MS", "MT", "MU", "MV", "MW", "MX", "MY", "MZ", "NA", "NC", "NE", "NF", "NG", "NI",
    "NL", "NO", "NP", "NR", "NU", "NZ", "OM", "PA", "PE", "PF", "PG", "PH", "PK", "PL", "PM",
    "PN", "PR", "PS", "PT", "PW", "PY", "QA", "RE", "RO", "RS", "RU", "RW", "SA", "SB", "SC",
    "SD", "SE", "SG", "SH", "SI", "SJ", "SK", "SL", "SM", "SN", "SO", "SR", "SS", "ST", "SV",
    "SX", "SY", "SZ", "TC", "TD", "TF", "TG", "TH", "TJ", "TK", "TL", "TM", "TN", "TO", "TR",
    "TT", "TV", "TW", "TZ", "UA", "UG", "UM", "US", "UY", "UZ", "VA", "VC", "VE", "VG", "VI",
    "VN", "VU", "WF", "WS", "YE", "YT", "ZA", "ZM", "ZW",
];

/// Check a country code against the ISO table.
#[must_use]
pub fn is_valid_country(code: &str) -> bool {
    let upper = code.to_uppercase();
    COUNTRY_CODES.binary_search(&upper.as_str()).is_ok()
}

/// Validate and normalize a country code to uppercase.
pub fn validate_country(code: &str) -> Result<String, EngineError> {
    let upper = code.trim().to_uppercase();
    if COUNTRY_CODES.binary_search(&upper.as_str()).is_ok() {
        Ok(upper)
    } else {
        Err(EngineError::InvalidCountry(code.to_string()))
    }
}

/// One administrative subdivision of a country.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateEntry {
    pub code: String,
    pub name: String,
}

/// Lookup over a preloaded administrative dataset.
///
/// An empty result is not an error; the scheduler falls back to coordinate
/// zones when a scope has no listed children.
#[async_trait]
pub trait RegionIndex: Send + Sync {
    async fn states_of(&self, iso2: &str) -> anyhow::Result<Vec<StateEntry>>;

    async fn cities_of_state(&self, iso2: &str, state_code: &str) -> anyhow::Result<Vec<Candidate>>;

    /// All (state, city) pairs of the country.
    async fn cities_of_country(&self, iso2: &str) -> anyhow::Result<Vec<Candidate>>;
}

/// Flat record for loading a region dataset from JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegionRecord {
    pub country: String,
    pub state_code: String,
    pub state_name: String,
    pub city: String,
    #[serde(default)]
    pub population: Option<u64>,
}

/// In-memory region index.
#[derive(Debug, Default)]
pub struct StaticRegionIndex {
    states: HashMap<String, Vec<StateEntry>>,
    cities: HashMap<(String, String), Vec<Candidate>>,
}

impl StaticRegionIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from a JSON array of [`RegionRecord`].
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let records: Vec<RegionRecord> = serde_json::from_str(raw)?;
        let mut index = Self::new();
        for record in records {
            index.insert(record);
        }
        Ok(index)
    }

    pub fn insert(&mut self, record: RegionRecord) {
        let country = record.country.to_uppercase();
        let state_code = record.state_code.to_uppercase();

        let states = self.states.entry(country.clone()).or_default();
        if !states.iter().any(|s| s.code == state_code) {
            states.push(StateEntry {
                code: state_code.clone(),
                name: record.state_name.clone(),
            });
        }

        self.cities
            .entry((country, state_code.clone()))
            .or_default()
            .push(Candidate {
                city_name: record.city,
                state_code: Some(state_code),
                state_name: Some(record.state_name),
                population: record.population,
            });
    }
}

#[async_trait]
impl RegionIndex for StaticRegionIndex {
    async fn states_of(&self, iso2: &str) -> anyhow::Result<Vec<StateEntry>> {
        Ok(self
            .states
            .get(&iso2.to_uppercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn cities_of_state(&self, iso2: &str, state_code: &str) -> anyhow::Result<Vec<Candidate>> {
        Ok(self
            .cities
            .get(&(iso2.to_uppercase(), state_code.to_uppercase()))
            .cloned()
            .unwrap_or_default())
    }

    async fn cities_of_country(&self, iso2: &str) -> anyhow::Result<Vec<Candidate>> {
        let country = iso2.to_uppercase();
        let mut all = Vec::new();
        for ((c, _), cities) in &self.cities {
            if *c == country {
                all.extend(cities.iter().cloned());
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_validate() {
        assert!(is_valid_country("US"));
        assert!(is_valid_country("de"));
        assert_eq!(validate_country("us").expect("valid"), "US");
    }

    #[test]
    fn unknown_code_is_invalid_country() {
        assert!(matches!(
            validate_country("XX"),
            Err(EngineError::InvalidCountry(_))
        ));
        assert!(matches!(
            validate_country(""),
            Err(EngineError::InvalidCountry(_))
        ));
    }

    #[tokio::test]
    async fn index_groups_by_state() {
        let mut index = StaticRegionIndex::new();
        index.insert(RegionRecord {
            country: "US".into(),
            state_code: "CA".into(),
            state_name: "California".into(),
            city: "Fresno".into(),
            population: Some(540_000),
        });
        index.insert(RegionRecord {
            country: "US".into(),
            state_code: "CA".into(),
            state_name: "California".into(),
            city: "Clovis".into(),
            population: None,
        });
        index.insert(RegionRecord {
            country: "US".into(),
            state_code: "NV".into(),
            state_name: "Nevada".into(),
            city: "Reno".into(),
            population: None,
        });

        let states = index.states_of("us").await.expect("states");
        assert_eq!(states.len(), 2);
        let ca = index.cities_of_state("US", "ca").await.expect("cities");
        assert_eq!(ca.len(), 2);
        let all = index.cities_of_country("US").await.expect("cities");
        assert_eq!(all.len(), 3);
    }
}
