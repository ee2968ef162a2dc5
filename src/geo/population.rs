//! Population-bucketed candidate ordering.
//!
//! When a run targets a whole state or country, candidate cities are drawn
//! from the region index and ordered big → mid → small → unknown so dense
//! areas are covered first. Buckets are shuffled internally for variety
//! between runs.

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::DEFAULT_MIN_POPULATION;

/// Population at or above which a candidate is a "big" city.
pub const BIG_CITY_POPULATION: u64 = 1_000_000;

/// Population at or above which a candidate is a "mid" city.
pub const MID_CITY_POPULATION: u64 = 100_000;

/// A candidate city for bucketized scraping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Candidate {
    pub city_name: String,
    pub state_code: Option<String>,
    pub state_name: Option<String>,
    pub population: Option<u64>,
}

/// Pure population lookup over a preloaded index. No I/O at query time.
pub trait PopulationResolver: Send + Sync {
    fn population(&self, iso2: &str, admin_code: Option<&str>, city: &str) -> Option<u64>;
}

/// In-memory population index keyed by `(country, state, city)` lowercase.
#[derive(Debug, Default)]
pub struct StaticPopulationIndex {
    entries: HashMap<(String, Option<String>, String), u64>,
}

impl StaticPopulationIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, iso2: &str, admin_code: Option<&str>, city: &str, population: u64) {
        self.entries.insert(key(iso2, admin_code, city), population);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn key(iso2: &str, admin_code: Option<&str>, city: &str) -> (String, Option<String>, String) {
    (
        iso2.to_lowercase(),
        admin_code.map(str::to_lowercase),
        city.to_lowercase(),
    )
}

impl PopulationResolver for StaticPopulationIndex {
    fn population(&self, iso2: &str, admin_code: Option<&str>, city: &str) -> Option<u64> {
        self.entries
            .get(&key(iso2, admin_code, city))
            .copied()
            // Fall back to a state-less entry when the index has one.
            .or_else(|| self.entries.get(&key(iso2, None, city)).copied())
    }
}

/// Candidates partitioned by population size.
#[derive(Debug, Default)]
pub struct CandidateBuckets {
    pub big: Vec<Candidate>,
    pub mid: Vec<Candidate>,
    pub small: Vec<Candidate>,
    pub unknown: Vec<Candidate>,
}

impl CandidateBuckets {
    /// Partition `candidates`, resolving missing populations through
    /// `resolver`. Known populations below `min_population` are dropped.
    /// Each bucket is shuffled.
    #[must_use]
    pub fn build(
        candidates: Vec<Candidate>,
        resolver: &dyn PopulationResolver,
        iso2: &str,
        min_population: Option<u64>,
    ) -> Self {
        let min_population = min_population.unwrap_or(DEFAULT_MIN_POPULATION);
        let mut buckets = Self::default();

        for mut candidate in candidates {
            if candidate.population.is_none() {
                candidate.population = resolver.population(
                    iso2,
                    candidate.state_code.as_deref(),
                    &candidate.city_name,
                );
            }
            match candidate.population {
                Some(population) if population < min_population => continue,
                Some(population) if population >= BIG_CITY_POPULATION => {
                    buckets.big.push(candidate);
                }
                Some(population) if population >= MID_CITY_POPULATION => {
                    buckets.mid.push(candidate);
                }
                Some(_) => buckets.small.push(candidate),
                None => buckets.unknown.push(candidate),
            }
        }

        let mut rng = rand::rng();
        buckets.big.shuffle(&mut rng);
        buckets.mid.shuffle(&mut rng);
        buckets.small.shuffle(&mut rng);
        buckets.unknown.shuffle(&mut rng);
        buckets
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.big.len() + self.mid.len() + self.small.len() + self.unknown.len()
    }

    /// Buckets in scraping order.
    pub fn ordered(&self) -> [(&'static str, &[Candidate]); 4] {
        [
            ("big", self.big.as_slice()),
            ("mid", self.mid.as_slice()),
            ("small", self.small.as_slice()),
            ("unknown", self.unknown.as_slice()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(city: &str, population: Option<u64>) -> Candidate {
        Candidate {
            city_name: city.into(),
            state_code: Some("CA".into()),
            state_name: None,
            population,
        }
    }

    #[test]
    fn partitions_by_thresholds() {
        let index = StaticPopulationIndex::new();
        let buckets = CandidateBuckets::build(
            vec![
                candidate("Los Angeles", Some(3_900_000)),
                candidate("Fresno", Some(540_000)),
                candidate("Clovis", Some(120_000)),
                candidate("Sanger", Some(27_000)),
                candidate("Nowhere", None),
            ],
            &index,
            "US",
            None,
        );
        assert_eq!(buckets.big.len(), 1);
        assert_eq!(buckets.mid.len(), 2);
        assert_eq!(buckets.small.len(), 1);
        assert_eq!(buckets.unknown.len(), 1);
    }

    #[test]
    fn drops_below_minimum() {
        let index = StaticPopulationIndex::new();
        let buckets = CandidateBuckets::build(
            vec![candidate("Tiny", Some(900)), candidate("Kept", Some(9_000))],
            &index,
            "US",
            Some(5_000),
        );
        assert_eq!(buckets.len(), 1);
        assert_eq!(buckets.small[0].city_name, "Kept");
    }

    #[test]
    fn resolver_fills_missing_population() {
        let mut index = StaticPopulationIndex::new();
        index.insert("US", Some("CA"), "Fresno", 540_000);
        let buckets =
            CandidateBuckets::build(vec![candidate("Fresno", None)], &index, "US", None);
        assert_eq!(buckets.mid.len(), 1);
        assert_eq!(buckets.mid[0].population, Some(540_000));
    }

    #[test]
    fn buckets_are_disjoint_subset_of_input() {
        let index = StaticPopulationIndex::new();
        let input = vec![
            candidate("A", Some(2_000_000)),
            candidate("B", Some(150_000)),
            candidate("C", Some(50_000)),
            candidate("D", None),
            candidate("E", Some(100)),
        ];
        let input_names: Vec<_> = input.iter().map(|c| c.city_name.clone()).collect();
        let buckets = CandidateBuckets::build(input, &index, "US", None);

        let mut seen = std::collections::HashSet::new();
        for (_, bucket) in buckets.ordered() {
            for candidate in bucket {
                assert!(seen.insert(candidate.city_name.clone()), "bucket overlap");
                assert!(input_names.contains(&candidate.city_name));
                if let Some(population) = candidate.population {
                    assert!(population >= DEFAULT_MIN_POPULATION);
                }
            }
        }
    }
}
