//! Geographic scope handling: zone generation, candidate bucketing and the
//! region/bounds lookups behind them.

pub mod bounds;
pub mod population;
pub mod regions;
pub mod zones;

pub use bounds::{BoundsQuery, BoundsResolver, HttpBoundsResolver};
pub use population::{Candidate, CandidateBuckets, PopulationResolver, StaticPopulationIndex};
pub use regions::{RegionIndex, StateEntry, StaticRegionIndex, validate_country};
pub use zones::{GeoBounds, LatLng, Zone, ZoneConfig, ZoneKind, ZoneScope, generate_zone_batch};
