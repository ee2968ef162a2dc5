//! Search-zone generation.
//!
//! A zone is one unit of tier-A discovery: either a name-based query (the
//! center zone) or a coordinate anchor inside the scope's bounding box.
//! Grid zones are generated lazily in batches so a run over a large region
//! never materializes the full grid.

use serde::{Deserialize, Serialize};

/// Kilometres per degree of latitude.
const KM_PER_DEGREE: f64 = 111.0;

/// Overlap offset as a fraction of the grid spacing.
const OVERLAP_FRACTION: f64 = 0.3;

/// Grid spacing at or below which overlap zones are emitted.
const OVERLAP_MAX_SPACING_KM: f64 = 3.0;

/// A geographic bounding box with its center point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
    pub center_lat: f64,
    pub center_lng: f64,
}

impl GeoBounds {
    /// Approximate area in square kilometres.
    #[must_use]
    pub fn area_km2(&self) -> f64 {
        let lat_delta = (self.north - self.south).abs();
        let lng_delta = (self.east - self.west).abs();
        let avg_lat = (self.north + self.south) / 2.0;
        lat_delta * KM_PER_DEGREE * lng_delta * KM_PER_DEGREE * avg_lat.to_radians().cos().abs()
    }
}

/// Coordinate pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

/// How a zone is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ZoneKind {
    /// Name-based query, no coordinates.
    Center,
    /// Coordinate-anchored grid point.
    Grid,
    /// Offset copy of a grid point for coverage overlap.
    GridOverlap,
}

/// One search zone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub kind: ZoneKind,
    pub city_name: Option<String>,
    pub state_code: Option<String>,
    pub state_name: Option<String>,
    pub label: String,
    pub coords: Option<LatLng>,
}

/// The administrative scope a zone config covers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ZoneScope {
    City {
        city: String,
        state_code: Option<String>,
        country_code: String,
    },
    State {
        state_code: String,
        state_name: Option<String>,
        country_code: String,
    },
    Country {
        country_code: String,
    },
}

impl ZoneScope {
    fn label_prefix(&self) -> String {
        match self {
            Self::City { city, .. } => city.to_lowercase().replace(' ', "-"),
            Self::State { state_code, .. } => format!("state-{}", state_code.to_lowercase()),
            Self::Country { country_code } => format!("country-{}", country_code.to_lowercase()),
        }
    }

    fn city_name(&self) -> Option<String> {
        match self {
            Self::City { city, .. } => Some(city.clone()),
            _ => None,
        }
    }

    fn state_code(&self) -> Option<String> {
        match self {
            Self::City { state_code, .. } => state_code.clone(),
            Self::State { state_code, .. } => Some(state_code.clone()),
            Self::Country { .. } => None,
        }
    }

    fn state_name(&self) -> Option<String> {
        match self {
            Self::State { state_name, .. } => state_name.clone(),
            _ => None,
        }
    }
}

/// Persistent zone-generation state for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub scope: ZoneScope,
    /// `None` for a center-only config (shallow scrape or geocoding miss).
    pub bounds: Option<GeoBounds>,
    pub grid_spacing_km: f64,
    pub total_possible_zones: usize,
    pub batch_size: usize,
    pub max_total_zones: usize,
}

/// Pick grid spacing from the scope area.
#[must_use]
pub fn grid_spacing_km(area_km2: f64) -> f64 {
    if area_km2 < 25.0 {
        1.0
    } else if area_km2 < 50.0 {
        2.0
    } else if area_km2 < 200.0 {
        3.0
    } else if area_km2 < 1000.0 {
        4.0
    } else {
        5.0
    }
}

impl ZoneConfig {
    /// Center-only config; used when `deep` is off or bounds could not be
    /// resolved.
    #[must_use]
    pub fn center_only(scope: ZoneScope, batch_size: usize, max_total_zones: usize) -> Self {
        Self {
            scope,
            bounds: None,
            grid_spacing_km: 0.0,
            total_possible_zones: 0,
            batch_size: batch_size.max(1),
            max_total_zones: max_total_zones.max(1),
        }
    }

    /// Full config over resolved bounds.
    #[must_use]
    pub fn with_bounds(
        scope: ZoneScope,
        bounds: GeoBounds,
        batch_size: usize,
        max_total_zones: usize,
    ) -> Self {
        let spacing = grid_spacing_km(bounds.area_km2());
        let (rows, cols) = grid_dimensions(&bounds, spacing);
        Self {
            scope,
            bounds: Some(bounds),
            grid_spacing_km: spacing,
            total_possible_zones: rows * cols,
            batch_size: batch_size.max(1),
            max_total_zones: max_total_zones.max(1),
        }
    }

    /// The name-based zone scraped before any grid batch.
    #[must_use]
    pub fn center_zone(&self) -> Zone {
        Zone {
            kind: ZoneKind::Center,
            city_name: self.scope.city_name(),
            state_code: self.scope.state_code(),
            state_name: self.scope.state_name(),
            label: format!("{}-center", self.scope.label_prefix()),
            coords: None,
        }
    }

    /// Grid zones actually generatable under the run cap.
    #[must_use]
    pub fn planned_zones(&self) -> usize {
        self.total_possible_zones.min(self.max_total_zones)
    }

    /// Number of batches covering the planned zones.
    #[must_use]
    pub fn total_batches(&self) -> usize {
        self.planned_zones().div_ceil(self.batch_size)
    }
}

fn grid_dimensions(bounds: &GeoBounds, spacing_km: f64) -> (usize, usize) {
    let lat_delta = (bounds.north - bounds.south).abs();
    let lng_delta = (bounds.east - bounds.west).abs();
    let avg_lat = (bounds.north + bounds.south) / 2.0;
    let lat_spacing = spacing_km / KM_PER_DEGREE;
    let lng_spacing = spacing_km / (KM_PER_DEGREE * avg_lat.to_radians().cos().abs().max(1e-6));
    let rows = (lat_delta / lat_spacing).ceil().max(1.0) as usize;
    let cols = (lng_delta / lng_spacing).ceil().max(1.0) as usize;
    (rows, cols)
}

/// Generate the grid zones of one batch by row-major traversal.
///
/// Indices covered are `[batch * batch_size, min((batch + 1) * batch_size,
/// planned))`. At fine grid spacing each primary zone also emits four
/// offset copies clipped to the bounds.
#[must_use]
pub fn generate_zone_batch(config: &ZoneConfig, batch_number: usize) -> Vec<Zone> {
    let Some(bounds) = &config.bounds else {
        return Vec::new();
    };

    let (rows, cols) = grid_dimensions(bounds, config.grid_spacing_km);
    let planned = config.planned_zones().min(rows * cols);
    let start = batch_number * config.batch_size;
    let end = ((batch_number + 1) * config.batch_size).min(planned);
    if start >= end {
        return Vec::new();
    }

    let avg_lat = (bounds.north + bounds.south) / 2.0;
    let lat_spacing = config.grid_spacing_km / KM_PER_DEGREE;
    let lng_spacing =
        config.grid_spacing_km / (KM_PER_DEGREE * avg_lat.to_radians().cos().abs().max(1e-6));

    let clamp_lat = |lat: f64| lat.clamp(bounds.south.min(bounds.north), bounds.north.max(bounds.south));
    let clamp_lng = |lng: f64| lng.clamp(bounds.west.min(bounds.east), bounds.east.max(bounds.west));

    let mut zones = Vec::with_capacity(end - start);
    let prefix = config.scope.label_prefix();

    for index in start..end {
        let row = index / cols;
        let col = index % cols;
        let lat = clamp_lat(bounds.south + (row as f64 + 0.5) * lat_spacing);
        let lng = clamp_lng(bounds.west + (col as f64 + 0.5) * lng_spacing);

        zones.push(Zone {
            kind: ZoneKind::Grid,
            city_name: config.scope.city_name(),
            state_code: config.scope.state_code(),
            state_name: config.scope.state_name(),
            label: format!("{prefix}-zone-{index}"),
            coords: Some(LatLng { lat, lng }),
        });

        if config.grid_spacing_km <= OVERLAP_MAX_SPACING_KM {
            let lat_offset = lat_spacing * OVERLAP_FRACTION;
            let lng_offset = lng_spacing * OVERLAP_FRACTION;
            let offsets = [
                (lat_offset, lng_offset),
                (lat_offset, -lng_offset),
                (-lat_offset, lng_offset),
                (-lat_offset, -lng_offset),
            ];
            for (overlap_index, (dlat, dlng)) in offsets.iter().enumerate() {
                zones.push(Zone {
                    kind: ZoneKind::GridOverlap,
                    city_name: config.scope.city_name(),
                    state_code: config.scope.state_code(),
                    state_name: config.scope.state_name(),
                    label: format!("{prefix}-zone-{index}-overlap-{}", overlap_index + 1),
                    coords: Some(LatLng {
                        lat: clamp_lat(lat + dlat),
                        lng: clamp_lng(lng + dlng),
                    }),
                });
            }
        }
    }

    zones
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> GeoBounds {
        GeoBounds {
            north: 36.9,
            south: 36.6,
            east: -119.6,
            west: -119.95,
            center_lat: 36.75,
            center_lng: -119.77,
        }
    }

    fn config() -> ZoneConfig {
        ZoneConfig::with_bounds(
            ZoneScope::City {
                city: "Fresno".into(),
                state_code: Some("CA".into()),
                country_code: "US".into(),
            },
            bounds(),
            10,
            2_500,
        )
    }

    #[test]
    fn spacing_follows_area() {
        assert_eq!(grid_spacing_km(10.0), 1.0);
        assert_eq!(grid_spacing_km(30.0), 2.0);
        assert_eq!(grid_spacing_km(199.0), 3.0);
        assert_eq!(grid_spacing_km(999.0), 4.0);
        assert_eq!(grid_spacing_km(5000.0), 5.0);
    }

    #[test]
    fn center_zone_has_no_coords() {
        let zone = config().center_zone();
        assert_eq!(zone.kind, ZoneKind::Center);
        assert!(zone.coords.is_none());
        assert_eq!(zone.city_name.as_deref(), Some("Fresno"));
    }

    #[test]
    fn batch_indices_stay_in_window() {
        let cfg = config();
        let batch = generate_zone_batch(&cfg, 1);
        let primaries: Vec<_> = batch.iter().filter(|z| z.kind == ZoneKind::Grid).collect();
        assert!(primaries.len() <= cfg.batch_size);
        for zone in &primaries {
            let index: usize = zone
                .label
                .rsplit("zone-")
                .next()
                .and_then(|s| s.parse().ok())
                .expect("zone label carries index");
            assert!(index >= cfg.batch_size && index < cfg.batch_size * 2);
        }
    }

    #[test]
    fn grid_points_lie_within_bounds() {
        let cfg = config();
        let b = bounds();
        for batch_number in 0..cfg.total_batches() {
            for zone in generate_zone_batch(&cfg, batch_number) {
                let coords = zone.coords.expect("grid zone has coords");
                assert!(coords.lat >= b.south && coords.lat <= b.north, "{zone:?}");
                assert!(coords.lng >= b.west && coords.lng <= b.east, "{zone:?}");
            }
        }
    }

    #[test]
    fn batch_past_planned_is_empty() {
        let cfg = config();
        assert!(generate_zone_batch(&cfg, cfg.total_batches() + 1).is_empty());
    }

    #[test]
    fn center_only_generates_no_grid() {
        let cfg = ZoneConfig::center_only(
            ZoneScope::Country {
                country_code: "US".into(),
            },
            50,
            2_500,
        );
        assert_eq!(cfg.total_batches(), 0);
        assert!(generate_zone_batch(&cfg, 0).is_empty());
    }

    #[test]
    fn fine_spacing_emits_overlaps() {
        // Small area forces 1 km spacing, which is under the overlap cutoff.
        let small = GeoBounds {
            north: 36.76,
            south: 36.72,
            east: -119.75,
            west: -119.80,
            center_lat: 36.74,
            center_lng: -119.775,
        };
        let cfg = ZoneConfig::with_bounds(
            ZoneScope::City {
                city: "Clovis".into(),
                state_code: Some("CA".into()),
                country_code: "US".into(),
            },
            small,
            5,
            2_500,
        );
        let batch = generate_zone_batch(&cfg, 0);
        let overlaps = batch
            .iter()
            .filter(|z| z.kind == ZoneKind::GridOverlap)
            .count();
        let primaries = batch.iter().filter(|z| z.kind == ZoneKind::Grid).count();
        assert_eq!(overlaps, primaries * 4);
    }
}
