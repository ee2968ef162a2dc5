//! Bounding-box resolution for deep zone generation.
//!
//! The resolver is an external collaborator; a failure here is never fatal,
//! the zone generator just falls back to a center-only scrape.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::geo::zones::GeoBounds;

/// What to geocode. `city` takes precedence, then `state`, then the country
/// itself.
#[derive(Debug, Clone)]
pub struct BoundsQuery {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: String,
}

impl BoundsQuery {
    /// Free-text form handed to the geocoder.
    #[must_use]
    pub fn to_query_string(&self) -> String {
        let mut parts = Vec::new();
        if let Some(city) = &self.city {
            parts.push(city.clone());
        }
        if let Some(state) = &self.state {
            parts.push(state.clone());
        }
        parts.push(self.country.clone());
        parts.join(", ")
    }
}

/// Resolves an administrative area to a bounding box.
#[async_trait]
pub trait BoundsResolver: Send + Sync {
    async fn resolve(&self, query: &BoundsQuery) -> Result<GeoBounds>;
}

/// One hit from a Nominatim-style geocoding endpoint.
#[derive(Debug, Deserialize)]
struct GeocodeHit {
    /// `[south, north, west, east]` as strings.
    boundingbox: [String; 4],
    lat: String,
    lon: String,
}

/// Geocoding resolver over an HTTP search endpoint.
pub struct HttpBoundsResolver {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpBoundsResolver {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(crate::browser::ENGINE_USER_AGENT)
            .build()
            .context("building geocoder HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl BoundsResolver for HttpBoundsResolver {
    async fn resolve(&self, query: &BoundsQuery) -> Result<GeoBounds> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[
                ("q", query.to_query_string().as_str()),
                ("format", "json"),
                ("limit", "1"),
            ])
            .send()
            .await
            .context("geocoding request")?
            .error_for_status()
            .context("geocoding status")?;

        let hits: Vec<GeocodeHit> = response.json().await.context("geocoding payload")?;
        let hit = hits
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("no geocoding hit for {:?}", query.to_query_string()))?;

        let parse = |raw: &str, what: &str| -> Result<f64> {
            raw.parse()
                .map_err(|_| anyhow!("unparseable {what} in geocoding hit: {raw:?}"))
        };

        let south = parse(&hit.boundingbox[0], "south")?;
        let north = parse(&hit.boundingbox[1], "north")?;
        let west = parse(&hit.boundingbox[2], "west")?;
        let east = parse(&hit.boundingbox[3], "east")?;

        Ok(GeoBounds {
            north,
            south,
            east,
            west,
            center_lat: parse(&hit.lat, "lat")?,
            center_lng: parse(&hit.lon, "lon")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_string_joins_known_parts() {
        let query = BoundsQuery {
            city: Some("Fresno".into()),
            state: Some("CA".into()),
            country: "US".into(),
        };
        assert_eq!(query.to_query_string(), "Fresno, CA, US");

        let query = BoundsQuery {
            city: None,
            state: None,
            country: "US".into(),
        };
        assert_eq!(query.to_query_string(), "US");
    }

    #[tokio::test]
    async fn resolves_from_mock_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let body = r#"[{"boundingbox":["36.6","36.9","-119.95","-119.6"],"lat":"36.75","lon":"-119.77"}]"#;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let resolver = HttpBoundsResolver::new(server.url()).expect("resolver");
        let bounds = resolver
            .resolve(&BoundsQuery {
                city: Some("Fresno".into()),
                state: Some("CA".into()),
                country: "US".into(),
            })
            .await
            .expect("bounds");

        assert_eq!(bounds.south, 36.6);
        assert_eq!(bounds.north, 36.9);
        assert_eq!(bounds.center_lng, -119.77);
        mock.assert_async().await;
    }
}
