//! Address geocoding.
//!
//! [`Geocoder`] is the seam to the external address-lookup service; the
//! Mapbox places adapter only owns transport details. Manual addresses are
//! resolved one at a time and failures never leave [`geocode_addresses`].

use std::time::Duration;

use async_trait::async_trait;
use geo::Point;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GeocoderConfig;
use crate::types::{GeocodedAddress, ManualAddress};

#[derive(Debug, Error)]
pub enum GeocodeError {
    #[error("geocoding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("geocoder answered HTTP {0}")]
    Status(StatusCode),
    #[error("invalid geocoder payload: {0}")]
    Decode(String),
    #[error("invalid geocoder endpoint: {0}")]
    Endpoint(String),
}

#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best match for a free-text query. `Ok(None)` means the service had no match.
    async fn locate(&self, query: &str) -> Result<Option<Point<f64>>, GeocodeError>;
}

/// Mapbox places v5 adapter, biased to one city.
pub struct MapboxGeocoder {
    client: Client,
    endpoint: Url,
    access_token: String,
    city_suffix: String,
    country: String,
    proximity: [f64; 2],
}

impl MapboxGeocoder {
    pub fn new(config: &GeocoderConfig, access_token: String) -> Result<Self, GeocodeError> {
        let endpoint = Url::parse(&config.endpoint).map_err(|e| GeocodeError::Endpoint(e.to_string()))?;
        if endpoint.cannot_be_a_base() {
            return Err(GeocodeError::Endpoint(config.endpoint.clone()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            access_token,
            city_suffix: config.city_suffix.clone(),
            country: config.country.clone(),
            proximity: config.proximity,
        })
    }

    /// Reads the token from the configured environment variable. Without a
    /// token there is no geocoding, which only costs the manual pins.
    pub fn from_env(config: &GeocoderConfig) -> Option<Self> {
        let token = match std::env::var(&config.access_token_env) {
            Ok(token) if !token.trim().is_empty() => token,
            _ => {
                warn!(var = %config.access_token_env, "no geocoder access token; manual addresses will not be placed");
                return None;
            }
        };
        match Self::new(config, token) {
            Ok(geocoder) => Some(geocoder),
            Err(e) => {
                warn!(error = %e, "geocoder unavailable");
                None
            }
        }
    }

    fn request_url(&self, query: &str) -> Result<Url, GeocodeError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| GeocodeError::Endpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(&format!("{query}{}.json", self.city_suffix));
        url.query_pairs_mut()
            .append_pair("access_token", &self.access_token)
            .append_pair("limit", "1")
            .append_pair("country", &self.country)
            .append_pair("proximity", &format!("{},{}", self.proximity[0], self.proximity[1]));
        Ok(url)
    }
}

#[async_trait]
impl Geocoder for MapboxGeocoder {
    async fn locate(&self, query: &str) -> Result<Option<Point<f64>>, GeocodeError> {
        let response = self.client.get(self.request_url(query)?).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(GeocodeError::Status(status));
        }
        let body = response.bytes().await?;
        parse_best_match(body.as_ref())
    }
}

#[derive(Debug, Deserialize)]
struct PlacesResponseDto {
    #[serde(default)]
    features: Vec<PlaceDto>,
}

#[derive(Debug, Deserialize)]
struct PlaceDto {
    center: Option<Vec<f64>>,
}

/// First feature's `center`, if any.
pub fn parse_best_match(body: &[u8]) -> Result<Option<Point<f64>>, GeocodeError> {
    let decoded: PlacesResponseDto =
        serde_json::from_slice(body).map_err(|e| GeocodeError::Decode(e.to_string()))?;
    let Some(place) = decoded.features.into_iter().next() else {
        return Ok(None);
    };
    match place.center.as_deref() {
        Some([lon, lat]) if lon.is_finite() && lat.is_finite() => Ok(Some(Point::new(*lon, *lat))),
        Some(other) => Err(GeocodeError::Decode(format!("center must be [lon, lat], got {other:?}"))),
        None => Ok(None),
    }
}

/// Resolves addresses strictly one after another. Misses and errors drop the
/// address with a log line.
pub async fn geocode_addresses(geocoder: &dyn Geocoder, addresses: &[ManualAddress]) -> Vec<GeocodedAddress> {
    let mut out = Vec::with_capacity(addresses.len());
    for entry in addresses {
        match geocoder.locate(&entry.address).await {
            Ok(Some(location)) => {
                debug!(address = %entry.address, lon = location.x(), lat = location.y(), "geocoded");
                out.push(GeocodedAddress {
                    entry: entry.clone(),
                    location,
                });
            }
            Ok(None) => warn!(address = %entry.address, "no geocoding match; address dropped"),
            Err(e) => warn!(address = %entry.address, error = %e, "geocoding failed; address dropped"),
        }
    }
    info!("Geocoded {} of {} manual addresses", out.len(), addresses.len());
    out
}
