//! Census geocoder client

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::debug;

use crate::config::GeocoderConfig;
use crate::errors::DispatchError;
use crate::http::{self, RetryPolicy};
use crate::models::Coordinates;

/// Client for the one-line-address geocoding endpoint
#[derive(Debug, Clone)]
pub struct GeocoderClient {
    http: Client,
    base_url: String,
    benchmark: String,
    state: String,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    result: GeocodeResult,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    #[serde(rename = "addressMatches")]
    address_matches: Vec<AddressMatch>,
}

#[derive(Debug, Deserialize)]
struct AddressMatch {
    coordinates: MatchCoordinates,
}

/// The service reports longitude as `x` and latitude as `y`
#[derive(Debug, Deserialize)]
struct MatchCoordinates {
    x: f64,
    y: f64,
}

impl From<MatchCoordinates> for Coordinates {
    fn from(value: MatchCoordinates) -> Self {
        Coordinates {
            lat: value.y,
            lon: value.x,
        }
    }
}

impl GeocoderClient {
    pub fn new(config: &GeocoderConfig) -> Result<Self, DispatchError> {
        let http = http::build_client(config.timeout).map_err(|e| DispatchError::InvalidConfig {
            message: format!("cannot build geocoder HTTP client: {e}"),
        })?;

        Ok(Self {
            http,
            base_url: config.url.clone(),
            benchmark: config.benchmark.clone(),
            state: config.state.clone(),
            retry: config.retry_policy(),
        })
    }

    /// One-line address sent to the service
    pub fn query_address(&self, address: &str, city: &str) -> String {
        format!("{}, {} {}", address, city, self.state)
    }

    /// Look up `address` in `city`.
    ///
    /// Returns `Ok(None)` when the service has no match for the address, which
    /// is common for intersections, and without a request when `address` is
    /// blank. Transport failures, error statuses and undecodable bodies are
    /// reported as [`DispatchError::GeocodeServiceError`].
    pub async fn geocode(
        &self,
        address: &str,
        city: &str,
    ) -> Result<Option<Coordinates>, DispatchError> {
        if address.trim().is_empty() {
            debug!(city, "Blank address, not geocoding");
            return Ok(None);
        }

        let query = self.query_address(address, city);
        let url = self.request_url(&query)?;

        let response: GeocodeResponse = http::get_json(&self.http, url, self.retry)
            .await
            .map_err(|source| DispatchError::GeocodeServiceError {
                address: query.clone(),
                source,
            })?;

        let coordinates = response
            .result
            .address_matches
            .into_iter()
            .next()
            .map(|m| Coordinates::from(m.coordinates));

        debug!(address = %query, ?coordinates, "Geocoded address");
        Ok(coordinates)
    }

    /// The address is spliced into the query string as-is so that an already
    /// encoded `%26` survives; spaces are encoded by the URL parser.
    fn request_url(&self, query: &str) -> Result<Url, DispatchError> {
        let raw = format!(
            "{}?address={}&benchmark={}&format=json",
            self.base_url,
            escape_query_value(query),
            escape_query_value(&self.benchmark)
        );
        Url::parse(&raw).map_err(|e| DispatchError::InvalidConfig {
            message: format!("geocoder URL {raw:?} is invalid: {e}"),
        })
    }
}

/// Percent-encode the characters that would otherwise split or end a query value
fn escape_query_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("%26"),
            '#' => escaped.push_str("%23"),
            '+' => escaped.push_str("%2B"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> GeocoderClient {
        GeocoderClient::new(&GeocoderConfig {
            url: format!("{}/geocoder/locations/onelineaddress", server.uri()),
            benchmark: "9".to_string(),
            state: "IL".to_string(),
            timeout: Duration::from_secs(5),
            retries: 0,
            retry_backoff: Duration::ZERO,
        })
        .unwrap()
    }

    fn matches(coords: &[(f64, f64)]) -> serde_json::Value {
        let matches: Vec<_> = coords
            .iter()
            .map(|(x, y)| json!({"matchedAddress": "x", "coordinates": {"x": x, "y": y}}))
            .collect();
        json!({"result": {"input": {}, "addressMatches": matches}})
    }

    #[test]
    fn test_escape_query_value() {
        assert_eq!(escape_query_value("MAIN ST %26 3RD ST"), "MAIN ST %26 3RD ST");
        assert_eq!(escape_query_value("MAIN ST & 3RD ST"), "MAIN ST %26 3RD ST");
        assert_eq!(escape_query_value("UNIT #4+"), "UNIT %234%2B");
    }

    #[tokio::test]
    async fn test_first_match_wins_with_swapped_axes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/geocoder/locations/onelineaddress"))
            .and(query_param("address", "1200 N MAIN ST, ROCKFORD IL"))
            .and(query_param("benchmark", "9"))
            .and(query_param("format", "json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(matches(&[(-89.094, 42.281), (-89.5, 42.5)])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let coords = client(&server)
            .geocode("1200 N MAIN ST", "ROCKFORD")
            .await
            .unwrap();

        assert_eq!(
            coords,
            Some(Coordinates {
                lat: 42.281,
                lon: -89.094
            })
        );
    }

    #[tokio::test]
    async fn test_encoded_ampersand_reaches_service() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("address", "MAIN ST & 3RD ST, ROCKFORD IL"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(&[(-89.1, 42.2)])))
            .expect(1)
            .mount(&server)
            .await;

        let coords = client(&server)
            .geocode("MAIN ST %26 3RD ST", "ROCKFORD")
            .await
            .unwrap();

        assert!(coords.is_some());
    }

    #[tokio::test]
    async fn test_blank_address_is_not_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(&[(-89.1, 42.2)])))
            .expect(0)
            .mount(&server)
            .await;

        let client = client(&server);
        assert_eq!(client.geocode("", "ROCKFORD").await.unwrap(), None);
        assert_eq!(client.geocode("   ", "ROCKFORD").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_no_match_is_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(matches(&[])))
            .mount(&server)
            .await;

        let coords = client(&server).geocode("NOWHERE", "ROCKFORD").await.unwrap();
        assert_eq!(coords, None);
    }

    #[tokio::test]
    async fn test_service_failure_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = client(&server)
            .geocode("1200 N MAIN ST", "ROCKFORD")
            .await
            .unwrap_err();

        match err {
            DispatchError::GeocodeServiceError { address, .. } => {
                assert_eq!(address, "1200 N MAIN ST, ROCKFORD IL");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_response_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>busy</html>"))
            .mount(&server)
            .await;

        let result = client(&server).geocode("1200 N MAIN ST", "ROCKFORD").await;
        assert!(matches!(result, Err(DispatchError::GeocodeServiceError { .. })));
    }
}
