//! Open-data (CKAN datastore) client

use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::info;

use crate::config::ApiConfig;
use crate::errors::DispatchError;
use crate::http::{self, RetryPolicy};
use crate::models::RawRecord;

/// Fetches pages of dispatch records from the datastore search endpoint
#[derive(Debug, Clone)]
pub struct OpenDataClient {
    http: Client,
    url: String,
    resource_id: String,
    limit: u32,
    retry: RetryPolicy,
}

/// Response envelope, `{ "success": .., "result": { "records": [..] } }`
#[derive(Debug, Deserialize)]
struct DatastoreResponse {
    #[serde(default = "default_success")]
    success: bool,
    result: DatastoreResult,
}

#[derive(Debug, Deserialize)]
struct DatastoreResult {
    records: Vec<RawRecord>,
}

fn default_success() -> bool {
    true
}

impl OpenDataClient {
    pub fn new(config: &ApiConfig) -> Result<Self, DispatchError> {
        let http = http::build_client(config.timeout).map_err(|e| DispatchError::InvalidConfig {
            message: format!("cannot build open-data HTTP client: {e}"),
        })?;

        Ok(Self {
            http,
            url: config.url.clone(),
            resource_id: config.resource_id.clone(),
            limit: config.limit,
            retry: config.retry_policy(),
        })
    }

    /// Fetch the first page of records.
    ///
    /// The whole page is decoded before anything is returned, so a transport
    /// or decode failure never leaves a partially processed page behind.
    pub async fn fetch_page(&self) -> Result<Vec<RawRecord>, DispatchError> {
        let limit = self.limit.to_string();
        let url = Url::parse_with_params(
            &self.url,
            &[
                ("resource_id", self.resource_id.as_str()),
                ("limit", limit.as_str()),
            ],
        )
        .map_err(|e| DispatchError::InvalidConfig {
            message: format!("open-data URL {:?} is invalid: {e}", self.url),
        })?;

        let response: DatastoreResponse = http::get_json(&self.http, url.clone(), self.retry)
            .await
            .map_err(|source| DispatchError::ApiFetchError {
                url: url.to_string(),
                source,
            })?;

        if !response.success {
            return Err(DispatchError::ApiUnsuccessful);
        }

        info!("Fetched {} records from open-data API", response.result.records.len());
        Ok(response.result.records)
    }
}
