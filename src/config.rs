//! Application configuration

use std::fmt;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use reqwest::Url;
use serde::Deserialize;
use serde_with::serde_as;

use crate::errors::DispatchError;
use crate::http::RetryPolicy;
use crate::loader::DEFAULT_BATCH_SIZE;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "dispatch.toml";

/// Largest batch whose bind parameters fit in a single PostgreSQL statement
pub const MAX_BATCH_SIZE: usize = 5000;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub geocoder: GeocoderConfig,
    pub loader: LoaderConfig,
}

#[serde_as]
#[derive(Deserialize, Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub username: String,
    pub password: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "connect_timeout_secs")]
    pub connect_timeout: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    pub url: String,
    pub resource_id: String,
    pub limit: u32,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs")]
    pub timeout: Duration,
    pub retries: u32,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(rename = "retry_backoff_ms")]
    pub retry_backoff: Duration,
}

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct GeocoderConfig {
    pub url: String,
    pub benchmark: String,
    /// State appended to every one-line address
    pub state: String,
    #[serde_as(as = "serde_with::DurationSeconds<u64>")]
    #[serde(rename = "timeout_secs")]
    pub timeout: Duration,
    pub retries: u32,
    #[serde_as(as = "serde_with::DurationMilliSeconds<u64>")]
    #[serde(rename = "retry_backoff_ms")]
    pub retry_backoff: Duration,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub on_geocode_error: GeocodeFailurePolicy,
}

/// What to do with a record whose geocoding request failed
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeFailurePolicy {
    /// Keep the record, with null coordinates
    #[default]
    StoreWithoutCoordinates,
    /// Drop the record and continue with the next one
    SkipRecord,
    /// Fail the whole run
    Abort,
}

impl AppConfig {
    /// Load configuration from `path`, overridden by `DISPATCH__*` environment variables.
    ///
    /// The file is required: a missing or malformed file is an error, and so is
    /// any value rejected by [`AppConfig::validate`].
    pub fn load(path: &Path) -> Result<Self, DispatchError> {
        let config = Config::builder()
            .set_default("database.port", 5432)?
            .set_default("database.connect_timeout_secs", 10)?
            .set_default(
                "api.url",
                "https://data.illinois.gov/api/3/action/datastore_search",
            )?
            .set_default("api.resource_id", "5f783951-5f80-4fdd-8b5c-7c434933d7e3")?
            .set_default("api.limit", 1000)?
            .set_default("api.timeout_secs", 30)?
            .set_default("api.retries", 2)?
            .set_default("api.retry_backoff_ms", 500)?
            .set_default(
                "geocoder.url",
                "https://geocoding.geo.census.gov/geocoder/locations/onelineaddress",
            )?
            .set_default("geocoder.benchmark", "9")?
            .set_default("geocoder.state", "IL")?
            .set_default("geocoder.timeout_secs", 30)?
            .set_default("geocoder.retries", 2)?
            .set_default("geocoder.retry_backoff_ms", 500)?
            .set_default("loader.batch_size", DEFAULT_BATCH_SIZE as i64)?
            .set_default("loader.on_geocode_error", "store_without_coordinates")?
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("DISPATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration parameters
    pub fn validate(&self) -> Result<(), DispatchError> {
        self.database.validate()?;
        self.api.validate()?;
        self.geocoder.validate()?;
        self.loader.validate()?;
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> DispatchError {
    DispatchError::InvalidConfig {
        message: message.into(),
    }
}

fn validate_url(field: &str, url: &str) -> Result<(), DispatchError> {
    Url::parse(url).map_err(|e| invalid(format!("{field} is not a valid URL: {e}")))?;
    Ok(())
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.host.trim().is_empty() {
            return Err(invalid("database.host cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("database.name cannot be empty"));
        }
        if self.username.trim().is_empty() {
            return Err(invalid("database.username cannot be empty"));
        }
        if self.port == 0 {
            return Err(invalid("database.port must be greater than zero"));
        }
        if self.connect_timeout.is_zero() {
            return Err(invalid(
                "database.connect_timeout_secs must be greater than zero",
            ));
        }
        Ok(())
    }
}

// Keeps the password out of logs
impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        validate_url("api.url", &self.url)?;
        if self.resource_id.trim().is_empty() {
            return Err(invalid("api.resource_id cannot be empty"));
        }
        if self.limit == 0 {
            return Err(invalid("api.limit must be greater than zero"));
        }
        if self.timeout.is_zero() {
            return Err(invalid("api.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_backoff)
    }
}

impl GeocoderConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        validate_url("geocoder.url", &self.url)?;
        if self.timeout.is_zero() {
            return Err(invalid("geocoder.timeout_secs must be greater than zero"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, self.retry_backoff)
    }
}

impl LoaderConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(invalid(format!(
                "loader.batch_size must be between 1 and {MAX_BATCH_SIZE}"
            )));
        }
        Ok(())
    }
}
