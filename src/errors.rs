//! Errors for the dispatch loader
use thiserror::Error;

use crate::pipeline::PipelineState;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] config::ConfigError),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("Database connection failed: {0}")]
    ConnectionError(#[source] sqlx::Error),

    #[error("Database connection timed out after {0:?}")]
    ConnectionTimeout(std::time::Duration),

    #[error("Database connection is not open")]
    NotConnected,

    #[error("Open-data API request to {url} failed: {source}")]
    ApiFetchError {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Open-data API reported an unsuccessful response")]
    ApiUnsuccessful,

    #[error("Malformed record {record}: field {field} {reason}")]
    MalformedRecord {
        record: String,
        field: &'static str,
        reason: String,
    },

    #[error("Geocoding request for {address:?} failed: {source}")]
    GeocodeServiceError {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Batch insert of {rows} rows failed: {source}")]
    StorageWriteError {
        rows: usize,
        #[source]
        source: sqlx::Error,
    },

    #[error("Database error")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Invalid pipeline transition from {from:?} to {to:?}")]
    InvalidState {
        from: PipelineState,
        to: PipelineState,
    },
}

impl DispatchError {
    /// Process exit status for a run that ended with this error.
    pub fn exit_status(&self) -> u8 {
        match self {
            DispatchError::ConfigError(_) | DispatchError::InvalidConfig { .. } => 2,
            DispatchError::ConnectionError(_)
            | DispatchError::ConnectionTimeout(_)
            | DispatchError::NotConnected => 3,
            DispatchError::ApiFetchError { .. } | DispatchError::ApiUnsuccessful => 4,
            DispatchError::StorageWriteError { .. } | DispatchError::DatabaseError(_) => 5,
            DispatchError::GeocodeServiceError { .. } => 6,
            DispatchError::MalformedRecord { .. } | DispatchError::InvalidState { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_by_kind() {
        let config = DispatchError::InvalidConfig {
            message: "empty host".to_string(),
        };
        assert_eq!(config.exit_status(), 2);
        assert_eq!(DispatchError::NotConnected.exit_status(), 3);
        assert_eq!(DispatchError::ApiUnsuccessful.exit_status(), 4);
        let storage = DispatchError::StorageWriteError {
            rows: 3,
            source: sqlx::Error::PoolClosed,
        };
        assert_eq!(storage.exit_status(), 5);
    }

    #[test]
    fn test_malformed_record_message() {
        let err = DispatchError::MalformedRecord {
            record: "_id=7".to_string(),
            field: "Event_Number",
            reason: "is missing".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed record _id=7: field Event_Number is missing"
        );
        assert_eq!(err.exit_status(), 1);
    }
}
