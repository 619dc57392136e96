//! PostgreSQL gateway for table `dispatch`

mod schema;
mod types;

pub use types::SqlParam;

use chrono::NaiveDateTime;
use sqlx::postgres::{PgConnectOptions, PgRow};
use sqlx::{Connection, FromRow, PgConnection, Postgres, QueryBuilder, Row};
use tracing::{debug, info, warn};

use crate::{config::DatabaseConfig, errors::DispatchError, loader::RowSink, models::DispatchRow};

/// Owns the single database connection used by a run
///
/// The connection is released by [`Database::close`], or when the gateway is
/// dropped on any other exit path.
pub struct Database {
    connection: Option<PgConnection>,
}

impl Database {
    /// Open one connection with the configured credentials
    pub async fn open(config: &DatabaseConfig) -> Result<Self, DispatchError> {
        info!(
            "Connecting to database {} at {}:{} as {}",
            config.name, config.host, config.port, config.username
        );

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.name)
            .username(&config.username)
            .password(&config.password);

        let connection =
            tokio::time::timeout(config.connect_timeout, PgConnection::connect_with(&options))
                .await
                .map_err(|_| DispatchError::ConnectionTimeout(config.connect_timeout))?
                .map_err(DispatchError::ConnectionError)?;

        Ok(Self {
            connection: Some(connection),
        })
    }

    /// Open a connection from a `postgres://` URL
    pub async fn from_url(url: &str) -> Result<Self, DispatchError> {
        let connection = PgConnection::connect(url)
            .await
            .map_err(DispatchError::ConnectionError)?;

        Ok(Self {
            connection: Some(connection),
        })
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    fn connection(&mut self) -> Result<&mut PgConnection, DispatchError> {
        self.connection.as_mut().ok_or(DispatchError::NotConnected)
    }

    /// Close the connection. Closing twice, or closing a gateway whose
    /// connection was never opened, does nothing.
    pub async fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            match connection.close().await {
                Ok(()) => debug!("Database connection closed"),
                Err(e) => warn!("Error while closing database connection: {}", e),
            }
        }
    }

    /// Run `statements` in order inside one transaction
    pub async fn execute_many(&mut self, statements: &[&str]) -> Result<(), DispatchError> {
        let connection = self.connection()?;
        let mut tx = connection.begin().await?;
        for statement in statements {
            sqlx::raw_sql(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Parameterized read returning every matching row
    pub async fn query(
        &mut self,
        statement: &str,
        params: &[SqlParam],
    ) -> Result<Vec<PgRow>, DispatchError> {
        let connection = self.connection()?;
        let mut query = sqlx::query(statement);
        for param in params {
            query = param.bind(query);
        }
        Ok(query.fetch_all(&mut *connection).await?)
    }

    /// Drop and recreate table `dispatch`.
    ///
    /// Destructive: every stored row is lost. Meant for fresh or development
    /// databases, never as part of a regular load.
    pub async fn ensure_schema(&mut self) -> Result<(), DispatchError> {
        warn!("Dropping and recreating table dispatch");
        self.execute_many(&[schema::DROP_DISPATCH, schema::CREATE_DISPATCH])
            .await
    }

    /// Create secondary indexes for analytic queries, if missing
    pub async fn ensure_indexes(&mut self) -> Result<(), DispatchError> {
        self.execute_many(schema::CREATE_INDEXES).await
    }

    /// Enable or drop the geospatial extension
    pub async fn ensure_extensions(&mut self, enable: bool) -> Result<(), DispatchError> {
        if enable {
            info!("Enabling geospatial extensions");
            self.execute_many(schema::ENABLE_EXTENSIONS).await
        } else {
            info!("Dropping geospatial extensions");
            self.execute_many(schema::DISABLE_EXTENSIONS).await
        }
    }

    pub async fn row_count(&mut self) -> Result<i64, DispatchError> {
        let rows = self.query("SELECT COUNT(*) FROM dispatch", &[]).await?;
        match rows.first() {
            Some(row) => Ok(row.try_get(0)?),
            None => Ok(0),
        }
    }

    /// Most recent dispatch timestamp stored, if any
    pub async fn latest_dispatch_time(&mut self) -> Result<Option<NaiveDateTime>, DispatchError> {
        let rows = self
            .query("SELECT max(dispatch_date_time) FROM dispatch", &[])
            .await?;
        match rows.first() {
            Some(row) => Ok(row.try_get(0)?),
            None => Ok(None),
        }
    }

    pub async fn find_event(
        &mut self,
        event_number: &str,
    ) -> Result<Option<DispatchRow>, DispatchError> {
        let statement = format!("{} WHERE event_number = $1", schema::SELECT_DISPATCH);
        let rows = self.query(&statement, &[event_number.into()]).await?;
        match rows.first() {
            Some(row) => Ok(Some(DispatchRow::from_row(row)?)),
            None => Ok(None),
        }
    }
}

impl RowSink for Database {
    /// Multi-row insert of `rows`, committed as one transaction.
    ///
    /// Rows whose `event_number` is already stored are skipped.
    async fn insert_batch(&mut self, rows: &[DispatchRow]) -> Result<u64, DispatchError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let storage_error = |source: sqlx::Error| DispatchError::StorageWriteError {
            rows: rows.len(),
            source,
        };

        let mut builder = QueryBuilder::<Postgres>::new(schema::INSERT_DISPATCH);
        builder.push_values(rows, |mut values, row| {
            values
                .push_bind(row.id)
                .push_bind(row.event_number.clone())
                .push_bind(row.street_num)
                .push_bind(row.street_name.clone())
                .push_bind(row.full_address.clone())
                .push_bind(row.city.clone())
                .push_bind(row.reporting_district.clone())
                .push_bind(row.dispatch_date_time)
                .push_bind(row.dispatch_date)
                .push_bind(row.dispatch_time)
                .push_bind(row.incident_type.clone())
                .push_bind(row.lat)
                .push_bind(row.lon);
        });
        builder.push(schema::ON_CONFLICT_IGNORE);

        let connection = self.connection()?;
        let mut tx = connection.begin().await.map_err(storage_error)?;
        let result = builder
            .build()
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;
        tx.commit().await.map_err(storage_error)?;

        Ok(result.rows_affected())
    }
}
