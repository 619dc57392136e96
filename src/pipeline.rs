//! Load pipeline: fetch, normalize, geocode, batch insert

use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, DatabaseConfig, GeocodeFailurePolicy, LoaderConfig};
use crate::database::Database;
use crate::errors::DispatchError;
use crate::geocoder::GeocoderClient;
use crate::loader::{BatchLoader, RowSink};
use crate::models::{DispatchRow, RawRecord};
use crate::normalize::normalize;
use crate::open_data::OpenDataClient;

/// Run states
///
/// `Idle -> Connected -> Loading -> Draining -> Done`, and `Failed` from any
/// state that is not yet terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connected,
    Loading,
    Draining,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }

    fn can_become(self, next: PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Idle, Connected) | (Connected, Loading) | (Loading, Draining) | (Draining, Done) => {
                true
            }
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Outcome counters for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub fetched: u64,
    pub normalized: u64,
    pub malformed: u64,
    pub geocoded: u64,
    pub unmatched: u64,
    pub geocode_failures: u64,
    /// Records dropped because their geocoding request failed
    pub skipped: u64,
    pub inserted: u64,
    pub duplicates: u64,
    pub flushes: u64,
}

pub struct PipelineDriver {
    source: OpenDataClient,
    geocoder: GeocoderClient,
    batch_size: usize,
    geocode_policy: GeocodeFailurePolicy,
    reset_schema: bool,
    state: PipelineState,
}

impl PipelineDriver {
    pub fn new(config: &AppConfig) -> Result<Self, DispatchError> {
        Ok(Self::from_parts(
            OpenDataClient::new(&config.api)?,
            GeocoderClient::new(&config.geocoder)?,
            &config.loader,
        ))
    }

    pub fn from_parts(
        source: OpenDataClient,
        geocoder: GeocoderClient,
        loader: &LoaderConfig,
    ) -> Self {
        Self {
            source,
            geocoder,
            batch_size: loader.batch_size,
            geocode_policy: loader.on_geocode_error,
            reset_schema: false,
            state: PipelineState::Idle,
        }
    }

    /// Recreate the table before loading. Destroys existing rows.
    pub fn reset_schema(mut self, reset: bool) -> Self {
        self.reset_schema = reset;
        self
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, next: PipelineState) -> Result<(), DispatchError> {
        if !self.state.can_become(next) {
            return Err(DispatchError::InvalidState {
                from: self.state,
                to: next,
            });
        }
        info!("Pipeline {:?} -> {:?}", self.state, next);
        self.state = next;
        Ok(())
    }

    fn fail(&mut self, e: &DispatchError) {
        if !self.state.is_terminal() {
            error!("Pipeline failed in state {:?}: {}", self.state, e);
            self.state = PipelineState::Failed;
        }
    }

    /// Complete run against the configured database.
    ///
    /// The connection is closed on every path once it has been opened.
    pub async fn run(&mut self, config: &DatabaseConfig) -> Result<LoadReport, DispatchError> {
        let mut database = match Database::open(config).await {
            Ok(database) => database,
            Err(e) => {
                self.fail(&e);
                return Err(e);
            }
        };

        let result = self.run_connected(&mut database).await;
        database.close().await;

        match result {
            Ok(report) => {
                self.transition(PipelineState::Done)?;
                info!(?report, "Load complete");
                Ok(report)
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_connected(
        &mut self,
        database: &mut Database,
    ) -> Result<LoadReport, DispatchError> {
        self.transition(PipelineState::Connected)?;
        if self.reset_schema {
            database.ensure_schema().await?;
            database.ensure_indexes().await?;
        }
        self.load(database).await
    }

    /// Fetch one page and load it into `sink`, ending in `Draining`.
    ///
    /// A sink handed over while `Idle` counts as an open connection.
    /// Malformed records are skipped; geocoding failures follow the
    /// configured [`GeocodeFailurePolicy`].
    pub async fn load<S: RowSink>(&mut self, sink: &mut S) -> Result<LoadReport, DispatchError> {
        if self.state == PipelineState::Idle {
            self.transition(PipelineState::Connected)?;
        }
        let result = self.load_page(sink).await;
        if let Err(e) = &result {
            self.fail(e);
        }
        result
    }

    async fn load_page<S: RowSink>(&mut self, sink: &mut S) -> Result<LoadReport, DispatchError> {
        self.transition(PipelineState::Loading)?;

        let records = self.source.fetch_page().await?;
        let mut report = LoadReport {
            fetched: records.len() as u64,
            ..Default::default()
        };

        let mut loader = BatchLoader::new(sink, self.batch_size);
        for raw in &records {
            if let Some(row) = self.process(raw, &mut report).await? {
                loader.add(row).await?;
            }
        }

        self.transition(PipelineState::Draining)?;
        loader.flush().await?;

        let stats = loader.stats();
        report.inserted = stats.inserted;
        report.duplicates = stats.duplicates;
        report.flushes = stats.flushes;
        Ok(report)
    }

    /// Normalize and geocode one record. `Ok(None)` means the record was skipped.
    async fn process(
        &self,
        raw: &RawRecord,
        report: &mut LoadReport,
    ) -> Result<Option<DispatchRow>, DispatchError> {
        let record = match normalize(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(record = %raw.identifier(), "Skipping malformed record: {}", e);
                report.malformed += 1;
                return Ok(None);
            }
        };
        report.normalized += 1;

        let coordinates = match self
            .geocoder
            .geocode(&record.geocode_address, &record.city)
            .await
        {
            Ok(Some(coordinates)) => {
                report.geocoded += 1;
                Some(coordinates)
            }
            Ok(None) => {
                debug!(event_number = %record.event_number, "No geocoder match");
                report.unmatched += 1;
                None
            }
            Err(e) => {
                report.geocode_failures += 1;
                match self.geocode_policy {
                    GeocodeFailurePolicy::StoreWithoutCoordinates => {
                        warn!(
                            event_number = %record.event_number,
                            "Storing without coordinates: {}",
                            e
                        );
                        None
                    }
                    GeocodeFailurePolicy::SkipRecord => {
                        warn!(event_number = %record.event_number, "Skipping record: {}", e);
                        report.skipped += 1;
                        return Ok(None);
                    }
                    GeocodeFailurePolicy::Abort => return Err(e),
                }
            }
        };

        Ok(Some(record.with_coordinates(coordinates)))
    }
}
