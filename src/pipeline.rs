use std::path::PathBuf;

use duckdb::Connection;

use crate::aggregate::{self, Selection};
use crate::aggregate_store::AggregateStore;
use crate::config::PipelineConfig;
use crate::errors::Result;
use crate::ingest;
use crate::partition::{PartitionKey, PartitionsDefinition};
use crate::store::{self, LoadedPartition};

/// What a step produced, for the caller to record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepReport {
    pub step: &'static str,
    pub partition: Option<String>,
    pub rows: usize,
    pub output: Option<PathBuf>,
}

/// Runs the individual steps against the configured store and files.
///
/// Each step opens its own connection and closes it before returning, so steps can be
/// invoked independently in any process.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Pipeline {
        Pipeline { config }
    }

    pub fn from_env() -> Pipeline {
        Pipeline::new(PipelineConfig::from_env())
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn connect(&self) -> Result<Connection> {
        store::acquire_connection(&self.config.database, &self.config.connect_backoff)
    }

    /// Loads the raw trips of a month into the trips table.
    pub fn taxi_trips(&self, month: &PartitionKey) -> Result<StepReport> {
        let source = self.config.trips_file(month);
        let mut conn = self.connect()?;
        let report = ingest::load_partition(&mut conn, month, &source, &self.config.connect_backoff)?;
        Ok(StepReport {
            step: "taxi_trips",
            partition: Some(report.partition),
            rows: report.rows_inserted,
            output: None,
        })
    }

    /// Replaces the zones table.
    pub fn taxi_zones(&self) -> Result<StepReport> {
        let source = self.config.zones_file();
        let mut conn = self.connect()?;
        let report = ingest::load_zones(&mut conn, &source)?;
        Ok(StepReport {
            step: "taxi_zones",
            partition: None,
            rows: report.rows,
            output: None,
        })
    }

    /// Totals the trips picked up during `week` and records them in the weekly report.
    pub fn trips_by_week(&self, week: &PartitionKey) -> Result<StepReport> {
        let aggregate = {
            let conn = self.connect()?;
            aggregate::aggregate_period(&conn, week, Selection::TimeWindow)?
        };
        let num_trips = aggregate.num_trips;
        let store = AggregateStore::new(&self.config.trips_by_week_file(), self.config.lock_backoff.clone());
        store.upsert(aggregate)?;
        Ok(StepReport {
            step: "trips_by_week",
            partition: Some(week.to_string()),
            rows: num_trips as usize,
            output: Some(store.path().to_owned()),
        })
    }

    /// Trip counts per zone of the configured borough, written as GeoJSON.
    pub fn manhattan_stats(&self) -> Result<StepReport> {
        let aggregates = {
            let conn = self.connect()?;
            match &self.config.borough {
                Some(borough) => aggregate::aggregate_by_zone_in(&conn, borough)?,
                None => aggregate::aggregate_by_zone(&conn)?,
            }
        };
        let output = self.config.zone_stats_file();
        aggregate::write_geojson(&aggregates, &output)?;
        Ok(StepReport {
            step: "manhattan_stats",
            partition: None,
            rows: aggregates.len(),
            output: Some(output),
        })
    }

    pub fn loaded_partitions(&self) -> Result<Vec<LoadedPartition>> {
        let conn = self.connect()?;
        store::loaded_partitions(&conn)
    }

    /// Monthly partitions whose raw file has not been fetched yet.
    pub fn missing_raw_files(&self, months: &PartitionsDefinition) -> Vec<PartitionKey> {
        months
            .keys()
            .into_iter()
            .filter(|month| !self.config.trips_file(month).is_file())
            .collect()
    }

    /// Monthly partitions that have been fetched but are not in the trips table.
    pub fn pending_partitions(&self, months: &PartitionsDefinition) -> Result<Vec<PartitionKey>> {
        let loaded = self.loaded_partitions()?;
        Ok(months
            .keys()
            .into_iter()
            .filter(|month| self.config.trips_file(month).is_file())
            .filter(|month| {
                let key = month.to_string();
                !loaded.iter().any(|p| p.key == key)
            })
            .collect())
    }

    /// Loads every pending month, then refreshes the weekly totals of `weeks`.
    pub fn backfill(
        &self,
        months: &PartitionsDefinition,
        weeks: &PartitionsDefinition,
    ) -> Result<Vec<StepReport>> {
        let mut reports = Vec::new();
        for month in self.pending_partitions(months)? {
            reports.push(self.taxi_trips(&month)?);
        }
        for week in weeks.keys() {
            reports.push(self.trips_by_week(&week)?);
        }
        Ok(reports)
    }
}
