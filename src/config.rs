use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chrono::NaiveDate;

use crate::partition::{PartitionKey, PartitionsDefinition};
use crate::retry::Backoff;

/// Environment variable naming the analytics database file.
pub const DATABASE_ENV: &str = "DUCKDB_DATABASE";

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub database: PathBuf,
    pub raw_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub outputs_dir: PathBuf,
    /// Borough the zone statistics are restricted to. `None` covers the whole city.
    pub borough: Option<String>,
    pub connect_backoff: Backoff,
    pub lock_backoff: Backoff,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            database: PathBuf::from("data/staging/data.duckdb"),
            raw_dir: PathBuf::from("data/raw"),
            staging_dir: PathBuf::from("data/staging"),
            outputs_dir: PathBuf::from("data/outputs"),
            borough: Some("Manhattan".to_string()),
            connect_backoff: Backoff::default(),
            lock_backoff: Backoff::new(20, Duration::from_millis(10), Duration::from_millis(500)),
        }
    }
}

impl PipelineConfig {
    /// Defaults, with the database location taken from `DUCKDB_DATABASE` when set.
    pub fn from_env() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        match env::var_os(DATABASE_ENV) {
            Some(path) if !path.is_empty() => config.database = PathBuf::from(path),
            _ => log::debug!("{} not set, using {}", DATABASE_ENV, config.database.display()),
        }
        config
    }

    /// Rooted at `dir`, for tests and one-off runs.
    pub fn in_dir(dir: &std::path::Path) -> PipelineConfig {
        PipelineConfig {
            database: dir.join("staging").join("data.duckdb"),
            raw_dir: dir.join("raw"),
            staging_dir: dir.join("staging"),
            outputs_dir: dir.join("outputs"),
            ..PipelineConfig::default()
        }
    }

    pub fn trips_file(&self, partition: &PartitionKey) -> PathBuf {
        self.raw_dir
            .join(format!("taxi_trips_{}.parquet", partition.month_token()))
    }

    pub fn zones_file(&self) -> PathBuf {
        self.raw_dir.join("taxi_zones.csv")
    }

    pub fn trips_by_week_file(&self) -> PathBuf {
        self.outputs_dir.join("trips_by_week.csv")
    }

    pub fn zone_stats_file(&self) -> PathBuf {
        self.staging_dir.join("manhattan_stats.geojson")
    }
}

fn schedule_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 3, 1).unwrap_or_default()
}

fn schedule_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2023, 4, 1).unwrap_or_default()
}

/// Months of raw trip files loaded into the store.
pub fn monthly_partitions() -> PartitionsDefinition {
    PartitionsDefinition::monthly(schedule_start(), schedule_end())
}

/// Weeks the trip statistics are reported for.
pub fn weekly_partitions() -> PartitionsDefinition {
    PartitionsDefinition::weekly(schedule_start(), schedule_end())
}
