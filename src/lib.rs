pub mod aggregate;
pub mod aggregate_store;
pub mod config;
mod errors;
pub mod file_writer;
pub mod geometry;
pub mod ingest;
pub mod partition;
pub mod pipeline;
pub mod retry;
pub mod store;

pub use crate::aggregate::{PeriodAggregate, Selection, ZoneAggregate};
pub use crate::aggregate_store::{upsert_period, AggregateStore};
pub use crate::config::PipelineConfig;
pub use crate::errors::{PipelineError, Result};
pub use crate::geometry::Geometry;
pub use crate::partition::{Granularity, PartitionKey, PartitionsDefinition};
pub use crate::pipeline::{Pipeline, StepReport};
pub use crate::retry::Backoff;
pub use crate::store::acquire_connection;
