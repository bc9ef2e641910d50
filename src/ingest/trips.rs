use std::fmt;
use std::path::Path;

use duckdb::Connection;
use itertools::Itertools;

use crate::errors::{PipelineError, Result};
use crate::ingest::source::Source;
use crate::partition::PartitionKey;
use crate::retry::{retry, Backoff, RetryError};
use crate::store::{is_conflict, TRIPS_TABLE};

/// Raw column name, canonical column name and store type of every trip column.
pub fn trip_columns() -> Vec<(&'static str, &'static str, &'static str)> {
    vec![
        ("VendorID", "vendor_id", "INTEGER"),
        ("PULocationID", "pickup_zone_id", "INTEGER"),
        ("DOLocationID", "dropoff_zone_id", "INTEGER"),
        ("RatecodeID", "rate_code_id", "DOUBLE"),
        ("payment_type", "payment_type", "INTEGER"),
        ("tpep_dropoff_datetime", "dropoff_datetime", "TIMESTAMP"),
        ("tpep_pickup_datetime", "pickup_datetime", "TIMESTAMP"),
        ("trip_distance", "trip_distance", "DOUBLE"),
        ("passenger_count", "passenger_count", "DOUBLE"),
        ("total_amount", "total_amount", "DOUBLE"),
    ]
}

pub fn raw_colnames() -> Vec<&'static str> {
    trip_columns().into_iter().map(|(raw, _, _)| raw).collect()
}

fn create_table_sql() -> String {
    let columns = trip_columns()
        .into_iter()
        .map(|(_, name, ty)| format!("{} {}", name, ty))
        .join(", ");
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, partition_key VARCHAR NOT NULL)",
        TRIPS_TABLE, columns
    )
}

fn insert_sql(source: &Source) -> String {
    let columns = trip_columns()
        .into_iter()
        .map(|(raw, name, ty)| format!("CAST(\"{}\" AS {}) AS {}", raw, ty, name))
        .join(", ");
    let names = trip_columns().into_iter().map(|(_, name, _)| name).join(", ");
    format!(
        "INSERT INTO {table} ({names}, partition_key) SELECT {columns}, CAST(? AS VARCHAR) FROM {scan}",
        table = TRIPS_TABLE,
        names = names,
        columns = columns,
        scan = source.scan(),
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadReport {
    pub partition: String,
    pub rows_deleted: usize,
    pub rows_inserted: usize,
}

/// Replaces the rows of `partition` in the trips table with the contents of `source_path`.
///
/// The delete and the insert run in one transaction, so a failure part way leaves the
/// previous rows of the partition in place. Rows of other partitions are never touched.
/// Write conflicts with concurrent loaders of other partitions are retried per `backoff`.
pub fn load_partition(
    conn: &mut Connection,
    partition: &PartitionKey,
    source_path: &Path,
    backoff: &Backoff,
) -> Result<LoadReport> {
    let source = Source::open(source_path)?;
    source.require_columns(conn, &raw_colnames())?;
    conn.execute_batch(&create_table_sql())?;

    let key = partition.to_string();
    let insert = insert_sql(&source);
    let what = format!("loading partition {}", key);
    let is_retryable = |err: &LoadError| is_conflict(err.inner());
    let result = retry(backoff, &what, is_retryable, || -> LoadResult<(usize, usize)> {
        let tx = conn.transaction().map_err(LoadError::Store)?;
        let rows_deleted = tx
            .execute("DELETE FROM trips WHERE partition_key = ?", [&key])
            .map_err(LoadError::Store)?;
        let rows_inserted = tx.execute(&insert, [&key]).map_err(LoadError::Read)?;
        tx.commit().map_err(LoadError::Store)?;
        Ok((rows_deleted, rows_inserted))
    });
    let (rows_deleted, rows_inserted) = match result {
        Ok(counts) => counts,
        Err(RetryError::Exhausted { attempts, last }) => {
            return Err(PipelineError::TransientStore {
                attempts,
                source: last.into_inner(),
            })
        }
        Err(RetryError::Fatal(LoadError::Store(err))) => return Err(PipelineError::Store(err)),
        Err(RetryError::Fatal(LoadError::Read(err))) => return Err(source.read_error(err)),
    };

    log::info!(
        "Loaded {} rows from {} into partition {} (replaced {})",
        rows_inserted,
        source_path.display(),
        key,
        rows_deleted
    );
    Ok(LoadReport {
        partition: key,
        rows_deleted,
        rows_inserted,
    })
}

/// Failure inside the load transaction. `Read` covers the insert, which is where the
/// source file is scanned and cast; everything else is the store's own doing.
#[derive(Debug)]
enum LoadError {
    Store(duckdb::Error),
    Read(duckdb::Error),
}

type LoadResult<T> = std::result::Result<T, LoadError>;

impl LoadError {
    fn inner(&self) -> &duckdb::Error {
        match self {
            LoadError::Store(err) | LoadError::Read(err) => err,
        }
    }

    fn into_inner(self) -> duckdb::Error {
        match self {
            LoadError::Store(err) | LoadError::Read(err) => err,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.inner().fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_mapping() {
        assert_eq!(trip_columns().len(), 10);
        assert!(create_table_sql().contains("pickup_datetime TIMESTAMP"));
        assert!(create_table_sql().ends_with("partition_key VARCHAR NOT NULL)"));
    }
}
