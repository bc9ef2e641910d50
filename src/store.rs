//! Access to the embedded analytics store.
//!
//! Every pipeline step receives a [`Connection`] from [`acquire_connection`] and drops it
//! when the step is done; there is no process-wide handle. DuckDB allows a single process
//! to hold the database file for writing, so opening it while another step still holds it
//! fails with a lock error. Those errors, and other I/O failures, are retried with backoff.

use std::fs;
use std::path::Path;

use duckdb::Connection;

use crate::errors::{PipelineError, Result};
use crate::retry::{retry, Backoff, RetryError};

pub const TRIPS_TABLE: &str = "trips";
pub const ZONES_TABLE: &str = "zones";

/// Opens the store at `target`, retrying transient failures according to `backoff`.
pub fn acquire_connection(target: &Path, backoff: &Backoff) -> Result<Connection> {
    acquire_with(target, backoff, |path: &Path| Connection::open(path))
}

fn acquire_with<F>(target: &Path, backoff: &Backoff, mut open: F) -> Result<Connection>
where
    F: FnMut(&Path) -> duckdb::Result<Connection>,
{
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let what = format!("opening {}", target.display());
    match retry(backoff, &what, is_transient, || open(target)) {
        Ok(conn) => {
            log::debug!("Connected to {}", target.display());
            Ok(conn)
        }
        Err(RetryError::Exhausted { attempts, last }) => Err(PipelineError::Connection {
            target: target.display().to_string(),
            attempts,
            source: last,
        }),
        Err(RetryError::Fatal(err)) => Err(PipelineError::Store(err)),
    }
}

/// In-memory store, used by tests and dry runs.
pub fn in_memory() -> Result<Connection> {
    Ok(Connection::open_in_memory()?)
}

/// I/O and file lock failures are worth retrying, anything else is not.
pub fn is_transient(err: &duckdb::Error) -> bool {
    is_transient_message(&err.to_string())
}

pub fn is_transient_message(message: &str) -> bool {
    message.starts_with("IO Error")
        || message.contains("Could not set lock")
        || message.contains("Conflicting lock")
        || message.contains("database is locked")
}

/// Write-write conflicts between concurrent transactions on the same table.
pub fn is_conflict(err: &duckdb::Error) -> bool {
    let message = err.to_string();
    message.contains("TransactionContext Error") || message.contains("Conflict on")
}

pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn require_table(conn: &Connection, table: &str) -> Result<()> {
    if table_exists(conn, table)? {
        Ok(())
    } else {
        Err(PipelineError::MissingTable(table.to_string()))
    }
}

/// Quotes `s` as a SQL string literal.
pub fn sql_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// A partition currently present in the trips table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoadedPartition {
    pub key: String,
    pub rows: u64,
}

pub fn loaded_partitions(conn: &Connection) -> Result<Vec<LoadedPartition>> {
    if !table_exists(conn, TRIPS_TABLE)? {
        return Ok(Vec::new());
    }
    let mut stmt = conn.prepare(
        "SELECT partition_key, COUNT(*) FROM trips GROUP BY partition_key ORDER BY partition_key",
    )?;
    let partitions = stmt
        .query_map([], |row| {
            Ok(LoadedPartition {
                key: row.get(0)?,
                rows: row.get::<_, i64>(1)? as u64,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(partitions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_classify_errors() {
        assert!(is_transient_message(
            "IO Error: Could not set lock on file \"data.duckdb\": Conflicting lock is held"
        ));
        assert!(is_transient_message("IO Error: Cannot open file \"x\": No such file or directory"));
        assert!(!is_transient_message("Catalog Error: Table with name trips does not exist!"));
        assert!(!is_transient_message("Binder Error: Referenced column \"VendorID\" not found"));
    }

    #[test]
    fn test_acquire_creates_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("data.duckdb");
        let conn = acquire_connection(&path, &Backoff::immediate(2)).unwrap();
        assert!(!table_exists(&conn, TRIPS_TABLE).unwrap());
        assert!(loaded_partitions(&conn).unwrap().is_empty());
        drop(conn);
        assert!(path.exists());
    }

    #[test]
    fn test_acquire_gives_up_on_unreadable_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("notadb.duckdb");
        fs::write(&path, vec![0x5a; 8192]).unwrap();
        let backoff = Backoff::new(3, Duration::from_millis(0), Duration::from_millis(0));
        match acquire_connection(&path, &backoff) {
            Err(PipelineError::Connection { target, attempts, source }) => {
                assert_eq!(target, path.display().to_string());
                assert_eq!(attempts, 4);
                assert!(source.to_string().starts_with("IO Error"));
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_acquire_does_not_retry_other_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.duckdb");
        let mut attempts = 0;
        let result = acquire_with(&path, &Backoff::immediate(5), |_| {
            attempts += 1;
            Err(duckdb::Error::QueryReturnedNoRows)
        });
        assert!(matches!(result, Err(PipelineError::Store(duckdb::Error::QueryReturnedNoRows))));
        assert_eq!(attempts, 1);
    }

    #[test]
    fn test_require_table() {
        let conn = in_memory().unwrap();
        match require_table(&conn, ZONES_TABLE) {
            Err(PipelineError::MissingTable(table)) => assert_eq!(table, "zones"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_sql_literal() {
        assert_eq!(sql_literal("data/raw/o'hare.csv"), "'data/raw/o''hare.csv'");
    }
}
