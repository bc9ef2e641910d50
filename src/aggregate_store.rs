//! CSV file holding one aggregate row per period.
//!
//! Every update reads the whole file, replaces the row for the updated period, sorts by
//! period and writes the whole file back through a temporary file. Writers are serialized
//! by a lock file, so updates to different periods from concurrent pipeline runs do not
//! overwrite each other.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::aggregate::PeriodAggregate;
use crate::errors::{PipelineError, Result};
use crate::file_writer::{store_atomically, FileLock};
use crate::retry::Backoff;

pub struct AggregateStore {
    path: PathBuf,
    lock_backoff: Backoff,
}

impl AggregateStore {
    pub fn new(path: &Path, lock_backoff: Backoff) -> AggregateStore {
        AggregateStore {
            path: path.to_owned(),
            lock_backoff,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All rows, in file order. A missing file is an empty store.
    pub fn rows(&self) -> Result<Vec<PeriodAggregate>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        csv::Reader::from_reader(file)
            .deserialize()
            .collect::<std::result::Result<Vec<PeriodAggregate>, _>>()
            .map_err(|err| PipelineError::schema(self.path.display(), err))
    }

    pub fn get(&self, period: &str) -> Result<Option<PeriodAggregate>> {
        Ok(self.rows()?.into_iter().find(|row| row.period == period))
    }

    /// Inserts `row`, replacing any existing row for the same period.
    pub fn upsert(&self, row: PeriodAggregate) -> Result<()> {
        let _lock = FileLock::acquire(&self.path, &self.lock_backoff)?;
        let mut rows = self.rows()?;
        let before = rows.len();
        rows.retain(|existing| existing.period != row.period);
        let replaced = rows.len() < before;
        let period = row.period.clone();
        rows.push(row);
        rows.sort_by(|a, b| a.period.cmp(&b.period));

        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &rows {
            writer.serialize(row)?;
        }
        let data = writer
            .into_inner()
            .map_err(|err| PipelineError::Io(err.into_error()))?;
        store_atomically(&self.path, &data)?;
        log::info!(
            "{} period {} in {} ({} periods)",
            if replaced { "Replaced" } else { "Added" },
            period,
            self.path.display(),
            rows.len()
        );
        Ok(())
    }
}

/// Upserts `row` into the aggregate file at `store_path`.
pub fn upsert_period(row: PeriodAggregate, store_path: &Path) -> Result<()> {
    AggregateStore::new(store_path, Backoff::default()).upsert(row)
}
