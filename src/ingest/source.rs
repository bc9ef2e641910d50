use std::path::{Path, PathBuf};

use duckdb::Connection;

use crate::errors::{PipelineError, Result};
use crate::store::sql_literal;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    Parquet,
    Csv,
}

/// Raw file the store reads directly.
#[derive(Clone, Debug)]
pub struct Source {
    path: PathBuf,
    format: SourceFormat,
}

impl Source {
    /// Fails with `NotFound` if the file has not been fetched yet.
    pub fn open(path: &Path) -> Result<Source> {
        if !path.is_file() {
            return Err(PipelineError::NotFound(path.to_owned()));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let format = if name.ends_with(".parquet") || name.ends_with(".pq") {
            SourceFormat::Parquet
        } else if name.ends_with(".csv") || name.ends_with(".csv.gz") {
            SourceFormat::Csv
        } else {
            return Err(PipelineError::schema(path.display(), "unrecognized file extension"));
        };
        Ok(Source { path: path.to_owned(), format })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> SourceFormat {
        self.format
    }

    /// Table function scanning the file.
    pub fn scan(&self) -> String {
        let path = sql_literal(&self.path.to_string_lossy());
        match self.format {
            SourceFormat::Parquet => format!("read_parquet({})", path),
            SourceFormat::Csv => format!("read_csv_auto({}, header = true)", path),
        }
    }

    pub fn columns(&self, conn: &Connection) -> Result<Vec<String>> {
        let describe = || -> std::result::Result<Vec<String>, duckdb::Error> {
            let mut stmt = conn.prepare(&format!("DESCRIBE SELECT * FROM {}", self.scan()))?;
            let columns = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(columns)
        };
        describe().map_err(|err| PipelineError::schema(self.path.display(), err))
    }

    /// Checks that every column in `required` is present, ignoring case.
    pub fn require_columns(&self, conn: &Connection, required: &[&str]) -> Result<()> {
        let columns = self.columns(conn)?;
        let missing = required
            .iter()
            .filter(|name| !columns.iter().any(|c| c.eq_ignore_ascii_case(name)))
            .copied()
            .collect::<Vec<_>>();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::schema(
                self.path.display(),
                format!("missing columns {}", missing.join(", ")),
            ))
        }
    }

    /// Wraps errors raised while the store reads this file.
    pub fn read_error(&self, err: duckdb::Error) -> PipelineError {
        PipelineError::schema(self.path.display(), err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("taxi_trips_2023-03.parquet");
        match Source::open(&path) {
            Err(PipelineError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_columns() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zones.csv");
        fs::write(&path, "LocationID,zone,borough\n1,Newark Airport,EWR\n").unwrap();
        let source = Source::open(&path).unwrap();
        assert_eq!(source.format(), SourceFormat::Csv);

        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(source.columns(&conn).unwrap(), vec!["LocationID", "zone", "borough"]);
        assert!(source.require_columns(&conn, &["locationid", "zone"]).is_ok());
        match source.require_columns(&conn, &["LocationID", "the_geom"]) {
            Err(PipelineError::Schema { message, .. }) => assert_eq!(message, "missing columns the_geom"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unknown_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("zones.xlsx");
        fs::write(&path, "").unwrap();
        assert!(matches!(Source::open(&path), Err(PipelineError::Schema { .. })));
    }
}
