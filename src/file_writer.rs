use std::fs::{self, create_dir_all, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tempfile::Builder;

use crate::errors::{PipelineError, Result};
use crate::retry::{retry, Backoff, RetryError};

/// Atomically writes the data to the file at the given path
pub fn store_atomically(path: &Path, data: &[u8]) -> io::Result<()> {
    // Create the directory if it doesn't exist
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    create_dir_all(dir)?;

    // Write the data to a uniquely named temporary file and then rename it to the target path.
    // The temporary file is removed if anything fails before the rename.
    let mut prefix = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    prefix.push(".");
    let mut file = Builder::new()
        .prefix(&prefix)
        .suffix(".INCOMPLETE")
        .tempfile_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// Exclusive lock on a file, held as a `<file>.lock` marker for as long as the guard
/// lives. The marker is created with `create_new`, which fails if another writer
/// already holds it. It is empty; a marker left behind by a crashed writer has to be
/// removed by hand.
#[derive(Debug)]
pub struct FileLock {
    path: PathBuf,
}

impl FileLock {
    pub fn acquire(target: &Path, backoff: &Backoff) -> Result<FileLock> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent)?;
            }
        }
        let path = sibling(target, "lock");
        let what = format!("locking {}", target.display());
        let locked = retry(
            backoff,
            &what,
            |err: &io::Error| err.kind() == io::ErrorKind::AlreadyExists,
            || OpenOptions::new().write(true).create_new(true).open(&path).map(drop),
        );
        match locked {
            Ok(()) => Ok(FileLock { path }),
            Err(RetryError::Exhausted { attempts, .. }) => Err(PipelineError::MergeConflict {
                path: target.to_owned(),
                attempts,
            }),
            Err(RetryError::Fatal(err)) => Err(PipelineError::Io(err)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            log::warn!("Failed to release lock {}: {}", self.path.display(), err);
        }
    }
}

/// `data.csv` -> `data.csv.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("stats.json");
        store_atomically(&path, b"first").unwrap();
        store_atomically(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
        assert_eq!(dir_entries(path.parent().unwrap()), vec!["stats.json"]);
    }

    #[test]
    fn test_concurrent_stores_do_not_share_temp_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stats.json");
        let contents = (0..8).map(|i| vec![b'a' + i; 64 * 1024]).collect::<Vec<_>>();
        std::thread::scope(|scope| {
            for data in &contents {
                let path = &path;
                scope.spawn(move || store_atomically(path, data).unwrap());
            }
        });
        let stored = fs::read(&path).unwrap();
        assert!(contents.contains(&stored));
        assert_eq!(dir_entries(dir.path()), vec!["stats.json"]);
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names = fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("trips_by_week.csv");
        let lock = FileLock::acquire(&target, &Backoff::immediate(0)).unwrap();
        assert_eq!(lock.path(), dir.path().join("trips_by_week.csv.lock"));
        assert_eq!(fs::read(lock.path()).unwrap(), b"");

        match FileLock::acquire(&target, &Backoff::immediate(3)) {
            Err(PipelineError::MergeConflict { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("unexpected {:?}", other),
        }

        let marker = lock.path().to_owned();
        drop(lock);
        assert!(!marker.exists());
        assert!(FileLock::acquire(&target, &Backoff::immediate(0)).is_ok());
    }
}
