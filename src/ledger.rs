//! The append-only list of tile file names that have already been handled.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A newline-delimited file of processed names.
///
/// Membership is all that matters: a name may be recorded more than once and the file is
/// never rewritten. A missing file is an empty ledger.
#[derive(Debug, Clone)]
pub struct ProcessingLedger {
    path: PathBuf,
}

impl ProcessingLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Scan the ledger for `name`.
    ///
    /// Errors other than the ledger not existing yet are returned, so the caller can leave the
    /// file alone instead of processing it twice.
    pub fn is_processed(&self, name: &str) -> Result<bool> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        for line in BufReader::new(file).lines() {
            if line?.trim() == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Append `name`, creating the ledger and its parent directories on first use.
    pub fn mark_processed(&self, name: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{name}")?;
        file.sync_data()?;
        Ok(())
    }

    /// Every distinct name recorded so far.
    pub fn entries(&self) -> Result<HashSet<String>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(err) => return Err(err.into()),
        };

        let mut entries = HashSet::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                entries.insert(name.to_string());
            }
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProcessingLedger::new(dir.path().join("log.txt"));
        assert!(!ledger.is_processed("w075_n50_w070_n45.geojson").unwrap());
        assert!(ledger.entries().unwrap().is_empty());
    }

    #[test]
    fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outputs").join("nested").join("log.txt");
        let ledger = ProcessingLedger::new(&path);
        ledger.mark_processed("a.geojson").unwrap();
        assert!(path.exists());
        assert!(ledger.is_processed("a.geojson").unwrap());
        assert!(!ledger.is_processed("b.geojson").unwrap());
    }

    #[test]
    fn survives_restart_and_tolerates_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.txt");

        let ledger = ProcessingLedger::new(&path);
        for name in ["a.geojson", "b.geojson", "a.geojson"] {
            ledger.mark_processed(name).unwrap();
        }
        let before = ledger.entries().unwrap();
        drop(ledger);

        let reopened = ProcessingLedger::new(&path);
        assert_eq!(reopened.entries().unwrap(), before);
        assert_eq!(before.len(), 2);
        assert!(reopened.is_processed("a.geojson").unwrap());
        assert!(reopened.is_processed("b.geojson").unwrap());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn names_match_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ProcessingLedger::new(dir.path().join("log.txt"));
        ledger.mark_processed("w075_n50_w070_n45.geojson").unwrap();
        assert!(!ledger.is_processed("w075_n50").unwrap());
    }

    #[test]
    fn unreadable_ledger_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be
        let ledger = ProcessingLedger::new(dir.path());
        assert!(ledger.is_processed("a.geojson").is_err());
    }
}
