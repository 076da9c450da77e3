//! Grow the master output dataset one tile at a time.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::io::{read_path, write_path, DEFAULT_BATCH_SIZE};
use crate::table::GeoTable;

/// Row counts after an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendSummary {
    pub appended: usize,
    pub total: usize,
}

/// Appends to a single output file by rewriting it.
///
/// The combined dataset is written to a sibling `<stem>_tmp.<ext>` file which then replaces the
/// output with a rename, so readers only ever see the old or the new file. The cost is a full
/// read and rewrite of the output on every append.
#[derive(Debug, Clone)]
pub struct SinkAppender {
    output: PathBuf,
    layer: String,
}

impl SinkAppender {
    pub fn new(output: impl Into<PathBuf>, layer: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            layer: layer.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    /// Where the combined dataset is staged before replacing the output.
    pub fn temp_path(&self) -> PathBuf {
        let stem = self
            .output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match self.output.extension() {
            Some(ext) => format!("{stem}_tmp.{}", ext.to_string_lossy()),
            None => format!("{stem}_tmp"),
        };
        self.output.with_file_name(name)
    }

    pub fn append(&self, features: &GeoTable) -> Result<AppendSummary> {
        if let Some(parent) = self.output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let existing = if self.output.exists() {
            Some(read_path(&self.output, DEFAULT_BATCH_SIZE)?)
        } else {
            None
        };

        let combined;
        let to_write = match existing {
            Some(existing) => {
                combined = GeoTable::concat(&[existing, features.clone()])?;
                &combined
            }
            None => features,
        };

        let temp = self.temp_path();
        write_path(to_write, &temp, &self.layer)?;
        std::fs::rename(&temp, &self.output)?;

        let summary = AppendSummary {
            appended: features.len(),
            total: to_write.len(),
        };
        if summary.total == summary.appended {
            log::info!(
                "Created {} with {} buildings",
                self.output.display(),
                summary.total
            );
        } else {
            log::info!(
                "Appended {} buildings (total: {})",
                summary.appended,
                summary.total
            );
        }
        Ok(summary)
    }
}
