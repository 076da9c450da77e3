//! Settings of the ingestion pipeline, read from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::crs::WGS84;
use crate::error::Result;
use crate::io::DEFAULT_BATCH_SIZE;

/// Everything the ingestion loop needs to know. Every field has a default, so a config file
/// only has to name what it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Directory the downloader writes tiles into.
    pub watch_dir: PathBuf,
    /// Extension of tile files, without the dot.
    pub tile_extension: String,
    /// Census blocks with schools, United States.
    pub us_reference: PathBuf,
    /// Census blocks with schools, Canada.
    pub canada_reference: PathBuf,
    pub output: PathBuf,
    pub output_layer: String,
    /// EPSG code of every geometry written to the output.
    pub output_srid: i32,
    pub ledger: PathBuf,
    /// Interval between the two size samples of the stability check.
    pub stability_wait_secs: u64,
    /// Files smaller than this many bytes are never considered complete.
    pub min_file_size: u64,
    /// Wait after a scan that found nothing to do.
    pub idle_wait_secs: u64,
    /// Wait after a scan that found candidates.
    pub batch_wait_secs: u64,
    /// Rows per Arrow batch when reading tiles.
    pub batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            watch_dir: PathBuf::from("building_data/LoD1/northamerica"),
            tile_extension: "geojson".to_string(),
            us_reference: PathBuf::from(
                "../census_blocks/united_states/US_census_blocks_with_schools.fgb",
            ),
            canada_reference: PathBuf::from(
                "../census_blocks/canada/Canada_census_blocks_with_schools.fgb",
            ),
            output: PathBuf::from("../buildings_near_schools.fgb"),
            output_layer: "buildings".to_string(),
            output_srid: WGS84,
            ledger: PathBuf::from("../outputs/TUM_geojson_processing_log.txt"),
            stability_wait_secs: 15,
            min_file_size: 1000,
            idle_wait_secs: 15,
            batch_wait_secs: 60,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl PipelineConfig {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn stability_wait(&self) -> Duration {
        Duration::from_secs(self.stability_wait_secs)
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_secs(self.idle_wait_secs)
    }

    pub fn batch_wait(&self) -> Duration {
        Duration::from_secs(self.batch_wait_secs)
    }
}
