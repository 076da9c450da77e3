//! The scan → stabilize → process → append loop over a watched directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::PipelineConfig;
use crate::error::Result;
use crate::ledger::ProcessingLedger;
use crate::processor::{RegionJoinError, TileOutcome, TileProcessor};
use crate::schedule::Sleeper;
use crate::sink::SinkAppender;
use crate::stability::StabilityDetector;
use crate::store::GeometryStore;

/// What happened to one candidate tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Matches were appended to the output; the tile was deleted.
    Appended { rows: usize },
    /// Nothing matched; the tile was deleted.
    EmptyDropped,
    /// The tile's geometry couldn't be used; it stays on disk for inspection.
    ErrorKept(String),
    /// Writing the output failed; the tile stays on disk but is not retried.
    SinkFailed(String),
    /// Still being written; retried on a later scan.
    Deferred,
    /// The ledger couldn't be read, so the tile was left alone this cycle.
    Skipped(String),
}

impl Disposition {
    /// Whether the tile was recorded in the ledger.
    pub fn is_final(&self) -> bool {
        !matches!(self, Disposition::Deferred | Disposition::Skipped(_))
    }
}

#[derive(Debug)]
pub struct TileResult {
    pub path: PathBuf,
    pub disposition: Disposition,
    pub join_errors: Vec<RegionJoinError>,
}

/// The outcome of one pass over the watched directory.
#[derive(Debug, Default)]
pub struct CycleReport {
    /// Tiles found that were not yet in the ledger.
    pub unprocessed: usize,
    pub tiles: Vec<TileResult>,
}

impl CycleReport {
    /// Whether the scan found no work at all.
    pub fn is_idle(&self) -> bool {
        self.unprocessed == 0 && self.tiles.is_empty()
    }

    /// How long to wait before the next scan.
    pub fn next_wait(&self, config: &PipelineConfig) -> Duration {
        if self.is_idle() {
            config.idle_wait()
        } else {
            config.batch_wait()
        }
    }

    pub fn count(&self, predicate: impl Fn(&Disposition) -> bool) -> usize {
        self.tiles
            .iter()
            .filter(|tile| predicate(&tile.disposition))
            .count()
    }
}

/// Running totals over the lifetime of a loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub errors: usize,
}

/// Drives tiles from the watched directory through the processor into the output.
///
/// Tiles are handled one at a time. Only one loop may run against a given watched directory,
/// ledger and output.
pub struct IngestionLoop<'a, S> {
    config: PipelineConfig,
    processor: TileProcessor<'a>,
    ledger: ProcessingLedger,
    sink: SinkAppender,
    stability: StabilityDetector<S>,
    sleeper: S,
    progress: Progress,
}

impl<'a, S: Sleeper + Clone> IngestionLoop<'a, S> {
    pub fn new(config: PipelineConfig, store: &'a GeometryStore, sleeper: S) -> Self {
        let processor = TileProcessor::new(store, config.output_srid, config.batch_size);
        let ledger = ProcessingLedger::new(&config.ledger);
        let sink = SinkAppender::new(&config.output, &config.output_layer);
        let stability = StabilityDetector::new(
            config.stability_wait(),
            config.min_file_size,
            sleeper.clone(),
        );
        Self {
            config,
            processor,
            ledger,
            sink,
            stability,
            sleeper,
            progress: Progress::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn progress(&self) -> Progress {
        self.progress
    }

    /// Tile files in the watched directory, sorted by name.
    pub fn list_tiles(&self) -> Result<Vec<PathBuf>> {
        let mut tiles = vec![];
        for entry in std::fs::read_dir(&self.config.watch_dir)? {
            let path = entry?.path();
            let matches_extension = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.config.tile_extension));
            if matches_extension && path.is_file() {
                tiles.push(path);
            }
        }
        tiles.sort();
        Ok(tiles)
    }

    /// One scan of the watched directory, handling every unprocessed tile found.
    pub fn run_cycle(&mut self) -> CycleReport {
        let mut report = CycleReport::default();

        let tiles = match self.list_tiles() {
            Ok(tiles) => tiles,
            Err(err) => {
                log::error!(
                    "Could not list {}: {err}",
                    self.config.watch_dir.display()
                );
                return report;
            }
        };

        let mut unprocessed = vec![];
        for path in tiles {
            match self.ledger.is_processed(&file_name(&path)) {
                Ok(true) => {}
                Ok(false) => unprocessed.push(path),
                Err(err) => {
                    log::error!(
                        "Could not read ledger {}: {err}",
                        self.ledger.path().display()
                    );
                    report.tiles.push(TileResult {
                        path,
                        disposition: Disposition::Skipped(err.to_string()),
                        join_errors: vec![],
                    });
                }
            }
        }

        report.unprocessed = unprocessed.len();
        if unprocessed.is_empty() {
            log::info!(
                "No new files to process. Waiting {} seconds",
                self.config.idle_wait_secs
            );
            return report;
        }

        log::info!("Found {} unprocessed files", unprocessed.len());
        for path in unprocessed {
            let result = self.process_tile(&path);
            report.tiles.push(result);
        }
        report
    }

    /// Stabilize, process and route one tile.
    pub fn process_tile(&mut self, path: &Path) -> TileResult {
        let name = file_name(path);

        if !self.stability.is_stable(path) {
            log::info!("{name} - still downloading, skipping for now");
            return TileResult {
                path: path.to_path_buf(),
                disposition: Disposition::Deferred,
                join_errors: vec![],
            };
        }

        log::info!("Processing {name} ({})", display_size(path));
        let report = self.processor.process(path);

        let disposition = match report.outcome {
            TileOutcome::GeometryError(message) => {
                log::warn!("Geometry error in {name}, keeping file for inspection");
                self.mark_processed(&name);
                self.progress.errors += 1;
                Disposition::ErrorKept(message)
            }
            TileOutcome::Empty => {
                log::info!("No matches in {name}, marking as processed and deleting file");
                self.mark_processed(&name);
                self.progress.processed += 1;
                delete_tile(path);
                Disposition::EmptyDropped
            }
            TileOutcome::Matched(features) => match self.sink.append(&features) {
                Ok(summary) => {
                    self.mark_processed(&name);
                    self.progress.processed += 1;
                    delete_tile(path);
                    Disposition::Appended {
                        rows: summary.appended,
                    }
                }
                Err(err) => {
                    log::error!(
                        "Failed to write {} buildings from {name} to {}: {err:?}",
                        features.len(),
                        self.sink.output().display()
                    );
                    self.mark_processed(&name);
                    self.progress.errors += 1;
                    Disposition::SinkFailed(err.to_string())
                }
            },
        };

        log::info!(
            "Progress: {} tiles processed, {} errors",
            self.progress.processed,
            self.progress.errors
        );

        TileResult {
            path: path.to_path_buf(),
            disposition,
            join_errors: report.join_errors,
        }
    }

    /// Scan, process and wait, forever.
    pub fn run_forever(&mut self) -> ! {
        loop {
            let report = self.run_cycle();
            self.sleeper.sleep(report.next_wait(&self.config));
        }
    }

    fn mark_processed(&self, name: &str) {
        if let Err(err) = self.ledger.mark_processed(name) {
            log::error!(
                "Could not record {name} in {}: {err}",
                self.ledger.path().display()
            );
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn delete_tile(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => log::info!("Deleted {}", path.display()),
        Err(err) => log::warn!("Could not delete {}: {err}", path.display()),
    }
}

fn display_size(path: &Path) -> String {
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = MB * 1024.0;
    match std::fs::metadata(path) {
        Ok(metadata) => {
            let bytes = metadata.len() as f64;
            if bytes >= GB {
                format!("{:.2} GB", bytes / GB)
            } else {
                format!("{:.2} MB", bytes / MB)
            }
        }
        Err(_) => "unknown size".to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::io::{read_path, DEFAULT_BATCH_SIZE};
    use crate::schedule::test::RecordingSleeper;
    use crate::store::{ReferenceBlockSet, Region};
    use crate::test::{lonlat_block, square, write_tile};
    use serde_json::json;

    struct Fixture {
        dir: tempfile::TempDir,
        store: GeometryStore,
        sleeper: RecordingSleeper,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            std::fs::create_dir(dir.path().join("tiles")).unwrap();
            let mut store = GeometryStore::new();
            store.insert(ReferenceBlockSet::new(
                Region::UnitedStates,
                5070,
                vec![lonlat_block(-80., 42., -77., 44., 5070)],
            ));
            Self {
                dir,
                store,
                sleeper: RecordingSleeper::default(),
            }
        }

        fn config(&self) -> PipelineConfig {
            let root = self.dir.path();
            PipelineConfig {
                watch_dir: root.join("tiles"),
                output: root.join("out").join("buildings_near_schools.fgb"),
                ledger: root.join("outputs").join("log.txt"),
                min_file_size: 10,
                ..Default::default()
            }
        }

        fn tile(&self, name: &str) -> PathBuf {
            self.dir.path().join("tiles").join(name)
        }

        fn ledger(&self) -> ProcessingLedger {
            ProcessingLedger::new(self.config().ledger)
        }

        fn ingestion_loop(&self) -> IngestionLoop<'_, &RecordingSleeper> {
            IngestionLoop::new(self.config(), &self.store, &self.sleeper)
        }
    }

    #[test]
    fn matched_tile_is_appended_and_deleted() {
        let fixture = Fixture::new();
        let tile = fixture.tile("w080_n45_w075_n40.geojson");
        write_tile(
            &tile,
            &[
                (json!({"id": 1}), Some(square(-79.5, 42.5, 0.01))),
                (json!({"id": 2}), Some(square(-60., 42.5, 0.01))),
            ],
            None,
        );

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert_eq!(report.unprocessed, 1);
        assert_eq!(
            report.tiles[0].disposition,
            Disposition::Appended { rows: 1 }
        );
        assert!(!tile.exists());
        assert!(fixture
            .ledger()
            .is_processed("w080_n45_w075_n40.geojson")
            .unwrap());

        let output = read_path(&fixture.config().output, DEFAULT_BATCH_SIZE).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(ingestion.progress(), Progress { processed: 1, errors: 0 });
    }

    #[test]
    fn scenario_b_empty_tile() {
        let fixture = Fixture::new();
        let tile = fixture.tile("w060_n50_w055_n45.geojson");
        write_tile(&tile, &[], None);

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert_eq!(report.tiles[0].disposition, Disposition::EmptyDropped);
        assert!(!tile.exists());
        assert!(fixture
            .ledger()
            .is_processed("w060_n50_w055_n45.geojson")
            .unwrap());
        assert!(!fixture.config().output.exists());
    }

    #[test]
    fn geometry_error_tile_is_kept_and_never_reread() {
        let fixture = Fixture::new();
        let tile = fixture.tile("broken.geojson");
        write_tile(&tile, &[(json!({"id": 1}), None)], None);

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert!(matches!(
            report.tiles[0].disposition,
            Disposition::ErrorKept(_)
        ));
        assert!(tile.exists());
        assert!(fixture.ledger().is_processed("broken.geojson").unwrap());
        assert_eq!(ingestion.progress(), Progress { processed: 0, errors: 1 });

        // The kept file is never picked up again
        let waits_before = fixture.sleeper.waits.borrow().len();
        let report = ingestion.run_cycle();
        assert!(report.is_idle());
        assert!(report.tiles.is_empty());
        // No stability check ran
        assert_eq!(fixture.sleeper.waits.borrow().len(), waits_before);
        assert_eq!(report.next_wait(ingestion.config()), Duration::from_secs(15));
    }

    #[test]
    #[cfg(not(feature = "proj"))]
    fn unsupported_tile_crs_is_kept() {
        let fixture = Fixture::new();
        let tile = fixture.tile("w080_n45_w075_n40.geojson");
        write_tile(
            &tile,
            &[(json!({"id": 1}), Some(square(650_000., 6_860_000., 10.)))],
            Some("EPSG:2154"),
        );

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert!(matches!(
            report.tiles[0].disposition,
            Disposition::ErrorKept(_)
        ));
        assert!(tile.exists());
        assert!(fixture
            .ledger()
            .is_processed("w080_n45_w075_n40.geojson")
            .unwrap());
        assert!(!fixture.config().output.exists());
        assert_eq!(ingestion.progress(), Progress { processed: 0, errors: 1 });
    }

    #[test]
    fn unstable_tile_is_deferred() {
        let fixture = Fixture::new();
        let tile = fixture.tile("downloading.geojson");
        std::fs::write(&tile, b"{").unwrap();

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert_eq!(report.tiles[0].disposition, Disposition::Deferred);
        assert!(!report.tiles[0].disposition.is_final());
        assert!(tile.exists());
        assert!(!fixture.ledger().is_processed("downloading.geojson").unwrap());
        assert_eq!(report.next_wait(ingestion.config()), Duration::from_secs(60));
    }

    #[test]
    fn sink_failure_keeps_tile_but_records_it() {
        let fixture = Fixture::new();
        let config = fixture.config();
        // A directory where the output file should be can't be read back
        std::fs::create_dir_all(&config.output).unwrap();

        let tile = fixture.tile("tile.geojson");
        write_tile(
            &tile,
            &[(json!({"id": 1}), Some(square(-79.5, 42.5, 0.01)))],
            None,
        );

        let mut ingestion = fixture.ingestion_loop();
        let report = ingestion.run_cycle();
        assert!(matches!(
            report.tiles[0].disposition,
            Disposition::SinkFailed(_)
        ));
        assert!(tile.exists());
        assert!(fixture.ledger().is_processed("tile.geojson").unwrap());
    }

    #[test]
    fn other_extensions_are_ignored() {
        let fixture = Fixture::new();
        std::fs::write(fixture.tile("notes.txt"), vec![b'x'; 100]).unwrap();
        std::fs::write(fixture.tile("partial.geojson.part"), vec![b'x'; 100]).unwrap();

        let ingestion = fixture.ingestion_loop();
        assert!(ingestion.list_tiles().unwrap().is_empty());
    }

    #[test]
    fn restart_resumes_from_ledger() {
        let fixture = Fixture::new();
        write_tile(&fixture.tile("a.geojson"), &[], None);
        fixture.ingestion_loop().run_cycle();

        // The downloader delivers the same tile name again after a restart
        write_tile(&fixture.tile("a.geojson"), &[], None);
        write_tile(&fixture.tile("b.geojson"), &[], None);
        let report = fixture.ingestion_loop().run_cycle();
        assert_eq!(report.unprocessed, 1);
        assert_eq!(report.tiles.len(), 1);
        assert!(report.tiles[0].path.ends_with("b.geojson"));
        assert!(fixture.tile("a.geojson").exists());
    }
}
