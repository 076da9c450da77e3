//! Decide whether an externally downloaded file has finished being written.

use std::path::Path;
use std::time::Duration;

use crate::schedule::Sleeper;

/// Compares a file's size across a wait.
///
/// A file is stable when its size did not change over `wait` and is at least `min_size` bytes.
/// Filesystem errors, such as the file disappearing between samples, make a file unstable so
/// it is simply retried on a later scan.
#[derive(Debug, Clone)]
pub struct StabilityDetector<S> {
    wait: Duration,
    min_size: u64,
    sleeper: S,
}

impl<S: Sleeper> StabilityDetector<S> {
    pub fn new(wait: Duration, min_size: u64, sleeper: S) -> Self {
        Self {
            wait,
            min_size,
            sleeper,
        }
    }

    pub fn is_stable(&self, path: &Path) -> bool {
        let Ok(before) = std::fs::metadata(path) else {
            return false;
        };
        self.sleeper.sleep(self.wait);
        let Ok(after) = std::fs::metadata(path) else {
            log::debug!("{} vanished during the stability check", path.display());
            return false;
        };

        before.len() == after.len() && after.len() >= self.min_size
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::schedule::test::{CallbackSleeper, RecordingSleeper};
    use std::io::Write;

    #[test]
    fn static_file_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("w075_n50_w070_n45.geojson");
        std::fs::write(&path, vec![b' '; 2000]).unwrap();

        let sleeper = RecordingSleeper::default();
        let detector = StabilityDetector::new(Duration::from_secs(15), 1000, &sleeper);
        assert!(detector.is_stable(&path));
        assert_eq!(*sleeper.waits.borrow(), vec![Duration::from_secs(15)]);
    }

    #[test]
    fn growing_file_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.geojson");
        std::fs::write(&path, vec![b' '; 2000]).unwrap();

        let grow = CallbackSleeper(|| {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&path)
                .unwrap();
            file.write_all(b"more").unwrap();
        });
        let detector = StabilityDetector::new(Duration::from_secs(15), 1000, grow);
        assert!(!detector.is_stable(&path));
    }

    #[test]
    fn small_file_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placeholder.geojson");
        std::fs::write(&path, b"").unwrap();

        let detector =
            StabilityDetector::new(Duration::ZERO, 1000, RecordingSleeper::default());
        assert!(!detector.is_stable(&path));

        // Exactly the threshold is enough
        std::fs::write(&path, vec![b' '; 1000]).unwrap();
        assert!(detector.is_stable(&path));
    }

    #[test]
    fn vanished_file_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tile.geojson");
        std::fs::write(&path, vec![b' '; 2000]).unwrap();

        let remove = CallbackSleeper(|| std::fs::remove_file(&path).unwrap());
        let detector = StabilityDetector::new(Duration::from_secs(15), 1000, remove);
        assert!(!detector.is_stable(&path));

        let detector =
            StabilityDetector::new(Duration::ZERO, 1000, RecordingSleeper::default());
        assert!(!detector.is_stable(&dir.path().join("never-existed.geojson")));
    }
}
