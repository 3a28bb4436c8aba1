//! Storage of per-(run, sensor) calibration files.
//!
//! Calibrations live in a single directory as
//! `run<RRRRRR>_sensor<SS>.align`, each holding the five numbers written by
//! [`AlignmentCalibrator::persist`].

use std::path::{Path, PathBuf};

use crate::backend::DistributionBackend;
use crate::calibrator::AlignmentCalibrator;
use crate::error::AlignError;
use crate::event::{RunId, SensorId};

const EXTENSION: &str = "align";

/// Calibration file storage manager
#[derive(Debug, Clone)]
pub struct CalibrationStore {
    /// Directory holding the calibration files
    root_path: PathBuf,
}

impl CalibrationStore {
    /// Create a store rooted at `root_path`
    pub fn with_path(root_path: impl Into<PathBuf>) -> Self {
        Self {
            root_path: root_path.into(),
        }
    }

    /// Get the root path
    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    /// Path of the calibration file of `sensor` in `run`
    pub fn calibration_path(&self, run: RunId, sensor: SensorId) -> PathBuf {
        self.root_path
            .join(format!("run{run:06}_sensor{sensor:02}.{EXTENSION}"))
    }

    /// Persist a calibrated sensor.
    ///
    /// Creates the directory if it doesn't exist.
    /// Returns the path where the calibration was saved.
    pub fn save<B: DistributionBackend>(
        &self,
        run: RunId,
        sensor: SensorId,
        calibrator: &AlignmentCalibrator<B>,
    ) -> Result<PathBuf, AlignError> {
        std::fs::create_dir_all(&self.root_path)
            .map_err(|e| AlignError::io(&self.root_path, e))?;
        let path = self.calibration_path(run, sensor);
        calibrator.persist(&path)?;
        Ok(path)
    }

    /// Load the calibration of `sensor` in `run` into `calibrator`.
    ///
    /// Returns Ok(false) if no calibration file exists.
    pub fn load<B: DistributionBackend>(
        &self,
        run: RunId,
        sensor: SensorId,
        calibrator: &mut AlignmentCalibrator<B>,
    ) -> Result<bool, AlignError> {
        calibrator.load(&self.calibration_path(run, sensor))
    }

    /// List the sensors with a calibration file for `run`, in ascending order.
    pub fn list_sensors(&self, run: RunId) -> Result<Vec<SensorId>, AlignError> {
        if !self.root_path.exists() {
            return Ok(Vec::new());
        }

        let mut sensors = Vec::new();
        let entries =
            std::fs::read_dir(&self.root_path).map_err(|e| AlignError::io(&self.root_path, e))?;
        for entry in entries {
            let path = entry.map_err(|e| AlignError::io(&self.root_path, e))?.path();
            if path.extension().and_then(|s| s.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some((file_run, sensor)) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(parse_stem)
            {
                if file_run == run {
                    sensors.push(sensor);
                }
            }
        }

        sensors.sort_unstable();
        Ok(sensors)
    }

    /// Delete the calibration of `sensor` in `run`.
    ///
    /// Returns Ok(true) if the file was deleted, Ok(false) if it didn't exist.
    pub fn delete(&self, run: RunId, sensor: SensorId) -> Result<bool, AlignError> {
        let path = self.calibration_path(run, sensor);

        if !path.exists() {
            return Ok(false);
        }

        std::fs::remove_file(&path).map_err(|e| AlignError::io(&path, e))?;
        Ok(true)
    }
}

/// Split `run000012_sensor03` into its run and sensor numbers
fn parse_stem(stem: &str) -> Option<(RunId, SensorId)> {
    let (run, sensor) = stem.strip_prefix("run")?.split_once("_sensor")?;
    Some((run.parse().ok()?, sensor.parse().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibratorConfig;
    use tempfile::TempDir;

    fn loaded_calibrator(dir: &Path) -> AlignmentCalibrator {
        let path = dir.join("seed.align");
        std::fs::write(&path, "0.1 -0.2 0 0.05 0.5\n").unwrap();
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(cal.load(&path).unwrap());
        cal
    }

    #[test]
    fn test_file_naming() {
        let store = CalibrationStore::with_path("/tmp/align");
        assert_eq!(
            store.calibration_path(42, 3),
            PathBuf::from("/tmp/align/run000042_sensor03.align")
        );
        assert_eq!(
            store.calibration_path(123456, 12),
            PathBuf::from("/tmp/align/run123456_sensor12.align")
        );
    }

    #[test]
    fn test_parse_stem() {
        assert_eq!(parse_stem("run000042_sensor03"), Some((42, 3)));
        assert_eq!(parse_stem("run000042_sensor-1"), Some((42, -1)));
        assert_eq!(parse_stem("seed"), None);
        assert_eq!(parse_stem("run42"), None);
    }

    #[test]
    fn test_save_list_load_delete() {
        let dir = TempDir::new().unwrap();
        let store = CalibrationStore::with_path(dir.path().join("nested"));
        assert!(store.list_sensors(1).unwrap().is_empty());

        let cal = loaded_calibrator(dir.path());
        store.save(1, 4, &cal).unwrap();
        store.save(1, 2, &cal).unwrap();
        store.save(2, 7, &cal).unwrap();

        assert_eq!(store.list_sensors(1).unwrap(), vec![2, 4]);
        assert_eq!(store.list_sensors(2).unwrap(), vec![7]);

        let mut reloaded = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(store.load(1, 4, &mut reloaded).unwrap());
        assert_eq!(reloaded.calibration().unwrap(), cal.calibration().unwrap());

        assert!(store.delete(1, 4).unwrap());
        assert!(!store.delete(1, 4).unwrap());
        let mut missing = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(!store.load(1, 4, &mut missing).unwrap());
    }
}
