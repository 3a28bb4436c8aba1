use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AlignError;
use crate::event::{RunId, SensorId};

/// Binning of one residual distribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionSpec {
    /// Number of equal-width bins
    pub bins: usize,
    /// Lower edge of the range
    pub low: f64,
    /// Upper edge of the range
    pub high: f64,
}

impl DistributionSpec {
    fn validate(&self, axis: &str) -> Result<(), AlignError> {
        if self.bins == 0 {
            return Err(AlignError::InvalidConfig(format!(
                "{axis} distribution needs at least one bin"
            )));
        }
        if !(self.low < self.high) {
            return Err(AlignError::InvalidConfig(format!(
                "{axis} distribution range [{}, {}) is empty",
                self.low, self.high
            )));
        }
        Ok(())
    }
}

/// Fit window and rebinning threshold for one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisFitConfig {
    /// Sparse-statistics threshold: rebin when `entries * bin_ratio * 2 < bins`
    pub bin_ratio: f64,
    /// Half width of the fit window in units of the distribution RMS
    pub nrms: f64,
}

/// Calibrator binning, fitting and matching settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibratorConfig {
    /// Fine X residual binning
    pub x: DistributionSpec,
    /// Coarse Y residual binning
    pub y: DistributionSpec,
    /// Gaussian fit on X
    pub x_fit: AxisFitConfig,
    /// Plateau fit on Y
    pub y_fit: AxisFitConfig,
    /// Multiplier on the X cut applied when testing correlation
    pub n_sigma: f64,
}

impl Default for CalibratorConfig {
    fn default() -> Self {
        Self {
            x: DistributionSpec {
                bins: 1000,
                low: -5.0,
                high: 5.0,
            },
            y: DistributionSpec {
                bins: 250,
                low: -5.0,
                high: 5.0,
            },
            x_fit: AxisFitConfig {
                bin_ratio: 0.1,
                nrms: 1.0,
            },
            y_fit: AxisFitConfig {
                bin_ratio: 0.1,
                nrms: 3.0,
            },
            n_sigma: 1.0,
        }
    }
}

impl CalibratorConfig {
    /// Check binning and fit settings for consistency.
    pub fn validate(&self) -> Result<(), AlignError> {
        self.x.validate("X")?;
        self.y.validate("Y")?;
        for (axis, fit) in [("X", &self.x_fit), ("Y", &self.y_fit)] {
            if !(fit.bin_ratio > 0.0) {
                return Err(AlignError::InvalidConfig(format!(
                    "{axis} bin ratio must be positive"
                )));
            }
            if !(fit.nrms > 0.0) {
                return Err(AlignError::InvalidConfig(format!(
                    "{axis} fit window must be positive"
                )));
            }
        }
        if !(self.n_sigma > 0.0) {
            return Err(AlignError::InvalidConfig(
                "n_sigma must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Binning of the per-sensor efficiency map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EfficiencyConfig {
    /// Number of regions along X
    pub bins_x: usize,
    /// Number of regions along Y
    pub bins_y: usize,
    /// Sensor-frame X range covered by the map
    pub range_x: (f64, f64),
    /// Sensor-frame Y range covered by the map
    pub range_y: (f64, f64),
}

impl Default for EfficiencyConfig {
    fn default() -> Self {
        Self {
            bins_x: 16,
            bins_y: 16,
            range_x: (-8.0, 8.0),
            range_y: (-8.0, 8.0),
        }
    }
}

impl EfficiencyConfig {
    /// Check the map has cells and non-empty ranges.
    pub fn validate(&self) -> Result<(), AlignError> {
        if self.bins_x == 0 || self.bins_y == 0 {
            return Err(AlignError::InvalidConfig(
                "efficiency map needs at least one region per axis".to_string(),
            ));
        }
        if !(self.range_x.0 < self.range_x.1) || !(self.range_y.0 < self.range_y.1) {
            return Err(AlignError::InvalidConfig(
                "efficiency map ranges must be ascending".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration of the two-pass strip efficiency analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Runs to analyse, in order
    pub runs: Vec<RunId>,
    /// Sensors to pre-seed; empty means discover them from the data
    pub sensors: Vec<SensorId>,
    /// Always recompute the alignment even if a calibration file exists
    pub force_alignment: bool,
    /// Calibrator settings
    pub calibrator: CalibratorConfig,
    /// Efficiency map settings
    pub efficiency: EfficiencyConfig,
    /// Directory holding per-(run, sensor) calibration files
    pub calibration_dir: PathBuf,
    /// Directory receiving reports and diagnostics
    pub output_dir: PathBuf,
    /// Render distribution diagnostics after fitting
    pub write_diagnostics: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            runs: Vec::new(),
            sensors: Vec::new(),
            force_alignment: false,
            calibrator: CalibratorConfig::default(),
            efficiency: EfficiencyConfig::default(),
            calibration_dir: PathBuf::from("alignment"),
            output_dir: PathBuf::from("output"),
            write_diagnostics: true,
        }
    }
}

impl DriverConfig {
    /// Validate every nested section.
    pub fn validate(&self) -> Result<(), AlignError> {
        self.calibrator.validate()?;
        self.efficiency.validate()
    }

    /// Load from a JSON file
    pub fn load_from_file(path: &Path) -> Result<Self, AlignError> {
        let json = std::fs::read_to_string(path).map_err(|e| AlignError::io(path, e))?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| AlignError::InvalidConfig(format!("{}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a JSON file
    pub fn save_to_file(&self, path: &Path) -> Result<(), AlignError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AlignError::InvalidConfig(e.to_string()))?;
        std::fs::write(path, json).map_err(|e| AlignError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        DriverConfig::default().validate().unwrap();
        let cal = CalibratorConfig::default();
        assert_eq!(cal.x.bins, 1000);
        assert_eq!(cal.y.bins, 250);
        assert_eq!(cal.x_fit.bin_ratio, 0.1);
        assert_eq!(cal.n_sigma, 1.0);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut cal = CalibratorConfig::default();
        cal.n_sigma = 0.0;
        assert!(cal.validate().is_err());

        let mut cal = CalibratorConfig::default();
        cal.y.high = cal.y.low;
        assert!(cal.validate().is_err());

        let eff = EfficiencyConfig {
            bins_x: 0,
            ..EfficiencyConfig::default()
        };
        assert!(eff.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DriverConfig =
            serde_json::from_str(r#"{ "runs": [12, 13], "force_alignment": true }"#).unwrap();
        assert_eq!(config.runs, vec![12, 13]);
        assert!(config.force_alignment);
        assert_eq!(config.calibrator, CalibratorConfig::default());
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        let config = DriverConfig {
            runs: vec![7],
            sensors: vec![1, 2],
            ..DriverConfig::default()
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(DriverConfig::load_from_file(&path).unwrap(), config);
    }
}
