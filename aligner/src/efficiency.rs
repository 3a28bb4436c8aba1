//! Hit efficiency bookkeeping for one sensor.
//!
//! Every predicted track position is one trial; it passes if any observed
//! hit on the sensor is correlated with it. Trials are counted overall and
//! per cell of a regular grid over the sensor, so dead regions show up in
//! the map.

use fit_math::binomial_efficiency;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use viz::grid::{render_ratio_grid, RatioGridConfig};

use crate::config::EfficiencyConfig;
use crate::error::AlignError;
use crate::event::SensorId;

/// Efficiency counters of one sensor
#[derive(Debug, Clone)]
pub struct EfficiencyMap {
    sensor: SensorId,
    config: EfficiencyConfig,
    /// Trials per cell, row-major with row 0 at the lowest y
    total: Vec<u64>,
    /// Passed trials per cell
    passed: Vec<u64>,
    total_all: u64,
    passed_all: u64,
}

/// Efficiency of one map cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellEfficiency {
    pub ix: usize,
    pub iy: usize,
    pub passed: u64,
    pub total: u64,
    pub efficiency: f64,
    pub error: f64,
}

/// Serializable efficiency result of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EfficiencySummary {
    pub sensor: SensorId,
    /// Predicted positions seen
    pub total: u64,
    /// Predicted positions with a correlated hit
    pub passed: u64,
    /// passed / total, None without trials
    pub efficiency: Option<f64>,
    /// Binomial uncertainty on the efficiency
    pub error: Option<f64>,
    /// Trials falling outside the map
    pub outside_map: u64,
    /// Cells with at least one trial
    pub cells: Vec<CellEfficiency>,
}

impl EfficiencyMap {
    /// Create empty counters for `sensor`.
    pub fn new(sensor: SensorId, config: EfficiencyConfig) -> Result<Self, AlignError> {
        config.validate()?;
        let cells = config.bins_x * config.bins_y;
        Ok(Self {
            sensor,
            config,
            total: vec![0; cells],
            passed: vec![0; cells],
            total_all: 0,
            passed_all: 0,
        })
    }

    pub fn sensor(&self) -> SensorId {
        self.sensor
    }

    /// Record one trial at sensor-frame `position`.
    pub fn record(&mut self, position: &Vector2<f64>, passed: bool) {
        self.total_all += 1;
        if passed {
            self.passed_all += 1;
        }
        if let Some(idx) = self.cell_index(position) {
            self.total[idx] += 1;
            if passed {
                self.passed[idx] += 1;
            }
        }
    }

    /// Row-major cell containing `position`, None outside the map
    fn cell_index(&self, position: &Vector2<f64>) -> Option<usize> {
        let ix = axis_bin(position.x, self.config.range_x, self.config.bins_x)?;
        let iy = axis_bin(position.y, self.config.range_y, self.config.bins_y)?;
        Some(iy * self.config.bins_x + ix)
    }

    /// Total number of trials
    pub fn total(&self) -> u64 {
        self.total_all
    }

    /// Number of passed trials
    pub fn passed(&self) -> u64 {
        self.passed_all
    }

    /// Overall efficiency and its binomial error
    pub fn efficiency(&self) -> Option<(f64, f64)> {
        binomial_efficiency(self.passed_all, self.total_all)
    }

    /// Efficiency of cell `(ix, iy)`, None if it saw no trials
    pub fn cell_efficiency(&self, ix: usize, iy: usize) -> Option<(f64, f64)> {
        if ix >= self.config.bins_x || iy >= self.config.bins_y {
            return None;
        }
        let idx = iy * self.config.bins_x + ix;
        binomial_efficiency(self.passed[idx], self.total[idx])
    }

    /// Serializable snapshot of the counters
    pub fn summary(&self) -> EfficiencySummary {
        let in_map: u64 = self.total.iter().sum();
        let mut cells = Vec::new();
        for iy in 0..self.config.bins_y {
            for ix in 0..self.config.bins_x {
                let idx = iy * self.config.bins_x + ix;
                if let Some((efficiency, error)) =
                    binomial_efficiency(self.passed[idx], self.total[idx])
                {
                    cells.push(CellEfficiency {
                        ix,
                        iy,
                        passed: self.passed[idx],
                        total: self.total[idx],
                        efficiency,
                        error,
                    });
                }
            }
        }

        let overall = self.efficiency();
        EfficiencySummary {
            sensor: self.sensor,
            total: self.total_all,
            passed: self.passed_all,
            efficiency: overall.map(|(e, _)| e),
            error: overall.map(|(_, s)| s),
            outside_map: self.total_all - in_map,
            cells,
        }
    }

    /// Character map of the per-cell efficiency
    pub fn render_ascii(&self) -> Result<String, AlignError> {
        let cells: Vec<Option<f64>> = self
            .total
            .iter()
            .zip(&self.passed)
            .map(|(&t, &p)| binomial_efficiency(p, t).map(|(e, _)| e))
            .collect();
        let title = format!("Sensor {} efficiency", self.sensor);
        let label = format!(
            "x [{}, {}) y [{}, {})",
            self.config.range_x.0, self.config.range_x.1, self.config.range_y.0, self.config.range_y.1
        );
        let config = RatioGridConfig {
            title: Some(&title),
            x_label: Some(&label),
            ..RatioGridConfig::default()
        };
        Ok(render_ratio_grid(
            &cells,
            self.config.bins_x,
            self.config.bins_y,
            &config,
        )?)
    }
}

fn axis_bin(value: f64, (low, high): (f64, f64), bins: usize) -> Option<usize> {
    if !(value >= low && value < high) {
        return None;
    }
    let idx = ((value - low) / (high - low) * bins as f64) as usize;
    Some(idx.min(bins - 1))
}
