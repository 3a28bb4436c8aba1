use std::path::PathBuf;

use fit_math::FitError;
use thiserror::Error;
use viz::VizError;

use crate::calibrator::Axis;
use crate::event::{RunId, SensorId};
use crate::state::DriverState;

/// Errors produced by alignment calibration and the two-pass driver.
#[derive(Error, Debug)]
pub enum AlignError {
    /// State accessed before the required initialization or calibration.
    #[error("precondition violated: {0}")]
    Precondition(String),

    /// The fit backend returned no usable parameters.
    #[error("{axis} alignment fit failed: {source}")]
    FitConvergence {
        /// Axis whose distribution failed to fit.
        axis: Axis,
        /// Underlying fitter error.
        #[source]
        source: FitError,
    },

    /// A calibration file exists but does not hold five numbers.
    #[error("malformed calibration file {}: {reason}", .path.display())]
    CalibrationParse {
        /// File that failed to parse.
        path: PathBuf,
        /// What was wrong with it.
        reason: String,
    },

    /// The efficiency pass met a sensor without finalized cuts.
    #[error("no calibration available for sensor {sensor} in run {run}")]
    MissingCalibration {
        /// Run being analysed.
        run: RunId,
        /// Sensor without calibration.
        sensor: SensorId,
    },

    /// An error attributed to one sensor.
    #[error("sensor {sensor}: {source}")]
    Sensor {
        /// Sensor the error belongs to.
        sensor: SensorId,
        /// Underlying error.
        #[source]
        source: Box<AlignError>,
    },

    /// Distribution creation or rebinning failed.
    #[error("distribution error: {0}")]
    Distribution(#[from] VizError),

    /// File system failure.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Path being accessed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The event source could not be opened or produced a bad record.
    #[error("event stream error: {0}")]
    EventStream(String),

    /// Configuration validation failure.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The driver was stepped from a state with no outgoing transition.
    #[error("no transition out of state {0:?}")]
    InvalidTransition(DriverState),
}

impl AlignError {
    /// Attach a sensor id to an error.
    pub fn for_sensor(self, sensor: SensorId) -> Self {
        AlignError::Sensor {
            sensor,
            source: Box::new(self),
        }
    }

    /// Build an I/O error for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AlignError::Io {
            path: path.into(),
            source,
        }
    }
}
