use std::sync::Arc;

use crate::calibrator::{Calibration, FitSummary};
use crate::event::{RunId, SensorId};
use crate::state::{CalibrationSource, DriverState, Pass};

/// Events emitted for external callbacks
#[derive(Debug, Clone)]
pub enum DriverCallbackEvent {
    /// The driver moved to a new state
    StateChanged {
        run: RunId,
        from: DriverState,
        to: DriverState,
    },
    /// A sensor has its final offset and cuts
    SensorCalibrated {
        run: RunId,
        sensor: SensorId,
        calibration: Calibration,
        source: CalibrationSource,
        /// Fit details, None for loaded calibrations
        fit: Option<FitSummary>,
    },
    /// A full pass over the run's events completed
    PassFinished {
        run: RunId,
        pass: Pass,
        events: u64,
    },
}

/// Callback ID for registration/deregistration
pub type CallbackId = u64;

/// Callback function type
pub type DriverCallback = Arc<dyn Fn(&DriverCallbackEvent) + Send + Sync>;
