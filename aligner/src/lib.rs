//! Strip sensor alignment calibration and hit efficiency.
//!
//! Aligns strip sensors against a tracking telescope by fitting the
//! residuals between predicted track positions and observed hits, then
//! measures each sensor's hit efficiency with the resulting cuts.
//! Runs through states: Idle -> AlignmentPass -> Calibrated -> EfficiencyPass -> Finished

pub mod backend;
pub mod callback;
pub mod calibrator;
pub mod config;
pub mod driver;
pub mod efficiency;
pub mod error;
pub mod event;
pub mod state;
pub mod store;

// Re-export commonly used types for external use
pub use crate::backend::{Distribution, DistributionBackend, HistogramBackend};
pub use crate::callback::DriverCallbackEvent;
pub use crate::calibrator::{AlignmentCalibrator, Axis, AxisFit, Calibration, FitSummary};
pub use crate::config::{
    AxisFitConfig, CalibratorConfig, DistributionSpec, DriverConfig, EfficiencyConfig,
};
pub use crate::driver::{CalibratorMap, RunReport, SensorReport, StripEfficiency};
pub use crate::efficiency::{EfficiencyMap, EfficiencySummary};
pub use crate::error::AlignError;
pub use crate::event::{
    EventPair, EventSource, EventStream, MemoryEventSource, RunId, SensorFrame, SensorId,
};
pub use crate::state::{CalibrationSource, DriverState, Pass};
pub use crate::store::CalibrationStore;

/// Analyse every configured run in order.
///
/// Each run gets its own driver, so calibrations never leak between runs.
/// The first failing run aborts the analysis.
pub fn analyze_runs<S: EventSource + ?Sized>(
    config: &DriverConfig,
    source: &mut S,
) -> Result<Vec<RunReport>, AlignError> {
    if config.runs.is_empty() {
        return Err(AlignError::InvalidConfig("no runs to analyse".to_string()));
    }

    let mut reports = Vec::with_capacity(config.runs.len());
    for &run in &config.runs {
        let mut driver = StripEfficiency::new(run, config.clone())?;
        reports.push(driver.process(source)?);
    }
    Ok(reports)
}
