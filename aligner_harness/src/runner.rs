//! Runner for analysing runs and writing their outputs
//!
//! Steps a [`StripEfficiency`] driver per run and writes, under the
//! configured output directory:
//! - `diagnostics/run<R>_sensor<S>.{svg,json,txt}` after a fitted alignment
//! - `run<R>_report.json` with calibrations and efficiencies
//! - `run<R>_sensor<S>_efficiency.txt` with the ASCII efficiency map

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use aligner::{
    AlignError, CalibrationSource, DriverCallbackEvent, DriverConfig, DriverState, EventSource,
    RunReport, StripEfficiency,
};

use crate::alignment_plots::AlignmentPlotter;
use crate::HarnessError;

/// Results of a batch analysis
#[derive(Debug, Clone)]
pub struct AnalysisOutput {
    /// One report per run, in configuration order
    pub reports: Vec<RunReport>,
    /// Every file written
    pub files: Vec<PathBuf>,
    /// All events emitted by the drivers
    pub events: Vec<DriverCallbackEvent>,
}

/// Analyse every configured run and write reports and diagnostics
///
/// # Arguments
/// * `config` - Driver settings shared by all runs
/// * `source` - Event source, opened twice per fitted run
///
/// # Returns
/// * `AnalysisOutput` with the reports and the paths written
pub fn run_analysis<S: EventSource + ?Sized>(
    config: &DriverConfig,
    source: &mut S,
) -> Result<AnalysisOutput, HarnessError> {
    if config.runs.is_empty() {
        return Err(AlignError::InvalidConfig("no runs to analyse".to_string()).into());
    }
    let output_dir = config.output_dir.as_path();
    fs::create_dir_all(output_dir).map_err(|e| HarnessError::io(output_dir, e))?;

    let plotter = AlignmentPlotter::new();
    let events = Arc::new(Mutex::new(Vec::new()));
    let mut output = AnalysisOutput {
        reports: Vec::with_capacity(config.runs.len()),
        files: Vec::new(),
        events: Vec::new(),
    };

    for &run in &config.runs {
        let mut driver = StripEfficiency::new(run, config.clone())?;

        let events_clone = events.clone();
        let callback_id = driver.register_callback(move |event| {
            if let Ok(mut events) = events_clone.lock() {
                events.push(event.clone());
            }
        });

        while driver.state() != &DriverState::Finished {
            let state = driver.step(source)?;
            let fitted = matches!(
                state,
                DriverState::Calibrated {
                    source: CalibrationSource::Fitted
                }
            );
            if fitted && config.write_diagnostics {
                let dir = output_dir.join("diagnostics");
                for (sensor, calibrator) in driver.calibrators() {
                    let stem = format!("run{run:06}_sensor{sensor:02}");
                    output
                        .files
                        .extend(plotter.write_diagnostics(calibrator, &dir, &stem)?);
                }
            }
        }

        let report = driver.report()?;
        output.files.push(write_report(output_dir, &report)?);
        for (sensor, map) in driver.efficiency_maps() {
            let path = output_dir.join(format!("run{run:06}_sensor{sensor:02}_efficiency.txt"));
            fs::write(&path, map.render_ascii()?).map_err(|e| HarnessError::io(&path, e))?;
            output.files.push(path);
        }
        log::info!(
            "Run {run} finished: {} sensors, calibration {:?}",
            report.sensors.len(),
            report.calibration_source
        );
        output.reports.push(report);

        driver.deregister_callback(callback_id);
    }

    output.events = events
        .lock()
        .map(|mut events| std::mem::take(&mut *events))
        .unwrap_or_default();
    Ok(output)
}

fn write_report(dir: &Path, report: &RunReport) -> Result<PathBuf, HarnessError> {
    let path = dir.join(format!("run{:06}_report.json", report.run));
    let json = serde_json::to_string_pretty(report)?;
    fs::write(&path, json).map_err(|e| HarnessError::io(&path, e))?;
    Ok(path)
}
