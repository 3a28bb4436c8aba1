//! Two-pass strip efficiency analysis of one run.
//!
//! The first pass accumulates predicted-minus-observed residuals per sensor
//! and fits the alignment, unless persisted calibrations can be loaded. The
//! second pass re-reads the run and counts, per sensor, how many predicted
//! track positions have a correlated hit once the offset is removed.
//!
//! The driver is a small state machine stepped with
//! [`StripEfficiency::step`]; [`StripEfficiency::process`] runs it to the
//! end and returns a [`RunReport`].

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backend::{DistributionBackend, HistogramBackend};
use crate::callback::{CallbackId, DriverCallback, DriverCallbackEvent};
use crate::calibrator::{AlignmentCalibrator, Calibration, FitSummary};
use crate::config::{CalibratorConfig, DriverConfig, EfficiencyConfig};
use crate::efficiency::{EfficiencyMap, EfficiencySummary};
use crate::error::AlignError;
use crate::event::{EventPair, EventSource, RunId, SensorId};
use crate::state::{CalibrationSource, DriverState, Pass};
use crate::store::CalibrationStore;

/// Calibrators of a run, keyed by sensor
pub type CalibratorMap<B = HistogramBackend> = BTreeMap<SensorId, AlignmentCalibrator<B>>;

/// Efficiency counters of a run, keyed by sensor
pub type EfficiencyMaps = BTreeMap<SensorId, EfficiencyMap>;

/// Names of the X and Y residual distributions of `sensor` in `run`
pub fn distribution_names(run: RunId, sensor: SensorId) -> (String, String) {
    (
        format!("align_x_run{run:06}_sensor{sensor:02}"),
        format!("align_y_run{run:06}_sensor{sensor:02}"),
    )
}

fn new_calibrator<B: DistributionBackend + Clone>(
    run: RunId,
    sensor: SensorId,
    backend: &B,
    config: &CalibratorConfig,
) -> Result<AlignmentCalibrator<B>, AlignError> {
    let mut calibrator = AlignmentCalibrator::with_backend(backend.clone(), config.clone());
    let (name_x, name_y) = distribution_names(run, sensor);
    calibrator
        .init_distributions(&name_x, &name_y)
        .map_err(|e| e.for_sensor(sensor))?;
    Ok(calibrator)
}

/// Fill the residuals of one event into the calibrators.
///
/// Every predicted position is paired with every observed hit on the same
/// sensor. Sensors seen for the first time get a fresh calibrator. Returns
/// the number of residual pairs recorded.
pub fn fill_residuals<B: DistributionBackend + Clone>(
    event: &EventPair,
    run: RunId,
    calibrators: &mut CalibratorMap<B>,
    backend: &B,
    config: &CalibratorConfig,
) -> Result<u64, AlignError> {
    let mut fills = 0;
    for (&sensor, frame) in &event.sensors {
        if frame.predicted.is_empty() || frame.observed.is_empty() {
            continue;
        }
        let calibrator = match calibrators.entry(sensor) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                log::debug!("Run {run}: new sensor {sensor} in event {}", event.event);
                entry.insert(new_calibrator(run, sensor, backend, config)?)
            }
        };
        for predicted in &frame.predicted {
            for observed in &frame.observed {
                let residual = predicted - observed;
                calibrator
                    .fill(residual.x, residual.y)
                    .map_err(|e| e.for_sensor(sensor))?;
                fills += 1;
            }
        }
    }
    Ok(fills)
}

/// Count the efficiency trials of one event.
///
/// Each predicted position is shifted by the sensor offset and passes if any
/// observed hit on the sensor is correlated with it. A sensor with
/// predictions but no calibrator is an error.
pub fn count_efficiency<B: DistributionBackend>(
    event: &EventPair,
    run: RunId,
    calibrators: &CalibratorMap<B>,
    maps: &mut EfficiencyMaps,
    config: &EfficiencyConfig,
) -> Result<(), AlignError> {
    for (&sensor, frame) in &event.sensors {
        if frame.predicted.is_empty() {
            continue;
        }
        let calibrator = calibrators
            .get(&sensor)
            .ok_or(AlignError::MissingCalibration { run, sensor })?;
        let offset = calibrator
            .offset()
            .map_err(|e| e.for_sensor(sensor))?
            .xy();
        let map = match maps.entry(sensor) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(EfficiencyMap::new(sensor, config.clone())?),
        };

        for predicted in &frame.predicted {
            let corrected = predicted - offset;
            let mut passed = false;
            for observed in &frame.observed {
                if calibrator.is_correlated(&corrected, observed)? {
                    passed = true;
                    break;
                }
            }
            map.record(&corrected, passed);
        }
    }
    Ok(())
}

/// Final result of one sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReport {
    pub sensor: SensorId,
    pub calibration: Calibration,
    /// Fit details, None for loaded calibrations
    pub fit: Option<FitSummary>,
    /// None until the efficiency pass ran
    pub efficiency: Option<EfficiencySummary>,
}

/// Final result of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run: RunId,
    pub calibration_source: CalibrationSource,
    /// Events read by the alignment pass, 0 when calibrations were loaded
    pub alignment_events: u64,
    /// Events read by the efficiency pass
    pub efficiency_events: u64,
    pub sensors: Vec<SensorReport>,
}

/// Two-pass strip efficiency driver for one run
pub struct StripEfficiency<B: DistributionBackend = HistogramBackend> {
    run: RunId,
    config: DriverConfig,
    backend: B,
    store: CalibrationStore,
    state: DriverState,
    calibration_source: Option<CalibrationSource>,
    calibrators: CalibratorMap<B>,
    efficiency: EfficiencyMaps,
    alignment_events: u64,
    efficiency_events: u64,
    /// Registered callbacks
    callbacks: HashMap<CallbackId, DriverCallback>,
    /// Next callback ID
    next_callback_id: CallbackId,
}

impl StripEfficiency<HistogramBackend> {
    /// Create a driver for `run` with the default histogram backend
    pub fn new(run: RunId, config: DriverConfig) -> Result<Self, AlignError> {
        Self::with_backend(run, config, HistogramBackend::default())
    }
}

impl<B: DistributionBackend + Clone> StripEfficiency<B> {
    /// Create a driver for `run` on a custom distribution backend
    pub fn with_backend(run: RunId, config: DriverConfig, backend: B) -> Result<Self, AlignError> {
        config.validate()?;
        let store = CalibrationStore::with_path(config.calibration_dir.clone());
        Ok(Self {
            run,
            config,
            backend,
            store,
            state: DriverState::Idle,
            calibration_source: None,
            calibrators: CalibratorMap::new(),
            efficiency: EfficiencyMaps::new(),
            alignment_events: 0,
            efficiency_events: 0,
            callbacks: HashMap::new(),
            next_callback_id: 0,
        })
    }

    /// Register a callback for driver events
    pub fn register_callback<F>(&mut self, callback: F) -> CallbackId
    where
        F: Fn(&DriverCallbackEvent) + Send + Sync + 'static,
    {
        let callback_id = self.next_callback_id;
        self.next_callback_id += 1;
        self.callbacks.insert(callback_id, Arc::new(callback));
        callback_id
    }

    /// Deregister a callback
    pub fn deregister_callback(&mut self, callback_id: CallbackId) -> bool {
        self.callbacks.remove(&callback_id).is_some()
    }

    /// Get the number of registered callbacks
    pub fn callback_count(&self) -> usize {
        self.callbacks.len()
    }

    fn emit_event(&self, event: &DriverCallbackEvent) {
        for callback in self.callbacks.values() {
            callback(event);
        }
    }

    /// Run being analysed
    pub fn run(&self) -> RunId {
        self.run
    }

    /// Get current state
    pub fn state(&self) -> &DriverState {
        &self.state
    }

    /// Where the current calibrations came from, once calibrated
    pub fn calibration_source(&self) -> Option<CalibrationSource> {
        self.calibration_source
    }

    /// Calibrators of the run
    pub fn calibrators(&self) -> &CalibratorMap<B> {
        &self.calibrators
    }

    /// Efficiency counters of the run
    pub fn efficiency_maps(&self) -> &EfficiencyMaps {
        &self.efficiency
    }

    /// Calibration store used for loading and persisting
    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Perform the work of the current state and move to the next one.
    ///
    /// `Idle -> AlignmentPass -> Calibrated -> EfficiencyPass -> Finished`.
    /// Stepping a finished driver is an error.
    pub fn step<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<&DriverState, AlignError> {
        let next = match self.state {
            DriverState::Idle => {
                log::info!("Run {}: entering alignment pass", self.run);
                DriverState::AlignmentPass
            }
            DriverState::AlignmentPass => {
                let origin = self.handle_alignment_pass(source)?;
                DriverState::Calibrated { source: origin }
            }
            DriverState::Calibrated { .. } => {
                self.check_calibrated()?;
                log::info!("Run {}: entering efficiency pass", self.run);
                DriverState::EfficiencyPass
            }
            DriverState::EfficiencyPass => {
                self.handle_efficiency_pass(source)?;
                DriverState::Finished
            }
            DriverState::Finished => {
                log::warn!("Invalid state transition");
                return Err(AlignError::InvalidTransition(self.state.clone()));
            }
        };

        let from = std::mem::replace(&mut self.state, next);
        self.emit_event(&DriverCallbackEvent::StateChanged {
            run: self.run,
            from,
            to: self.state.clone(),
        });
        Ok(&self.state)
    }

    /// Step until finished and return the run report.
    pub fn process<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<RunReport, AlignError> {
        while self.state != DriverState::Finished {
            self.step(source)?;
        }
        self.report()
    }

    fn handle_alignment_pass<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<CalibrationSource, AlignError> {
        let run = self.run;

        if self.config.force_alignment {
            log::info!("Run {run}: alignment forced, ignoring persisted calibrations");
        } else if self.load_persisted()? {
            log::info!(
                "Run {run}: loaded calibrations for {} sensors, skipping alignment pass",
                self.calibrators.len()
            );
            self.calibration_source = Some(CalibrationSource::Loaded);
            self.emit_calibrated(CalibrationSource::Loaded)?;
            return Ok(CalibrationSource::Loaded);
        }

        self.calibrators.clear();
        for &sensor in &self.config.sensors {
            let calibrator = new_calibrator(run, sensor, &self.backend, &self.config.calibrator)?;
            self.calibrators.insert(sensor, calibrator);
        }

        let mut events = 0u64;
        let mut fills = 0u64;
        for event in source.open(run)? {
            let event = event?;
            fills += fill_residuals(
                &event,
                run,
                &mut self.calibrators,
                &self.backend,
                &self.config.calibrator,
            )?;
            events += 1;
        }
        self.alignment_events = events;
        log::info!(
            "Run {run}: alignment pass read {events} events, {fills} residuals on {} sensors",
            self.calibrators.len()
        );
        self.emit_event(&DriverCallbackEvent::PassFinished {
            run,
            pass: Pass::Alignment,
            events,
        });

        self.calibrators.retain(|sensor, calibrator| {
            let has_samples = calibrator.sample_count() > 0;
            if !has_samples {
                log::warn!("Run {run}: sensor {sensor} received no residuals, not calibrated");
            }
            has_samples
        });
        if self.calibrators.is_empty() {
            log::warn!("Run {run}: no sensor received residuals");
        }

        for (&sensor, calibrator) in self.calibrators.iter_mut() {
            calibrator
                .calculate_alignment()
                .map_err(|e| e.for_sensor(sensor))?;
            self.store
                .save(run, sensor, calibrator)
                .map_err(|e| e.for_sensor(sensor))?;
        }

        self.calibration_source = Some(CalibrationSource::Fitted);
        self.emit_calibrated(CalibrationSource::Fitted)?;
        Ok(CalibrationSource::Fitted)
    }

    /// Load persisted calibrations for the configured or stored sensors.
    ///
    /// Returns Ok(false), leaving the calibrators untouched, unless every
    /// sensor could be loaded.
    fn load_persisted(&mut self) -> Result<bool, AlignError> {
        let sensors = if self.config.sensors.is_empty() {
            self.store.list_sensors(self.run)?
        } else {
            self.config.sensors.clone()
        };
        if sensors.is_empty() {
            log::info!("Run {}: no persisted calibrations", self.run);
            return Ok(false);
        }

        let mut loaded = CalibratorMap::new();
        for sensor in sensors {
            let mut calibrator =
                AlignmentCalibrator::with_backend(self.backend.clone(), self.config.calibrator.clone());
            if !self
                .store
                .load(self.run, sensor, &mut calibrator)
                .map_err(|e| e.for_sensor(sensor))?
            {
                log::info!(
                    "Run {}: sensor {sensor} has no persisted calibration, recomputing alignment",
                    self.run
                );
                return Ok(false);
            }
            loaded.insert(sensor, calibrator);
        }

        self.calibrators = loaded;
        Ok(true)
    }

    fn emit_calibrated(&self, source: CalibrationSource) -> Result<(), AlignError> {
        for (&sensor, calibrator) in &self.calibrators {
            self.emit_event(&DriverCallbackEvent::SensorCalibrated {
                run: self.run,
                sensor,
                calibration: calibrator.calibration().map_err(|e| e.for_sensor(sensor))?,
                source,
                fit: calibrator.fit_summary().cloned(),
            });
        }
        Ok(())
    }

    fn check_calibrated(&self) -> Result<(), AlignError> {
        match self
            .calibrators
            .iter()
            .find(|(_, calibrator)| !calibrator.is_calculated())
        {
            Some((&sensor, _)) => Err(AlignError::MissingCalibration {
                run: self.run,
                sensor,
            }),
            None => Ok(()),
        }
    }

    fn handle_efficiency_pass<S: EventSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<(), AlignError> {
        let run = self.run;

        self.efficiency.clear();
        for &sensor in self.calibrators.keys() {
            self.efficiency
                .insert(sensor, EfficiencyMap::new(sensor, self.config.efficiency.clone())?);
        }

        let mut events = 0u64;
        for event in source.open(run)? {
            let event = event?;
            count_efficiency(
                &event,
                run,
                &self.calibrators,
                &mut self.efficiency,
                &self.config.efficiency,
            )?;
            events += 1;
        }
        self.efficiency_events = events;
        self.emit_event(&DriverCallbackEvent::PassFinished {
            run,
            pass: Pass::Efficiency,
            events,
        });

        for (sensor, map) in &self.efficiency {
            match map.efficiency() {
                Some((efficiency, error)) => log::info!(
                    "Run {run}: sensor {sensor} efficiency {:.4} +/- {:.4} ({}/{})",
                    efficiency,
                    error,
                    map.passed(),
                    map.total()
                ),
                None => log::warn!("Run {run}: sensor {sensor} saw no predicted tracks"),
            }
        }
        Ok(())
    }

    /// Summary of calibrations and, once counted, efficiencies.
    pub fn report(&self) -> Result<RunReport, AlignError> {
        let calibration_source = self
            .calibration_source
            .filter(|_| self.state.is_calibrated())
            .ok_or_else(|| {
                AlignError::Precondition(format!("run {} is not calibrated yet", self.run))
            })?;

        let mut sensors = Vec::with_capacity(self.calibrators.len());
        for (&sensor, calibrator) in &self.calibrators {
            sensors.push(SensorReport {
                sensor,
                calibration: calibrator.calibration().map_err(|e| e.for_sensor(sensor))?,
                fit: calibrator.fit_summary().cloned(),
                efficiency: self.efficiency.get(&sensor).map(EfficiencyMap::summary),
            });
        }

        Ok(RunReport {
            run: self.run,
            calibration_source,
            alignment_events: self.alignment_events,
            efficiency_events: self.efficiency_events,
            sensors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MemoryEventSource;
    use nalgebra::{Vector2, Vector3};
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn loaded(offset: [f64; 2], cuts: [f64; 2]) -> AlignmentCalibrator {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("c.align");
        let calibration = Calibration {
            offset: Vector3::new(offset[0], offset[1], 0.0),
            cuts: Vector2::new(cuts[0], cuts[1]),
        };
        std::fs::write(&path, calibration.to_text()).unwrap();
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(cal.load(&path).unwrap());
        cal
    }

    #[test]
    fn test_distribution_names() {
        let (x, y) = distribution_names(12, 3);
        assert_eq!(x, "align_x_run000012_sensor03");
        assert_eq!(y, "align_y_run000012_sensor03");
    }

    #[test]
    fn test_fill_residuals_cross_product() {
        let event = EventPair::new(0)
            .with_prediction(1, Vector2::new(0.0, 0.0))
            .with_prediction(1, Vector2::new(1.0, 1.0))
            .with_hit(1, Vector2::new(0.1, 0.1))
            .with_hit(1, Vector2::new(0.9, 0.9))
            .with_hit(1, Vector2::new(0.5, 0.5))
            .with_prediction(2, Vector2::new(0.0, 0.0))
            .with_hit(3, Vector2::new(0.0, 0.0));

        let mut calibrators = CalibratorMap::new();
        let fills = fill_residuals(
            &event,
            1,
            &mut calibrators,
            &HistogramBackend::default(),
            &CalibratorConfig::default(),
        )
        .unwrap();

        assert_eq!(fills, 6);
        // Sensors without both predictions and hits are not created
        assert_eq!(calibrators.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(calibrators[&1].sample_count(), 6);
    }

    #[test]
    fn test_count_efficiency_applies_offset() {
        let mut calibrators = CalibratorMap::new();
        calibrators.insert(1, loaded([0.5, -0.5], [0.1, 0.2]));

        let event = EventPair::new(0)
            // Matches once the offset is removed
            .with_prediction(1, Vector2::new(2.5, 1.5))
            .with_hit(1, Vector2::new(2.0, 2.0))
            // Would match without the offset, does not with it
            .with_prediction(1, Vector2::new(5.0, 5.0))
            .with_hit(1, Vector2::new(5.0, 5.0));

        let mut maps = EfficiencyMaps::new();
        count_efficiency(&event, 1, &calibrators, &mut maps, &EfficiencyConfig::default())
            .unwrap();
        assert_eq!(maps[&1].total(), 2);
        assert_eq!(maps[&1].passed(), 1);
    }

    #[test]
    fn test_count_efficiency_without_hits_counts_failures() {
        let mut calibrators = CalibratorMap::new();
        calibrators.insert(4, loaded([0.0, 0.0], [0.1, 0.2]));
        let event = EventPair::new(0).with_prediction(4, Vector2::new(1.0, 1.0));

        let mut maps = EfficiencyMaps::new();
        count_efficiency(&event, 1, &calibrators, &mut maps, &EfficiencyConfig::default())
            .unwrap();
        assert_eq!(maps[&4].total(), 1);
        assert_eq!(maps[&4].passed(), 0);
    }

    #[test]
    fn test_count_efficiency_missing_calibration() {
        let calibrators: CalibratorMap = CalibratorMap::new();
        let event = EventPair::new(0).with_prediction(9, Vector2::new(1.0, 1.0));
        let mut maps = EfficiencyMaps::new();
        let err = count_efficiency(&event, 3, &calibrators, &mut maps, &EfficiencyConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            AlignError::MissingCalibration { run: 3, sensor: 9 }
        ));
    }

    #[test]
    fn test_callbacks_and_finished_state() {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = TempDir::new().unwrap();
        let config = DriverConfig {
            calibration_dir: dir.path().to_path_buf(),
            ..DriverConfig::default()
        };
        std::fs::write(
            dir.path().join("run000002_sensor05.align"),
            "0 0 0 0.1 0.5\n",
        )
        .unwrap();

        let events = vec![EventPair::new(0)
            .with_prediction(5, Vector2::new(0.0, 0.0))
            .with_hit(5, Vector2::new(0.01, 0.2))];
        let mut source = MemoryEventSource::new().with_run(2, events);

        let mut driver = StripEfficiency::new(2, config).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        let id = driver.register_callback(move |event| {
            seen_clone.lock().unwrap().push(event.clone());
        });
        assert_eq!(driver.callback_count(), 1);

        let report = driver.process(&mut source).unwrap();
        assert_eq!(report.calibration_source, CalibrationSource::Loaded);
        assert_eq!(report.alignment_events, 0);
        assert_eq!(report.efficiency_events, 1);
        let efficiency = report.sensors[0].efficiency.as_ref().unwrap();
        assert_eq!(efficiency.passed, 1);

        let seen = seen.lock().unwrap();
        let transitions = seen
            .iter()
            .filter(|e| matches!(e, DriverCallbackEvent::StateChanged { .. }))
            .count();
        assert_eq!(transitions, 4);
        assert!(seen.iter().any(|e| matches!(
            e,
            DriverCallbackEvent::SensorCalibrated {
                sensor: 5,
                source: CalibrationSource::Loaded,
                fit: None,
                ..
            }
        )));

        assert!(matches!(
            driver.step(&mut source),
            Err(AlignError::InvalidTransition(DriverState::Finished))
        ));
        assert!(driver.deregister_callback(id));
        assert!(!driver.deregister_callback(id));
    }
}
