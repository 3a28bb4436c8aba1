//! Synthetic telescope/sensor events with known alignment
//!
//! Tracks are spread uniformly over a square area. Each sensor sees the
//! hit of a track with a configurable probability, displaced from the
//! prediction by a Gaussian residual in X and a flat residual in Y around
//! the sensor's true offset. Noise hits are added uniformly.

use aligner::{AlignError, EventPair, EventSource, EventStream, RunId, SensorId};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal, Poisson, Uniform};
use serde::{Deserialize, Serialize};

/// Truth parameters of one simulated sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyntheticSensor {
    pub sensor: SensorId,
    /// True offset (x, y) of the sensor
    pub offset: (f64, f64),
    /// Width of the X residual Gaussian
    pub sigma_x: f64,
    /// Half width of the flat Y residual
    pub half_width_y: f64,
    /// Probability that a track leaves a hit
    pub efficiency: f64,
}

impl SyntheticSensor {
    /// Sensor with typical strip resolution and the given truth
    pub fn new(sensor: SensorId, offset: (f64, f64), efficiency: f64) -> Self {
        Self {
            sensor,
            offset,
            sigma_x: 0.05,
            half_width_y: 0.3,
            efficiency,
        }
    }
}

/// Synthetic run generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    /// Events per run
    pub events: usize,
    /// Simulated sensors
    pub sensors: Vec<SyntheticSensor>,
    /// Tracks are predicted over [-half_size, half_size) on both axes
    pub half_size: f64,
    /// Predicted tracks per sensor and event
    pub tracks_per_event: usize,
    /// Mean number of noise hits per sensor and event
    pub noise_hits: f64,
    /// Base RNG seed; the run number is mixed in
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            events: 10_000,
            sensors: vec![
                SyntheticSensor::new(0, (0.2, -0.1), 0.98),
                SyntheticSensor::new(1, (-0.15, 0.3), 0.95),
            ],
            half_size: 4.0,
            tracks_per_event: 1,
            noise_hits: 0.02,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    fn validate(&self) -> Result<(), AlignError> {
        if !(self.half_size > 0.0) {
            return Err(AlignError::InvalidConfig(
                "synthetic area must have a positive size".to_string(),
            ));
        }
        if !(self.noise_hits >= 0.0) {
            return Err(AlignError::InvalidConfig(
                "noise hit rate must be non-negative".to_string(),
            ));
        }
        for s in &self.sensors {
            if !(s.sigma_x > 0.0) || !(s.half_width_y > 0.0) {
                return Err(AlignError::InvalidConfig(format!(
                    "sensor {} needs positive residual widths",
                    s.sensor
                )));
            }
            if !(0.0..=1.0).contains(&s.efficiency) {
                return Err(AlignError::InvalidConfig(format!(
                    "sensor {} efficiency {} outside [0, 1]",
                    s.sensor, s.efficiency
                )));
            }
        }
        Ok(())
    }
}

/// Generate every event of `run`.
///
/// The same configuration and run always give the same events.
pub fn generate_run(config: &SyntheticConfig, run: RunId) -> Result<Vec<EventPair>, AlignError> {
    config.validate()?;
    let invalid = |e: &dyn std::fmt::Display| AlignError::InvalidConfig(e.to_string());

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(u64::from(run)));
    let area = Uniform::new(-config.half_size, config.half_size);
    let noise = if config.noise_hits > 0.0 {
        Some(Poisson::new(config.noise_hits).map_err(|e| invalid(&e))?)
    } else {
        None
    };
    let residuals = config
        .sensors
        .iter()
        .map(|s| {
            let x = Normal::new(s.offset.0, s.sigma_x).map_err(|e| invalid(&e))?;
            let y = Uniform::new(s.offset.1 - s.half_width_y, s.offset.1 + s.half_width_y);
            Ok::<_, AlignError>((x, y))
        })
        .collect::<Result<Vec<_>, AlignError>>()?;

    let mut events = Vec::with_capacity(config.events);
    for n in 0..config.events {
        let mut event = EventPair::new(n as u64);
        for (truth, (res_x, res_y)) in config.sensors.iter().zip(&residuals) {
            for _ in 0..config.tracks_per_event {
                let predicted = Vector2::new(area.sample(&mut rng), area.sample(&mut rng));
                event = event.with_prediction(truth.sensor, predicted);
                if rng.gen::<f64>() < truth.efficiency {
                    let residual = Vector2::new(res_x.sample(&mut rng), res_y.sample(&mut rng));
                    event = event.with_hit(truth.sensor, predicted - residual);
                }
            }
            if let Some(noise) = &noise {
                let count = noise.sample(&mut rng) as usize;
                for _ in 0..count {
                    let hit = Vector2::new(area.sample(&mut rng), area.sample(&mut rng));
                    event = event.with_hit(truth.sensor, hit);
                }
            }
        }
        events.push(event);
    }

    log::debug!(
        "Generated {} synthetic events for run {run} on {} sensors",
        events.len(),
        config.sensors.len()
    );
    Ok(events)
}

/// Event source generating runs on demand
#[derive(Debug, Clone, Default)]
pub struct SyntheticEventSource {
    config: SyntheticConfig,
}

impl SyntheticEventSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SyntheticConfig {
        &self.config
    }
}

impl EventSource for SyntheticEventSource {
    fn open(&mut self, run: RunId) -> Result<EventStream, AlignError> {
        let events = generate_run(&self.config, run)?;
        Ok(Box::new(events.into_iter().map(Ok)))
    }
}
