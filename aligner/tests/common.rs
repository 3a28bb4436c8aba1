//! Common utilities for aligner tests

use aligner::{EventPair, SensorId};
use nalgebra::Vector2;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use test_helpers::ResidualShape;

/// Per-sensor parameters for synthetic events
#[derive(Debug, Clone)]
pub struct SensorParams {
    pub sensor: SensorId,
    /// Residual shape of true hits
    pub shape: ResidualShape,
    /// Probability that a predicted track has its hit
    pub hit_probability: f64,
}

impl SensorParams {
    /// Sensor with a 0.05 wide Gaussian in X and a +/-0.3 plateau in Y
    pub fn new(sensor: SensorId, offset_x: f64, offset_y: f64, hit_probability: f64) -> Self {
        Self {
            sensor,
            shape: ResidualShape {
                offset_x,
                offset_y,
                sigma_x: 0.05,
                half_width_y: 0.3,
            },
            hit_probability,
        }
    }
}

/// Generate `count` events with one predicted track per sensor.
///
/// Predicted positions are uniform over [-4, 4) on both axes; the observed
/// hit, when present, sits at `predicted - residual`.
pub fn synthetic_events(sensors: &[SensorParams], count: usize, seed: u64) -> Vec<EventPair> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let residuals: Vec<Vec<(f64, f64)>> = sensors
        .iter()
        .enumerate()
        .map(|(i, s)| s.shape.sample(count, seed.wrapping_add(1 + i as u64)))
        .collect();

    (0..count)
        .map(|n| {
            let mut event = EventPair::new(n as u64);
            for (params, samples) in sensors.iter().zip(&residuals) {
                let predicted = Vector2::new(rng.gen_range(-4.0..4.0), rng.gen_range(-4.0..4.0));
                event = event.with_prediction(params.sensor, predicted);
                if rng.gen::<f64>() < params.hit_probability {
                    let (dx, dy) = samples[n];
                    event = event.with_hit(params.sensor, predicted - Vector2::new(dx, dy));
                }
            }
            event
        })
        .collect()
}
