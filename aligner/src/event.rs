//! Events consumed by the two analysis passes.
//!
//! Each event carries, per sensor, the track positions predicted by the
//! telescope and the hit positions actually observed on the sensor. The
//! driver reads the same run twice, so event sources must be re-openable.

use std::collections::BTreeMap;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::error::AlignError;

/// Identifier of a sensor under test
pub type SensorId = i32;

/// Identifier of a data-taking run
pub type RunId = u32;

/// Predicted and observed positions on one sensor in one event
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFrame {
    /// Track positions extrapolated to the sensor plane
    #[serde(default)]
    pub predicted: Vec<Vector2<f64>>,
    /// Hit positions reconstructed on the sensor
    #[serde(default)]
    pub observed: Vec<Vector2<f64>>,
}

/// One triggered event, paired across telescope and sensors
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPair {
    /// Trigger number within the run
    pub event: u64,
    /// Per-sensor positions; sensors without data may be absent
    #[serde(default)]
    pub sensors: BTreeMap<SensorId, SensorFrame>,
}

impl EventPair {
    /// Create an event without sensor data
    pub fn new(event: u64) -> Self {
        Self {
            event,
            sensors: BTreeMap::new(),
        }
    }

    /// Add one predicted track position on `sensor`.
    pub fn with_prediction(mut self, sensor: SensorId, position: Vector2<f64>) -> Self {
        self.sensors.entry(sensor).or_default().predicted.push(position);
        self
    }

    /// Add one observed hit position on `sensor`.
    pub fn with_hit(mut self, sensor: SensorId, position: Vector2<f64>) -> Self {
        self.sensors.entry(sensor).or_default().observed.push(position);
        self
    }
}

/// Sequential stream of events of one run
pub type EventStream = Box<dyn Iterator<Item = Result<EventPair, AlignError>>>;

/// Provider of event streams, re-openable per run.
///
/// Each call to [`open`](EventSource::open) starts a fresh pass over the
/// run from its first event.
pub trait EventSource {
    /// Open a new stream over `run`.
    fn open(&mut self, run: RunId) -> Result<EventStream, AlignError>;
}

/// Event source over events held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryEventSource {
    runs: BTreeMap<RunId, Vec<EventPair>>,
}

impl MemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the events of `run`.
    pub fn insert_run(&mut self, run: RunId, events: Vec<EventPair>) {
        self.runs.insert(run, events);
    }

    /// Builder form of [`insert_run`](Self::insert_run)
    pub fn with_run(mut self, run: RunId, events: Vec<EventPair>) -> Self {
        self.insert_run(run, events);
        self
    }
}

impl EventSource for MemoryEventSource {
    fn open(&mut self, run: RunId) -> Result<EventStream, AlignError> {
        let events = self
            .runs
            .get(&run)
            .ok_or_else(|| AlignError::EventStream(format!("no events for run {run}")))?
            .clone();
        Ok(Box::new(events.into_iter().map(Ok)))
    }
}
