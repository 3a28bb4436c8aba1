use serde::{Deserialize, Serialize};

/// Where the calibrations of a run came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CalibrationSource {
    /// Fitted from the residuals of the alignment pass
    Fitted,
    /// Read back from persisted calibration files
    Loaded,
}

/// Pass over the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pass {
    /// Residual accumulation and fitting
    Alignment,
    /// Matching with the finalized cuts
    Efficiency,
}

/// Strip efficiency driver states
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverState {
    /// Created, nothing read yet
    Idle,
    /// Loading calibrations or accumulating residuals
    AlignmentPass,
    /// Every calibrator has final offset and cuts
    Calibrated { source: CalibrationSource },
    /// Counting correlated hits
    EfficiencyPass,
    /// Efficiency counted for every sensor
    Finished,
}

impl DriverState {
    /// Whether offsets and cuts are available in this state
    pub fn is_calibrated(&self) -> bool {
        matches!(
            self,
            DriverState::Calibrated { .. } | DriverState::EfficiencyPass | DriverState::Finished
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cuts_available_from_calibrated_on() {
        assert!(!DriverState::Idle.is_calibrated());
        assert!(!DriverState::AlignmentPass.is_calibrated());
        assert!(DriverState::Calibrated {
            source: CalibrationSource::Loaded
        }
        .is_calibrated());
        assert!(DriverState::EfficiencyPass.is_calibrated());
        assert!(DriverState::Finished.is_calibrated());
    }
}
