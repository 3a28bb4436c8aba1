//! Curve models fitted to residual histograms
//!
//! All models are pure functions of `x` and a parameter slice. The parameter
//! layout of each model is fixed and documented on [`FitModel`].

use serde::{Deserialize, Serialize};

/// Which flavour of plateau to evaluate.
///
/// Only [`PlateauVariant::Symmetric`] is used for calibration. The
/// independent-edge form is unverified: it reads both plateau levels from the
/// same parameter (index 2) and never reads index 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauVariant {
    /// Mirrored edges sharing one level, one width and one amplitude.
    Symmetric,
    /// Separate widths and amplitudes for the left and right edge.
    IndependentEdges,
}

impl PlateauVariant {
    /// Number of entries the parameter slice must hold.
    pub fn parameter_count(self) -> usize {
        match self {
            PlateauVariant::Symmetric => 5,
            PlateauVariant::IndependentEdges => 8,
        }
    }
}

/// A curve model understood by the fitter.
///
/// Parameter layouts:
/// - `Gaussian`: `[amplitude, mean, sigma]`
/// - `Plateau(Symmetric)`: `[x0, x1, level, sigma, amplitude]`
/// - `Plateau(IndependentEdges)`: `[x0, x1, level, unused, sigma0, sigma1, amplitude0, amplitude1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FitModel {
    Gaussian,
    Plateau(PlateauVariant),
}

impl FitModel {
    /// Number of free parameters of the model.
    pub fn parameter_count(&self) -> usize {
        match self {
            FitModel::Gaussian => 3,
            FitModel::Plateau(variant) => variant.parameter_count(),
        }
    }

    /// Evaluate the model at `x`.
    ///
    /// # Panics
    ///
    /// Panics if `params` is shorter than [`FitModel::parameter_count`].
    pub fn evaluate(&self, x: f64, params: &[f64]) -> f64 {
        match self {
            FitModel::Gaussian => gaussian(x, params[0], params[1], params[2]),
            FitModel::Plateau(variant) => plateau(x, params, *variant),
        }
    }

    /// Short human readable name, used in logs and plots.
    pub fn name(&self) -> &'static str {
        match self {
            FitModel::Gaussian => "gaussian",
            FitModel::Plateau(PlateauVariant::Symmetric) => "symmetric plateau",
            FitModel::Plateau(PlateauVariant::IndependentEdges) => "general plateau",
        }
    }
}

/// Gaussian curve `amplitude * exp(-((x - mean) / sigma)^2 / 2)`.
///
/// # Arguments
///
/// * `x` - Evaluation point
/// * `amplitude` - Peak height
/// * `mean` - Peak position
/// * `sigma` - Width; only its magnitude matters
pub fn gaussian(x: f64, amplitude: f64, mean: f64, sigma: f64) -> f64 {
    let z = (x - mean) / sigma;
    amplitude * (-0.5 * z * z).exp()
}

/// Gaussian falloff hanging below `level`, reaching `level` exactly at `edge`.
fn falloff(x: f64, edge: f64, level: f64, sigma: f64, amplitude: f64) -> f64 {
    let z = (x - edge) / sigma;
    level + amplitude * ((-0.5 * z * z).exp() - 1.0)
}

/// Plateau curve: a flat level between `x0` and `x1` with Gaussian falloffs
/// outside.
///
/// Below `x0` the curve drops from the level towards `level - amplitude`
/// with width `sigma`; above `x1` the same falloff is mirrored. Between the
/// edges the curve interpolates linearly between the left and right level,
/// which for both variants are the same parameter, so the centre is flat.
///
/// # Arguments
///
/// * `x` - Evaluation point
/// * `params` - Parameter slice, layout as documented on [`FitModel`]
/// * `variant` - Which parameter layout to read
///
/// # Panics
///
/// Panics if `params` is shorter than `variant.parameter_count()`.
pub fn plateau(x: f64, params: &[f64], variant: PlateauVariant) -> f64 {
    let (x0, x1) = (params[0], params[1]);
    let (y0, y1) = (params[2], params[2]);
    let (sigma0, sigma1, c0, c1) = match variant {
        PlateauVariant::Symmetric => (params[3], params[3], params[4], params[4]),
        PlateauVariant::IndependentEdges => (params[4], params[5], params[6], params[7]),
    };

    if x < x0 {
        falloff(x, x0, y0, sigma0, c0)
    } else if x > x1 {
        falloff(x, x1, y1, sigma1, c1)
    } else if x1 > x0 {
        y0 + (y1 - y0) * (x - x0) / (x1 - x0)
    } else {
        y0
    }
}
