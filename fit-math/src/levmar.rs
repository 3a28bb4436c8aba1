//! Levenberg-Marquardt curve fitting for binned data
//!
//! Minimises the weighted sum of squares
//!
//! ```text
//! chi2 = sum_i (y_i - f(x_i; p))^2 / variance_i
//! ```
//!
//! over the model parameters `p`, using a numerically differentiated
//! Jacobian and multiplicative damping on the diagonal of the normal
//! equations.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use crate::models::FitModel;

/// Errors that can occur while fitting a curve
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("Invalid argument: {0}")]
    ArgumentError(String),

    #[error("insufficient data: {points} points for {parameters} free parameters")]
    InsufficientData { points: usize, parameters: usize },

    #[error("fit did not converge after {iterations} iterations")]
    NotConverged { iterations: usize },

    #[error("no downhill step from the initial parameters")]
    NoProgress,

    #[error("fit produced non-finite parameters")]
    NonFinite,

    #[error("fit result rejected: {0}")]
    Rejected(String),
}

/// One measured point of a fit: position, value and variance of the value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPoint {
    pub x: f64,
    pub y: f64,
    pub variance: f64,
}

impl FitPoint {
    /// Create a point with Poisson variance `max(y, 1)`.
    ///
    /// Empty bins keep a unit variance so they still pull the model towards
    /// zero, which is what pins down the edges of a plateau.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            x,
            y,
            variance: y.max(1.0),
        }
    }
}

/// Box constraints on the fit parameters.
///
/// Parameters start unbounded; the builder methods narrow one parameter at
/// a time. Indices past the parameter count are ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterBounds {
    lower: Vec<f64>,
    upper: Vec<f64>,
}

impl ParameterBounds {
    /// No constraint on any of `n` parameters
    pub fn unbounded(n: usize) -> Self {
        Self {
            lower: vec![f64::NEG_INFINITY; n],
            upper: vec![f64::INFINITY; n],
        }
    }

    pub fn len(&self) -> usize {
        self.lower.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    pub fn with_lower(mut self, index: usize, value: f64) -> Self {
        if let Some(lo) = self.lower.get_mut(index) {
            *lo = value;
        }
        self
    }

    pub fn with_upper(mut self, index: usize, value: f64) -> Self {
        if let Some(hi) = self.upper.get_mut(index) {
            *hi = value;
        }
        self
    }

    /// Keep parameter `index` within `[lower, upper]`
    pub fn with_range(self, index: usize, lower: f64, upper: f64) -> Self {
        self.with_lower(index, lower).with_upper(index, upper)
    }

    pub fn lower(&self, index: usize) -> f64 {
        self.lower[index]
    }

    pub fn upper(&self, index: usize) -> f64 {
        self.upper[index]
    }

    /// Project `params` onto the allowed box.
    pub fn clamp(&self, params: &mut [f64]) {
        for ((p, lo), hi) in params.iter_mut().zip(&self.lower).zip(&self.upper) {
            *p = p.max(*lo).min(*hi);
        }
    }

    fn validate(&self, n: usize) -> Result<(), FitError> {
        if self.len() != n {
            return Err(FitError::ArgumentError(format!(
                "bounds cover {} parameters, model takes {}",
                self.len(),
                n
            )));
        }
        for (j, (lo, hi)) in self.lower.iter().zip(&self.upper).enumerate() {
            if lo.is_nan() || hi.is_nan() || lo > hi {
                return Err(FitError::ArgumentError(format!(
                    "parameter {j} has empty bounds [{lo}, {hi}]"
                )));
            }
        }
        Ok(())
    }
}

/// Tuning knobs for the Levenberg-Marquardt iteration
#[derive(Debug, Clone)]
pub struct CurveFitConfig {
    /// Maximum number of accepted steps
    pub max_iterations: usize,
    /// Relative chi2 improvement below which the fit is considered converged
    pub tolerance: f64,
    /// Relative step length below which the fit is considered converged
    pub step_tolerance: f64,
    /// Starting damping factor
    pub initial_lambda: f64,
    /// Damping factor at which no downhill step exists any more
    pub max_lambda: f64,
}

impl Default for CurveFitConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            tolerance: 1e-9,
            step_tolerance: 1e-8,
            initial_lambda: 1e-3,
            max_lambda: 1e12,
        }
    }
}

/// Outcome of a successful fit
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Best-fit parameters, layout as documented on [`FitModel`]
    pub parameters: Vec<f64>,
    /// Weighted sum of squared residuals at the best fit
    pub chi_squared: f64,
    /// Number of points minus number of parameters
    pub degrees_of_freedom: usize,
    /// Number of accepted steps
    pub iterations: usize,
}

impl FitResult {
    /// chi2 per degree of freedom, or infinity with no degrees of freedom.
    pub fn reduced_chi_squared(&self) -> f64 {
        if self.degrees_of_freedom == 0 {
            f64::INFINITY
        } else {
            self.chi_squared / self.degrees_of_freedom as f64
        }
    }
}

/// Weighted sum of squared residuals of `params` over `points`.
fn chi_squared(model: FitModel, points: &[FitPoint], params: &[f64]) -> f64 {
    points
        .iter()
        .map(|p| {
            let r = p.y - model.evaluate(p.x, params);
            r * r / p.variance
        })
        .sum()
}

/// Weighted residual vector and Jacobian of the model at `params`.
///
/// Derivatives use central differences with a step scaled to each
/// parameter's magnitude.
fn residuals_and_jacobian(
    model: FitModel,
    points: &[FitPoint],
    params: &[f64],
) -> (DVector<f64>, DMatrix<f64>) {
    let m = points.len();
    let n = params.len();
    let mut residuals = DVector::zeros(m);
    let mut jacobian = DMatrix::zeros(m, n);
    let mut shifted = params.to_vec();

    for (i, p) in points.iter().enumerate() {
        let w = 1.0 / p.variance.sqrt();
        residuals[i] = (p.y - model.evaluate(p.x, params)) * w;

        for j in 0..n {
            let h = 1e-6 * params[j].abs().max(1e-3);
            shifted[j] = params[j] + h;
            let up = model.evaluate(p.x, &shifted);
            shifted[j] = params[j] - h;
            let down = model.evaluate(p.x, &shifted);
            shifted[j] = params[j];
            jacobian[(i, j)] = (up - down) / (2.0 * h) * w;
        }
    }

    (residuals, jacobian)
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Fit `model` to `points` starting from `initial`, without constraints.
///
/// See [`fit_curve_bounded`].
pub fn fit_curve(
    model: FitModel,
    points: &[FitPoint],
    initial: &[f64],
    config: &CurveFitConfig,
) -> Result<FitResult, FitError> {
    let bounds = ParameterBounds::unbounded(model.parameter_count());
    fit_curve_bounded(model, points, initial, &bounds, config)
}

/// Fit `model` to `points` starting from `initial`, keeping every
/// parameter inside `bounds`.
///
/// The starting point is projected onto the bounds. A parameter sitting on
/// a bound whose gradient points outward is held fixed for that iteration,
/// and every trial step is projected back onto the bounds.
///
/// # Arguments
///
/// * `model` - Curve model to fit
/// * `points` - Measured points with variances
/// * `initial` - Starting parameters, must match the model's parameter count
/// * `bounds` - Allowed box for the parameters
/// * `config` - Iteration limits and tolerances
///
/// # Returns
///
/// * `Ok(FitResult)` - Converged parameters and fit quality
/// * `Err(FitError)` - Bad arguments, too few points, non-finite result,
///   no downhill step at all or no convergence
pub fn fit_curve_bounded(
    model: FitModel,
    points: &[FitPoint],
    initial: &[f64],
    bounds: &ParameterBounds,
    config: &CurveFitConfig,
) -> Result<FitResult, FitError> {
    let n = model.parameter_count();
    if initial.len() != n {
        return Err(FitError::ArgumentError(format!(
            "{} model takes {} parameters, got {}",
            model.name(),
            n,
            initial.len()
        )));
    }
    if initial.iter().any(|p| !p.is_finite()) {
        return Err(FitError::ArgumentError(
            "initial parameters must be finite".to_string(),
        ));
    }
    bounds.validate(n)?;
    if points.iter().any(|p| !(p.variance > 0.0)) {
        return Err(FitError::ArgumentError(
            "point variances must be positive".to_string(),
        ));
    }
    if points.len() < n {
        return Err(FitError::InsufficientData {
            points: points.len(),
            parameters: n,
        });
    }

    let mut params = initial.to_vec();
    bounds.clamp(&mut params);
    let mut chi2 = chi_squared(model, points, &params);
    if !chi2.is_finite() {
        return Err(FitError::NonFinite);
    }
    let mut lambda = config.initial_lambda;

    let finish = |params: Vec<f64>, chi2: f64, iterations: usize| {
        if params.iter().all(|p| p.is_finite()) {
            Ok(FitResult {
                parameters: params,
                chi_squared: chi2,
                degrees_of_freedom: points.len() - n,
                iterations,
            })
        } else {
            Err(FitError::NonFinite)
        }
    };

    for accepted in 0..config.max_iterations {
        if chi2 <= f64::EPSILON {
            return finish(params, chi2, accepted);
        }

        let (residuals, jacobian) = residuals_and_jacobian(model, points, &params);
        let mut jtj = jacobian.transpose() * &jacobian;
        let mut gradient = jacobian.transpose() * residuals;

        // Parameters on a bound with an outward gradient stay put
        for j in 0..n {
            let pinned = (params[j] <= bounds.lower(j) && gradient[j] < 0.0)
                || (params[j] >= bounds.upper(j) && gradient[j] > 0.0);
            if pinned {
                jtj.row_mut(j).fill(0.0);
                jtj.column_mut(j).fill(0.0);
                jtj[(j, j)] = 1.0;
                gradient[j] = 0.0;
            }
        }

        // Raise damping until a downhill step is found
        let mut downhill = None;
        while lambda <= config.max_lambda {
            let mut damped = jtj.clone();
            for j in 0..n {
                damped[(j, j)] += lambda * jtj[(j, j)].max(1e-12);
            }

            if let Some(step) = damped.cholesky().map(|c| c.solve(&gradient)) {
                let mut trial: Vec<f64> =
                    params.iter().zip(step.iter()).map(|(p, d)| p + d).collect();
                bounds.clamp(&mut trial);
                let trial_chi2 = chi_squared(model, points, &trial);
                if trial_chi2.is_finite() && trial_chi2 < chi2 {
                    downhill = Some((trial, trial_chi2));
                    break;
                }
            }
            lambda *= 10.0;
        }

        let Some((trial, trial_chi2)) = downhill else {
            // Saturated damping: a minimum if we ever moved, a dead start otherwise
            return if accepted == 0 {
                Err(FitError::NoProgress)
            } else {
                finish(params, chi2, accepted)
            };
        };

        let step: Vec<f64> = trial.iter().zip(&params).map(|(t, p)| t - p).collect();
        let small_step =
            norm(&step) < config.step_tolerance * (norm(&params) + config.step_tolerance);
        let improvement = (chi2 - trial_chi2) / chi2;

        params = trial;
        chi2 = trial_chi2;
        lambda = (lambda * 0.1).max(1e-12);
        if improvement < config.tolerance || small_step {
            return finish(params, chi2, accepted + 1);
        }
    }

    Err(FitError::NotConverged {
        iterations: config.max_iterations,
    })
}
