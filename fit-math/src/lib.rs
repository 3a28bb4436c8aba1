//! fit-math - Curve fitting for residual distributions
//!
//! This crate provides the numerical pieces used to turn binned
//! position-difference distributions into alignment constants:
//!
//! - **Models** - Gaussian and plateau curve models with a fixed parameter layout
//! - **Levenberg-Marquardt** - weighted least-squares fitting of a model to binned data
//! - **Statistics** - binomial efficiency estimates
//!
//! # Example
//!
//! ```
//! use fit_math::{fit_curve, CurveFitConfig, FitModel, FitPoint};
//!
//! let points: Vec<FitPoint> = (0..40)
//!     .map(|i| {
//!         let x = -2.0 + 0.1 * i as f64;
//!         FitPoint::new(x, 100.0 * (-0.5 * (x / 0.5).powi(2)).exp())
//!     })
//!     .collect();
//!
//! let result = fit_curve(
//!     FitModel::Gaussian,
//!     &points,
//!     &[80.0, 0.2, 0.7],
//!     &CurveFitConfig::default(),
//! )?;
//! assert!((result.parameters[1]).abs() < 1e-3);
//! # Ok::<(), fit_math::FitError>(())
//! ```

pub mod levmar;
pub mod models;
pub mod stats;

pub use levmar::{
    fit_curve, fit_curve_bounded, CurveFitConfig, FitError, FitPoint, FitResult, ParameterBounds,
};
pub use models::{gaussian, plateau, FitModel, PlateauVariant};
pub use stats::binomial_efficiency;
