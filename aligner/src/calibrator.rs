//! Per-sensor alignment calibration from track/hit residuals.
//!
//! An [`AlignmentCalibrator`] accumulates the differences between predicted
//! track positions and observed hit positions on one sensor. X residuals
//! are expected to be Gaussian (strip pitch resolution), Y residuals to be
//! flat over the strip length. Once enough samples are collected,
//! [`AlignmentCalibrator::calculate_alignment`] fits both distributions and
//! derives:
//!
//! - the offset of the sensor: Gaussian mean in X, plateau center in Y
//! - the matching cuts: Gaussian sigma in X, plateau half width in Y
//!
//! The result can be written to and read back from a five-number text file
//! so later runs skip the fit.

use std::fmt;
use std::path::Path;

use fit_math::{FitError, FitModel, FitResult, ParameterBounds, PlateauVariant};
use log::{debug, info, warn};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::backend::{Distribution, DistributionBackend, HistogramBackend};
use crate::config::{AxisFitConfig, CalibratorConfig};
use crate::error::AlignError;

/// Residual axis of a sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Across the strips, Gaussian residuals
    X,
    /// Along the strips, flat residuals
    Y,
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Axis::X => write!(f, "X"),
            Axis::Y => write!(f, "Y"),
        }
    }
}

/// Finalized alignment of one sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Position offset; z is reserved and always 0 when fitted
    pub offset: Vector3<f64>,
    /// Matching cuts, both non-negative
    pub cuts: Vector2<f64>,
}

impl Calibration {
    /// Serialize as `"x y z cutx cuty\n"`.
    ///
    /// Values use the shortest representation that parses back to the same
    /// `f64`, so a written calibration reloads bit for bit.
    pub fn to_text(&self) -> String {
        format!(
            "{} {} {} {} {}\n",
            self.offset.x, self.offset.y, self.offset.z, self.cuts.x, self.cuts.y
        )
    }

    /// Parse the five whitespace separated numbers written by [`Calibration::to_text`].
    ///
    /// Returns the reason on failure.
    pub fn parse(text: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.len() != 5 {
            return Err(format!("expected 5 values, found {}", tokens.len()));
        }

        let mut values = [0.0; 5];
        for (i, (token, value)) in tokens.iter().zip(values.iter_mut()).enumerate() {
            *value = token
                .parse::<f64>()
                .map_err(|e| format!("value {} ({token:?}): {e}", i + 1))?;
            if !value.is_finite() {
                return Err(format!("value {} ({token:?}) is not finite", i + 1));
            }
        }

        Ok(Self {
            offset: Vector3::new(values[0], values[1], values[2]),
            cuts: Vector2::new(values[3], values[4]),
        })
    }
}

/// Outcome of the fit on one axis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisFit {
    /// Axis the fit belongs to
    pub axis: Axis,
    /// Model that was fitted
    pub model: FitModel,
    /// Best-fit parameters in the model's layout
    pub parameters: Vec<f64>,
    /// Window of bin centers included in the fit
    pub range: (f64, f64),
    /// chi2 at the best fit
    pub chi_squared: f64,
    /// Number of bins minus number of parameters
    pub degrees_of_freedom: usize,
    /// Rebinning factor applied before fitting, 1 if none
    pub rebin_factor: usize,
    /// Derived offset on this axis
    pub center: f64,
    /// Derived cut on this axis
    pub half_width: f64,
}

impl AxisFit {
    fn new(
        axis: Axis,
        model: FitModel,
        result: FitResult,
        range: (f64, f64),
        rebin_factor: usize,
        center: f64,
        half_width: f64,
    ) -> Self {
        Self {
            axis,
            model,
            parameters: result.parameters,
            range,
            chi_squared: result.chi_squared,
            degrees_of_freedom: result.degrees_of_freedom,
            rebin_factor,
            center,
            half_width,
        }
    }

    /// chi2 per degree of freedom
    pub fn reduced_chi_squared(&self) -> f64 {
        if self.degrees_of_freedom == 0 {
            f64::INFINITY
        } else {
            self.chi_squared / self.degrees_of_freedom as f64
        }
    }

    /// Value of the fitted curve at `x`
    pub fn evaluate(&self, x: f64) -> f64 {
        self.model.evaluate(x, &self.parameters)
    }
}

/// Fit outcome of both axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummary {
    pub x: AxisFit,
    pub y: AxisFit,
}

/// Alignment calibration of one sensor.
///
/// Lifecycle: [`init_distributions`](Self::init_distributions), any number
/// of [`fill`](Self::fill) calls, then
/// [`calculate_alignment`](Self::calculate_alignment). Alternatively
/// [`load`](Self::load) a previously persisted calibration. Offset, cuts and
/// correlation tests are only available once calibrated.
pub struct AlignmentCalibrator<B: DistributionBackend = HistogramBackend> {
    backend: B,
    config: CalibratorConfig,
    distribution_x: Option<B::Dist>,
    distribution_y: Option<B::Dist>,
    calibration: Option<Calibration>,
    fit_summary: Option<FitSummary>,
}

impl AlignmentCalibrator<HistogramBackend> {
    /// Create a calibrator using the default histogram backend.
    pub fn new(config: CalibratorConfig) -> Self {
        Self::with_backend(HistogramBackend::default(), config)
    }
}

impl<B: DistributionBackend> AlignmentCalibrator<B> {
    /// Create a calibrator on a custom distribution backend.
    pub fn with_backend(backend: B, config: CalibratorConfig) -> Self {
        Self {
            backend,
            config,
            distribution_x: None,
            distribution_y: None,
            calibration: None,
            fit_summary: None,
        }
    }

    /// Settings this calibrator was created with
    pub fn config(&self) -> &CalibratorConfig {
        &self.config
    }

    /// Create the empty X and Y residual distributions.
    ///
    /// X uses the fine binning of the configuration, Y the coarse one.
    /// Calling this twice is an error.
    pub fn init_distributions(&mut self, name_x: &str, name_y: &str) -> Result<(), AlignError> {
        if self.is_initialized() {
            return Err(AlignError::Precondition(format!(
                "distributions {name_x}/{name_y} already initialized"
            )));
        }
        let x = self.backend.create(name_x, "X residuals", &self.config.x)?;
        let y = self.backend.create(name_y, "Y residuals", &self.config.y)?;
        debug!("Initialized alignment distributions {name_x} and {name_y}");
        self.distribution_x = Some(x);
        self.distribution_y = Some(y);
        Ok(())
    }

    /// Whether [`init_distributions`](Self::init_distributions) has run
    pub fn is_initialized(&self) -> bool {
        self.distribution_x.is_some()
    }

    /// Whether offset and cuts are final
    pub fn is_calculated(&self) -> bool {
        self.calibration.is_some()
    }

    /// Record one residual pair `(predicted - observed)`.
    pub fn fill(&mut self, dx: f64, dy: f64) -> Result<(), AlignError> {
        if self.calibration.is_some() {
            return Err(AlignError::Precondition(
                "cannot fill a calibrator after its alignment was calculated".to_string(),
            ));
        }
        match (self.distribution_x.as_mut(), self.distribution_y.as_mut()) {
            (Some(x), Some(y)) => {
                x.fill(dx);
                y.fill(dy);
                Ok(())
            }
            _ => Err(AlignError::Precondition(
                "fill called before distributions were initialized".to_string(),
            )),
        }
    }

    /// Number of residual pairs recorded so far
    pub fn sample_count(&self) -> u64 {
        self.distribution_x.as_ref().map_or(0, |d| d.entries())
    }

    /// Fit both distributions and finalize offset and cuts.
    ///
    /// Runs at most once; later calls return immediately without touching
    /// the distributions. A failed fit leaves the calibrator uncalibrated.
    pub fn calculate_alignment(&mut self) -> Result<(), AlignError> {
        if self.calibration.is_some() {
            return Ok(());
        }
        let (Some(dist_x), Some(dist_y)) =
            (self.distribution_x.as_mut(), self.distribution_y.as_mut())
        else {
            return Err(AlignError::Precondition(
                "alignment requested before distributions were initialized".to_string(),
            ));
        };

        let x = fit_gaussian_axis(dist_x, &self.config.x_fit)?;
        let y = fit_plateau_axis(dist_y, &self.config.y_fit)?;

        let calibration = Calibration {
            offset: Vector3::new(x.center, y.center, 0.0),
            cuts: Vector2::new(x.half_width, y.half_width),
        };
        info!(
            "Alignment offset ({:.5}, {:.5}), cuts ({:.5}, {:.5}), chi2/ndf X {:.2} Y {:.2}",
            calibration.offset.x,
            calibration.offset.y,
            calibration.cuts.x,
            calibration.cuts.y,
            x.reduced_chi_squared(),
            y.reduced_chi_squared()
        );

        self.calibration = Some(calibration);
        self.fit_summary = Some(FitSummary { x, y });
        Ok(())
    }

    /// Finalized offset and cuts
    pub fn calibration(&self) -> Result<Calibration, AlignError> {
        self.calibration.ok_or_else(|| {
            AlignError::Precondition("alignment has not been calculated".to_string())
        })
    }

    /// Sensor offset `(x, y, 0)`
    pub fn offset(&self) -> Result<Vector3<f64>, AlignError> {
        Ok(self.calibration()?.offset)
    }

    /// Matching cuts `(cutX, cutY)`
    pub fn cuts(&self) -> Result<Vector2<f64>, AlignError> {
        Ok(self.calibration()?.cuts)
    }

    /// Whether `a` and `b` agree in X within `cutX * n_sigma`
    pub fn is_correlated_x(&self, a: &Vector2<f64>, b: &Vector2<f64>) -> Result<bool, AlignError> {
        let cuts = self.cuts()?;
        Ok((a.x - b.x).abs() < cuts.x * self.config.n_sigma)
    }

    /// Whether `a` and `b` agree in Y within `cutY`
    pub fn is_correlated_y(&self, a: &Vector2<f64>, b: &Vector2<f64>) -> Result<bool, AlignError> {
        let cuts = self.cuts()?;
        Ok((a.y - b.y).abs() < cuts.y)
    }

    /// Whether `a` and `b` match on both axes.
    ///
    /// Symmetric in its arguments; both comparisons are strict.
    pub fn is_correlated(&self, a: &Vector2<f64>, b: &Vector2<f64>) -> Result<bool, AlignError> {
        Ok(self.is_correlated_x(a, b)? && self.is_correlated_y(a, b)?)
    }

    /// Write the calibration to `path`.
    pub fn persist(&self, path: &Path) -> Result<(), AlignError> {
        let calibration = self.calibration()?;
        info!("Writing alignment data to {}", path.display());
        std::fs::write(path, calibration.to_text()).map_err(|e| AlignError::io(path, e))
    }

    /// Read a calibration written by [`persist`](Self::persist).
    ///
    /// Returns `Ok(false)` when the file cannot be read, leaving the
    /// calibrator untouched. A readable file that does not hold five numbers
    /// is an error.
    pub fn load(&mut self, path: &Path) -> Result<bool, AlignError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                warn!("No alignment data at {}: {e}", path.display());
                return Ok(false);
            }
        };
        let calibration = Calibration::parse(&text).map_err(|reason| {
            AlignError::CalibrationParse {
                path: path.to_path_buf(),
                reason,
            }
        })?;

        info!(
            "Loaded alignment from {}: offset ({}, {}, {}), cuts ({}, {})",
            path.display(),
            calibration.offset.x,
            calibration.offset.y,
            calibration.offset.z,
            calibration.cuts.x,
            calibration.cuts.y
        );
        self.calibration = Some(calibration);
        self.fit_summary = None;
        Ok(true)
    }

    /// X residual distribution, once initialized
    pub fn distribution_x(&self) -> Option<&B::Dist> {
        self.distribution_x.as_ref()
    }

    /// Y residual distribution, once initialized
    pub fn distribution_y(&self) -> Option<&B::Dist> {
        self.distribution_y.as_ref()
    }

    /// Fit details, available when the calibration came from fitting
    pub fn fit_summary(&self) -> Option<&FitSummary> {
        self.fit_summary.as_ref()
    }
}

/// Rebin a sparse distribution so each bin holds a useful number of entries.
///
/// Applies when `entries * bin_ratio * 2 < bins`, with factor
/// `floor(bins / (entries * bin_ratio))`. Returns the factor used.
pub fn rebin_if_sparse<D: Distribution>(dist: &mut D, bin_ratio: f64) -> Result<usize, AlignError> {
    let bins = dist.bin_count() as f64;
    let expected = dist.entries() as f64 * bin_ratio;
    if expected * 2.0 >= bins {
        return Ok(1);
    }
    let factor = ((bins / expected).floor() as usize).clamp(1, dist.bin_count());
    debug!(
        "Rebinning {} by {factor}: {} entries over {} bins",
        dist.name(),
        dist.entries(),
        dist.bin_count()
    );
    dist.rebin(factor)?;
    Ok(factor)
}

/// Half width of a fit window, widened to hold enough bins for `model`.
///
/// After heavy rebinning a window of a few RMS can be narrower than a bin.
fn fit_half_window<D: Distribution>(dist: &D, model: FitModel, half_width: f64) -> f64 {
    half_width.max(model.parameter_count() as f64 * dist.bin_width())
}

/// Outermost bins holding at least half the maximum content.
///
/// Background entries spread over the whole range inflate the RMS but
/// rarely reach half the peak, so this span tracks the signal.
fn half_maximum_span<D: Distribution>(dist: &D) -> Option<(usize, usize)> {
    let half = dist.maximum() / 2.0;
    if !(half > 0.0) {
        return None;
    }
    let mut above = (0..dist.bin_count()).filter(|&i| dist.bin_content(i) >= half);
    let first = above.next()?;
    let last = above.last().unwrap_or(first);
    Some((first, last))
}

/// Full width at half maximum over the standard deviation of a Gaussian
const FWHM_PER_SIGMA: f64 = 2.354_820_045;

fn fit_gaussian_axis<D: Distribution>(
    dist: &mut D,
    settings: &AxisFitConfig,
) -> Result<AxisFit, AlignError> {
    let fit_error = |source: FitError| AlignError::FitConvergence {
        axis: Axis::X,
        source,
    };
    let model = FitModel::Gaussian;
    let no_data = || {
        fit_error(FitError::InsufficientData {
            points: 0,
            parameters: model.parameter_count(),
        })
    };

    let rms = dist.rms().ok_or_else(no_data)?;
    let rebin_factor = rebin_if_sparse(dist, settings.bin_ratio)?;

    // Sparse fine bins put the maximum on a noise spike, so look after rebinning
    let peak_bin = dist.maximum_bin().ok_or_else(no_data)?;
    let (first, last) = half_maximum_span(dist).ok_or_else(no_data)?;
    let width = dist.bin_width();
    let peak = dist.bin_center(peak_bin);
    let sigma = ((last - first + 1) as f64 * width / FWHM_PER_SIGMA).min(rms);
    let initial = [dist.maximum(), peak, sigma.max(width)];

    let half = fit_half_window(dist, model, settings.nrms * rms);
    let range = (peak - half, peak + half);
    // Below half a bin the width is unresolved and the fit has no minimum
    let bounds = ParameterBounds::unbounded(model.parameter_count())
        .with_lower(0, 0.0)
        .with_range(1, range.0, range.1)
        .with_range(2, width / 2.0, range.1 - range.0);
    let result = dist.fit(model, &initial, &bounds, range).map_err(fit_error)?;
    debug!(
        "{} gaussian fit: {:?} after {} iterations",
        dist.name(),
        result.parameters,
        result.iterations
    );

    let center = result.parameters[1];
    let half_width = result.parameters[2].abs();
    Ok(AxisFit::new(
        Axis::X,
        model,
        result,
        range,
        rebin_factor,
        center,
        half_width,
    ))
}

/// Check fitted plateau edges are ordered and strictly inside `range`.
fn check_plateau_edges(x0: f64, x1: f64, range: (f64, f64)) -> Result<(), FitError> {
    if !(x0 < x1) {
        return Err(FitError::Rejected(format!(
            "plateau edges {x0} and {x1} are not ordered"
        )));
    }
    if x0 <= range.0 || x1 >= range.1 {
        return Err(FitError::Rejected(format!(
            "plateau edges [{x0}, {x1}] reach the fit window [{}, {}]",
            range.0, range.1
        )));
    }
    Ok(())
}

fn fit_plateau_axis<D: Distribution>(
    dist: &mut D,
    settings: &AxisFitConfig,
) -> Result<AxisFit, AlignError> {
    let fit_error = |source: FitError| AlignError::FitConvergence {
        axis: Axis::Y,
        source,
    };
    let model = FitModel::Plateau(PlateauVariant::Symmetric);
    let no_data = || {
        fit_error(FitError::InsufficientData {
            points: 0,
            parameters: model.parameter_count(),
        })
    };

    let (Some(mean), Some(rms)) = (dist.mean(), dist.rms()) else {
        return Err(no_data());
    };

    let rebin_factor = rebin_if_sparse(dist, settings.bin_ratio)?;

    let (first, last) = half_maximum_span(dist).ok_or_else(no_data)?;
    let width = dist.bin_width();
    let (x0, x1) = (dist.bin_center(first), dist.bin_center(last));
    let level =
        (first..=last).map(|i| dist.bin_content(i)).sum::<f64>() / (last - first + 1) as f64;
    let initial = [x0, x1, level, width, level];

    // The window must hold both seeded edges with room for their falloff
    let reach = (mean - x0).max(x1 - mean) + 2.0 * width;
    let window = fit_half_window(dist, model, (settings.nrms * rms).max(reach));
    let range = (mean - window, mean + window);
    let bounds = ParameterBounds::unbounded(model.parameter_count())
        .with_range(0, range.0, range.1)
        .with_range(1, range.0, range.1)
        .with_lower(2, 0.0)
        .with_range(3, width / 4.0, range.1 - range.0)
        .with_lower(4, 0.0);
    let result = dist.fit(model, &initial, &bounds, range).map_err(fit_error)?;
    debug!(
        "{} plateau fit: {:?} after {} iterations",
        dist.name(),
        result.parameters,
        result.iterations
    );

    let p = &result.parameters;
    check_plateau_edges(p[0], p[1], range).map_err(fit_error)?;
    let sigma = p[3].abs();
    let lower = p[0] - sigma;
    let upper = p[1] + sigma;
    Ok(AxisFit::new(
        Axis::Y,
        model,
        result,
        range,
        rebin_factor,
        (lower + upper) / 2.0,
        (upper - lower) / 2.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution as _, Normal};
    use tempfile::TempDir;

    fn calibrated(offset: [f64; 2], cuts: [f64; 2], n_sigma: f64) -> AlignmentCalibrator {
        let config = CalibratorConfig {
            n_sigma,
            ..CalibratorConfig::default()
        };
        let mut cal = AlignmentCalibrator::new(config);
        cal.calibration = Some(Calibration {
            offset: Vector3::new(offset[0], offset[1], 0.0),
            cuts: Vector2::new(cuts[0], cuts[1]),
        });
        cal
    }

    #[test]
    fn test_calibration_text_format() {
        let c = Calibration {
            offset: Vector3::new(0.25, -1.5, 0.0),
            cuts: Vector2::new(0.05, 0.75),
        };
        assert_eq!(c.to_text(), "0.25 -1.5 0 0.05 0.75\n");
        assert_eq!(Calibration::parse(&c.to_text()).unwrap(), c);
    }

    #[test]
    fn test_calibration_parse_errors() {
        assert!(Calibration::parse("1 2 3 4").is_err());
        assert!(Calibration::parse("1 2 3 4 5 6").is_err());
        assert!(Calibration::parse("1 2 three 4 5").is_err());
        assert!(Calibration::parse("1 2 3 NaN 5").is_err());
        // Any whitespace separates values
        assert!(Calibration::parse("1\t2\n3  4 5").is_ok());
    }

    #[test]
    fn test_fill_requires_init() {
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(matches!(
            cal.fill(0.0, 0.0),
            Err(AlignError::Precondition(_))
        ));
        assert!(matches!(
            cal.calculate_alignment(),
            Err(AlignError::Precondition(_))
        ));
    }

    #[test]
    fn test_double_init_rejected() {
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(!cal.is_initialized());
        cal.init_distributions("x", "y").unwrap();
        assert!(cal.is_initialized());
        assert!(cal.init_distributions("x", "y").is_err());
    }

    #[test]
    fn test_accessors_require_calibration() {
        let cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(cal.offset().is_err());
        assert!(cal.cuts().is_err());
        let p = Vector2::new(0.0, 0.0);
        assert!(cal.is_correlated(&p, &p).is_err());
        let dir = TempDir::new().unwrap();
        assert!(cal.persist(&dir.path().join("a.align")).is_err());
    }

    #[test]
    fn test_correlation_is_strict_and_symmetric() {
        let cal = calibrated([0.0, 0.0], [0.1, 0.5], 2.0);
        let a = Vector2::new(1.0, 1.0);

        // X cut is cutX * n_sigma = 0.2
        assert!(cal.is_correlated(&a, &Vector2::new(1.19, 1.0)).unwrap());
        assert!(!cal.is_correlated(&a, &Vector2::new(1.25, 1.0)).unwrap());
        assert!(cal.is_correlated(&a, &Vector2::new(1.0, 1.49)).unwrap());
        assert!(!cal.is_correlated(&a, &Vector2::new(1.0, 1.5)).unwrap());

        for b in [
            Vector2::new(0.9, 0.6),
            Vector2::new(1.15, 1.3),
            Vector2::new(3.0, 1.0),
        ] {
            assert_eq!(
                cal.is_correlated(&a, &b).unwrap(),
                cal.is_correlated(&b, &a).unwrap()
            );
        }
    }

    #[test]
    fn test_zero_cuts_match_nothing() {
        let cal = calibrated([0.0, 0.0], [0.0, 0.0], 1.0);
        let a = Vector2::new(0.3, 0.3);
        assert!(!cal.is_correlated(&a, &a).unwrap());
    }

    #[test]
    fn test_per_axis_correlation() {
        let cal = calibrated([0.0, 0.0], [0.1, 0.5], 1.0);
        let a = Vector2::new(0.0, 0.0);
        let b = Vector2::new(0.05, 2.0);
        assert!(cal.is_correlated_x(&a, &b).unwrap());
        assert!(!cal.is_correlated_y(&a, &b).unwrap());
        assert!(!cal.is_correlated(&a, &b).unwrap());
    }

    #[test]
    fn test_persist_and_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run000001_sensor03.align");
        let cal = calibrated([0.123456789, -0.987654321], [0.0123, 0.456], 1.0);
        cal.persist(&path).unwrap();

        let mut loaded = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(loaded.load(&path).unwrap());
        assert!(loaded.is_calculated());
        assert_eq!(loaded.calibration().unwrap(), cal.calibration().unwrap());
        assert!(loaded.fit_summary().is_none());
    }

    #[test]
    fn test_load_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(!cal.load(&dir.path().join("absent.align")).unwrap());
        assert!(!cal.is_calculated());
    }

    #[test]
    fn test_load_malformed_file_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.align");
        std::fs::write(&path, "0.1 0.2\n").unwrap();
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        assert!(matches!(
            cal.load(&path),
            Err(AlignError::CalibrationParse { .. })
        ));
        assert!(!cal.is_calculated());
    }

    #[test]
    fn test_rebin_if_sparse() {
        let backend = HistogramBackend::default();
        let spec = crate::config::DistributionSpec {
            bins: 1000,
            low: -5.0,
            high: 5.0,
        };

        // 2000 entries: 2000 * 0.1 * 2 = 400 < 1000, factor floor(1000 / 200) = 5
        let mut sparse = backend.create("sparse", "sparse", &spec).unwrap();
        for i in 0..2000 {
            sparse.fill((i % 100) as f64 * 0.01);
        }
        assert_eq!(rebin_if_sparse(&mut sparse, 0.1).unwrap(), 5);
        assert_eq!(sparse.bin_count(), 200);

        // 5000 entries: 5000 * 0.1 * 2 = 1000, not below the bin count
        let mut dense = backend.create("dense", "dense", &spec).unwrap();
        for i in 0..5000 {
            dense.fill((i % 100) as f64 * 0.01);
        }
        assert_eq!(rebin_if_sparse(&mut dense, 0.1).unwrap(), 1);
        assert_eq!(dense.bin_count(), 1000);
    }

    #[test]
    fn test_calculate_on_empty_distributions_fails() {
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        cal.init_distributions("x", "y").unwrap();
        match cal.calculate_alignment() {
            Err(AlignError::FitConvergence { axis, .. }) => assert_eq!(axis, Axis::X),
            other => panic!("expected fit failure, got {other:?}"),
        }
        assert!(!cal.is_calculated());
    }

    #[test]
    fn test_calculate_is_idempotent() {
        let mut cal = AlignmentCalibrator::new(CalibratorConfig::default());
        cal.init_distributions("x", "y").unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(17);
        let x = Normal::new(0.2, 0.05).unwrap();
        for _ in 0..20_000 {
            cal.fill(x.sample(&mut rng), rng.gen_range(-0.5..0.3)).unwrap();
        }
        cal.calculate_alignment().unwrap();
        let first = cal.calibration().unwrap();
        let bins_x = cal.distribution_x().unwrap().bin_count();

        cal.calculate_alignment().unwrap();
        assert_eq!(cal.calibration().unwrap(), first);
        assert_eq!(cal.distribution_x().unwrap().bin_count(), bins_x);
        assert_relative_eq!(first.offset.x, 0.2, epsilon = 0.01);
        assert_relative_eq!(first.offset.y, -0.1, epsilon = 0.02);
        assert_eq!(first.offset.z, 0.0);
        assert!(cal.fill(0.0, 0.0).is_err());
    }

    #[test]
    fn test_plateau_edges_must_be_ordered_and_inside_window() {
        let range = (-1.0, 1.0);
        assert!(check_plateau_edges(-0.3, 0.3, range).is_ok());
        // Swapped
        assert!(matches!(
            check_plateau_edges(0.3, -0.3, range),
            Err(FitError::Rejected(_))
        ));
        // Collapsed
        assert!(check_plateau_edges(0.1, 0.1, range).is_err());
        // Run into the window
        assert!(check_plateau_edges(-1.0, 0.3, range).is_err());
        assert!(check_plateau_edges(-0.3, 2587.0, range).is_err());
    }

    #[test]
    fn test_half_maximum_span_ignores_flat_background() {
        let spec = crate::config::DistributionSpec {
            bins: 100,
            low: -5.0,
            high: 5.0,
        };
        let mut dist = HistogramBackend::default()
            .create("y", "y", &spec)
            .unwrap();
        for i in 0..100 {
            let x = dist.bin_center(i);
            let signal = if x.abs() < 0.5 { 40 } else { 0 };
            for _ in 0..(signal + 3) {
                dist.fill(x);
            }
        }

        let (first, last) = half_maximum_span(&dist).unwrap();
        assert_relative_eq!(dist.bin_center(first), -0.45, epsilon = 1e-9);
        assert_relative_eq!(dist.bin_center(last), 0.45, epsilon = 1e-9);

        let empty = HistogramBackend::default()
            .create("e", "e", &spec)
            .unwrap();
        assert!(half_maximum_span(&empty).is_none());
    }
}
