//! Binned-distribution and curve-fitting backend used by the calibrator.
//!
//! The calibrator only needs a handful of operations from its histograms:
//! filling, a few summary statistics, rebinning and a ranged fit. They are
//! expressed as the [`Distribution`] trait so a different histogramming or
//! minimisation library can be slotted in by implementing
//! [`DistributionBackend`]. [`HistogramBackend`] is the default, built on
//! [`viz::histogram::Histogram`] and [`fit_math::fit_curve_bounded`].

use fit_math::{
    fit_curve_bounded, CurveFitConfig, FitError, FitModel, FitPoint, FitResult, ParameterBounds,
};
use viz::histogram::{Histogram, HistogramConfig};

use crate::config::DistributionSpec;
use crate::error::AlignError;

/// A 1D binned distribution of residuals
pub trait Distribution {
    /// Identifier given at creation
    fn name(&self) -> &str;

    /// Record one value; values outside the range only count as entries.
    fn fill(&mut self, value: f64);

    /// Number of recorded values, including under- and overflow
    fn entries(&self) -> u64;

    /// Current number of bins
    fn bin_count(&self) -> usize;

    /// Current bin width
    fn bin_width(&self) -> f64;

    /// Center of bin `idx`
    fn bin_center(&self, idx: usize) -> f64;

    /// Number of values in bin `idx`
    fn bin_content(&self, idx: usize) -> f64;

    /// Index of the fullest bin, None if every bin is empty
    fn maximum_bin(&self) -> Option<usize>;

    /// Content of the fullest bin
    fn maximum(&self) -> f64;

    /// Mean of the in-range values
    fn mean(&self) -> Option<f64>;

    /// RMS of the in-range values around their mean
    fn rms(&self) -> Option<f64>;

    /// Merge groups of `factor` adjacent bins.
    fn rebin(&mut self, factor: usize) -> Result<(), AlignError>;

    /// Fit `model` to the bins whose centers lie in `range`, starting from
    /// `initial` and keeping the parameters inside `bounds`.
    fn fit(
        &self,
        model: FitModel,
        initial: &[f64],
        bounds: &ParameterBounds,
        range: (f64, f64),
    ) -> Result<FitResult, FitError>;
}

/// Factory for the distributions owned by a calibrator
pub trait DistributionBackend {
    /// Distribution type produced by this backend
    type Dist: Distribution;

    /// Create an empty distribution binned as `spec`.
    fn create(
        &self,
        name: &str,
        title: &str,
        spec: &DistributionSpec,
    ) -> Result<Self::Dist, AlignError>;
}

/// Default backend: [`Histogram`] binning with Levenberg-Marquardt fitting
#[derive(Debug, Clone, Default)]
pub struct HistogramBackend {
    /// Settings handed to every fit
    pub fit_config: CurveFitConfig,
}

impl DistributionBackend for HistogramBackend {
    type Dist = HistogramDistribution;

    fn create(
        &self,
        name: &str,
        title: &str,
        spec: &DistributionSpec,
    ) -> Result<HistogramDistribution, AlignError> {
        let histogram = Histogram::new(name, spec.bins, spec.low, spec.high)?.with_config(
            HistogramConfig {
                title: Some(title.to_string()),
                ..HistogramConfig::default()
            },
        );
        Ok(HistogramDistribution {
            histogram,
            fit_config: self.fit_config.clone(),
        })
    }
}

/// [`Histogram`] paired with the fitter settings of its backend
#[derive(Debug, Clone)]
pub struct HistogramDistribution {
    histogram: Histogram,
    fit_config: CurveFitConfig,
}

impl HistogramDistribution {
    /// Underlying histogram, for dumps and plots
    pub fn histogram(&self) -> &Histogram {
        &self.histogram
    }
}

impl Distribution for HistogramDistribution {
    fn name(&self) -> &str {
        self.histogram.name()
    }

    fn fill(&mut self, value: f64) {
        self.histogram.fill(value);
    }

    fn entries(&self) -> u64 {
        self.histogram.entries()
    }

    fn bin_count(&self) -> usize {
        self.histogram.bin_count()
    }

    fn bin_width(&self) -> f64 {
        self.histogram.bin_width()
    }

    fn bin_center(&self, idx: usize) -> f64 {
        self.histogram.bin_center(idx)
    }

    fn bin_content(&self, idx: usize) -> f64 {
        self.histogram.counts().get(idx).copied().unwrap_or(0) as f64
    }

    fn maximum_bin(&self) -> Option<usize> {
        self.histogram.maximum_bin()
    }

    fn maximum(&self) -> f64 {
        self.histogram.maximum() as f64
    }

    fn mean(&self) -> Option<f64> {
        self.histogram.mean()
    }

    fn rms(&self) -> Option<f64> {
        self.histogram.rms()
    }

    fn rebin(&mut self, factor: usize) -> Result<(), AlignError> {
        Ok(self.histogram.rebin(factor)?)
    }

    fn fit(
        &self,
        model: FitModel,
        initial: &[f64],
        bounds: &ParameterBounds,
        range: (f64, f64),
    ) -> Result<FitResult, FitError> {
        let points: Vec<FitPoint> = self
            .histogram
            .bins_in_range(range.0, range.1)
            .into_iter()
            .map(|(x, count)| FitPoint::new(x, count as f64))
            .collect();
        fit_curve_bounded(model, &points, initial, bounds, &self.fit_config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn spec() -> DistributionSpec {
        DistributionSpec {
            bins: 100,
            low: -5.0,
            high: 5.0,
        }
    }

    #[test]
    fn test_create_uses_spec() {
        let dist = HistogramBackend::default()
            .create("align_x", "X residuals", &spec())
            .unwrap();
        assert_eq!(dist.name(), "align_x");
        assert_eq!(dist.bin_count(), 100);
        assert_relative_eq!(dist.bin_width(), 0.1, epsilon = 1e-12);
        assert_eq!(dist.histogram().title(), Some("X residuals"));
    }

    #[test]
    fn test_create_rejects_empty_range() {
        let bad = DistributionSpec {
            bins: 10,
            low: 1.0,
            high: 1.0,
        };
        assert!(HistogramBackend::default()
            .create("bad", "bad", &bad)
            .is_err());
    }

    #[test]
    fn test_fit_restricted_to_range() {
        let mut dist = HistogramBackend::default()
            .create("align_x", "X residuals", &spec())
            .unwrap();
        // Exact gaussian counts, plus a far away spike the window must exclude
        for i in 0..100 {
            let x = dist.bin_center(i);
            let n = (400.0 * (-0.5 * ((x - 0.3) / 0.5f64).powi(2)).exp()).round() as usize;
            for _ in 0..n {
                dist.fill(x);
            }
        }
        for _ in 0..1000 {
            dist.fill(4.05);
        }

        let bounds = ParameterBounds::unbounded(3);
        let result = dist
            .fit(FitModel::Gaussian, &[300.0, 0.2, 0.6], &bounds, (-1.5, 2.0))
            .unwrap();
        assert_relative_eq!(result.parameters[1], 0.3, epsilon = 0.01);
        assert_relative_eq!(result.parameters[2].abs(), 0.5, epsilon = 0.01);
    }

    #[test]
    fn test_fit_respects_bounds() {
        let mut dist = HistogramBackend::default()
            .create("align_x", "X residuals", &spec())
            .unwrap();
        // Every entry in one bin: an unconstrained width would collapse
        for _ in 0..500 {
            dist.fill(0.05);
        }

        let width = dist.bin_width();
        let bounds = ParameterBounds::unbounded(3)
            .with_lower(0, 0.0)
            .with_range(1, -1.0, 1.0)
            .with_range(2, width / 2.0, 2.0);
        let result = dist
            .fit(FitModel::Gaussian, &[500.0, 0.05, width], &bounds, (-1.0, 1.0))
            .unwrap();
        assert!(result.parameters[2] >= width / 2.0);
        assert_relative_eq!(result.parameters[1], 0.05, epsilon = 1e-4);
    }
}
