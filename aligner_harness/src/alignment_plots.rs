//! Diagnostic output of the alignment fits
//!
//! For every fitted sensor the residual distributions are written three
//! ways: an SVG with both axes and their fitted curves, a JSON dump of the
//! bin contents, and the ASCII bar chart of each histogram.

use std::fs;
use std::path::{Path, PathBuf};

use aligner::backend::HistogramDistribution;
use aligner::{AlignError, AlignmentCalibrator, AxisFit};
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use viz::histogram::Histogram;

use crate::HarnessError;

/// Points used to draw a fitted curve
const CURVE_POINTS: usize = 400;

/// Alignment plot configuration
#[derive(Debug, Clone)]
pub struct AlignmentPlotConfig {
    /// Plot width in pixels
    pub width: u32,
    /// Plot height in pixels
    pub height: u32,
    /// Displayed range around the fit window, in units of its half width
    pub zoom: f64,
}

impl Default for AlignmentPlotConfig {
    fn default() -> Self {
        Self {
            width: 1000,
            height: 900,
            zoom: 2.0,
        }
    }
}

/// Bin contents of one residual distribution, with its fit if any
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionDump {
    pub name: String,
    pub low: f64,
    pub high: f64,
    pub entries: u64,
    pub underflow: u64,
    pub overflow: u64,
    pub mean: Option<f64>,
    pub rms: Option<f64>,
    pub bin_centers: Vec<f64>,
    pub counts: Vec<u64>,
    pub fit: Option<AxisFit>,
}

impl DistributionDump {
    pub fn new(histogram: &Histogram, fit: Option<&AxisFit>) -> Self {
        Self {
            name: histogram.name().to_string(),
            low: histogram.low(),
            high: histogram.high(),
            entries: histogram.entries(),
            underflow: histogram.underflow(),
            overflow: histogram.overflow(),
            mean: histogram.mean(),
            rms: histogram.rms(),
            bin_centers: (0..histogram.bin_count())
                .map(|i| histogram.bin_center(i))
                .collect(),
            counts: histogram.counts().to_vec(),
            fit: fit.cloned(),
        }
    }
}

/// Writes the diagnostics of calibrators fitted on the histogram backend
#[derive(Debug, Clone, Default)]
pub struct AlignmentPlotter {
    config: AlignmentPlotConfig,
}

impl AlignmentPlotter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: AlignmentPlotConfig) -> Self {
        Self { config }
    }

    /// Write `<stem>.svg`, `<stem>.json` and `<stem>.txt` into `dir`.
    ///
    /// Returns the written paths. The calibrator must own distributions, so
    /// calibrations loaded from disk have nothing to show.
    pub fn write_diagnostics(
        &self,
        calibrator: &AlignmentCalibrator,
        dir: &Path,
        stem: &str,
    ) -> Result<Vec<PathBuf>, HarnessError> {
        let (x, y) = distributions(calibrator)?;
        let fit = calibrator.fit_summary();
        fs::create_dir_all(dir).map_err(|e| HarnessError::io(dir, e))?;

        let svg_path = dir.join(format!("{stem}.svg"));
        self.write_svg(calibrator, &svg_path)?;

        let json_path = dir.join(format!("{stem}.json"));
        let dumps = vec![
            DistributionDump::new(x.histogram(), fit.map(|f| &f.x)),
            DistributionDump::new(y.histogram(), fit.map(|f| &f.y)),
        ];
        let json = serde_json::to_string_pretty(&dumps)?;
        fs::write(&json_path, json).map_err(|e| HarnessError::io(&json_path, e))?;

        let txt_path = dir.join(format!("{stem}.txt"));
        let text = format!("{}\n{}", x.histogram().format()?, y.histogram().format()?);
        fs::write(&txt_path, text).map_err(|e| HarnessError::io(&txt_path, e))?;

        log::debug!("Alignment diagnostics written to {}", dir.display());
        Ok(vec![svg_path, json_path, txt_path])
    }

    /// Render the X and Y residual distributions stacked in one SVG
    pub fn write_svg(
        &self,
        calibrator: &AlignmentCalibrator,
        path: &Path,
    ) -> Result<(), HarnessError> {
        let (x, y) = distributions(calibrator)?;
        let fit = calibrator.fit_summary();

        let root = SVGBackend::new(path, (self.config.width, self.config.height))
            .into_drawing_area();
        root.fill(&WHITE)?;

        let areas = root.split_evenly((2, 1));
        self.draw_distribution(&areas[0], x.histogram(), fit.map(|f| &f.x), "X residual")?;
        self.draw_distribution(&areas[1], y.histogram(), fit.map(|f| &f.y), "Y residual")?;

        root.present()?;
        Ok(())
    }

    /// Display window: the fit window widened by `zoom`, or the full range
    fn display_range(&self, histogram: &Histogram, fit: Option<&AxisFit>) -> (f64, f64) {
        match fit {
            Some(fit) => {
                let center = 0.5 * (fit.range.0 + fit.range.1);
                let half = 0.5 * (fit.range.1 - fit.range.0) * self.config.zoom;
                let low = (center - half).max(histogram.low());
                let high = (center + half).min(histogram.high());
                if high > low {
                    (low, high)
                } else {
                    (histogram.low(), histogram.high())
                }
            }
            None => (histogram.low(), histogram.high()),
        }
    }

    fn draw_distribution(
        &self,
        area: &DrawingArea<SVGBackend, plotters::coord::Shift>,
        histogram: &Histogram,
        fit: Option<&AxisFit>,
        axis_label: &str,
    ) -> Result<(), HarnessError> {
        let (low, high) = self.display_range(histogram, fit);
        let width = histogram.bin_width();

        let bars: Vec<(f64, f64)> = (0..histogram.bin_count())
            .map(|i| (histogram.bin_low_edge(i), histogram.counts()[i] as f64))
            .filter(|&(edge, _)| edge + width > low && edge < high)
            .collect();
        let max_count = bars.iter().fold(1.0_f64, |m, &(_, c)| m.max(c));

        let title = histogram.title().unwrap_or_else(|| histogram.name());
        let mut chart = ChartBuilder::on(area)
            .caption(title, ("sans-serif", 22))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(55)
            .build_cartesian_2d(low..high, 0.0..max_count * 1.15)?;

        chart
            .configure_mesh()
            .x_desc(axis_label)
            .y_desc("Entries")
            .x_label_formatter(&|x| format!("{x:.3}"))
            .y_label_formatter(&|y| format!("{y:.0}"))
            .draw()?;

        chart.draw_series(bars.iter().map(|&(edge, count)| {
            Rectangle::new(
                [(edge.max(low), 0.0), ((edge + width).min(high), count)],
                BLUE.mix(0.5).filled(),
            )
        }))?;

        if let Some(fit) = fit {
            let step = (high - low) / CURVE_POINTS as f64;
            let curve: Vec<(f64, f64)> = (0..=CURVE_POINTS)
                .map(|i| {
                    let x = low + i as f64 * step;
                    (x, fit.evaluate(x).clamp(0.0, max_count * 1.15))
                })
                .collect();
            chart
                .draw_series(LineSeries::new(curve, RED.stroke_width(2)))?
                .label(format!(
                    "{} offset={:.4} cut={:.4} chi2/ndf={:.2}",
                    fit.model.name(),
                    fit.center,
                    fit.half_width,
                    fit.reduced_chi_squared()
                ))
                .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 10, y)], RED));

            // Acceptance window around the offset
            for edge in [fit.center - fit.half_width, fit.center + fit.half_width] {
                if edge > low && edge < high {
                    chart.draw_series(LineSeries::new(
                        vec![(edge, 0.0), (edge, max_count * 1.15)],
                        BLACK.mix(0.4).stroke_width(1),
                    ))?;
                }
            }

            chart
                .configure_series_labels()
                .background_style(WHITE.mix(0.8))
                .border_style(BLACK)
                .draw()?;
        }

        Ok(())
    }
}

fn distributions(
    calibrator: &AlignmentCalibrator,
) -> Result<(&HistogramDistribution, &HistogramDistribution), HarnessError> {
    match (calibrator.distribution_x(), calibrator.distribution_y()) {
        (Some(x), Some(y)) => Ok((x, y)),
        _ => Err(AlignError::Precondition(
            "calibrator has no residual distributions to draw".to_string(),
        )
        .into()),
    }
}
