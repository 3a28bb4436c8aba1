//! Fixed-range binned distributions
//!
//! A [`Histogram`] has equally spaced bins over `[low, high)`, counts values
//! falling outside the range in underflow/overflow, and keeps fill-time
//! moments so that mean and RMS do not depend on the binning.

use crate::{Result, VizError};
use std::fmt::Write;

/// Scale type for histogram display
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scale {
    /// Linear scale
    Linear,
    /// Logarithmic scale (base 10)
    Log10,
}

/// Configuration for histogram display
#[derive(Debug, Clone)]
pub struct HistogramConfig {
    /// Title for the histogram
    pub title: Option<String>,
    /// Character to use for bars
    pub bar_char: char,
    /// Whether to show percentage
    pub show_percentage: bool,
    /// Whether to show counts
    pub show_counts: bool,
    /// Scale type
    pub scale: Scale,
    /// Whether to show empty bins
    pub show_empty_bins: bool,
    /// Maximum bar width in characters
    pub max_bar_width: usize,
}

impl Default for HistogramConfig {
    fn default() -> Self {
        Self {
            title: None,
            bar_char: '#',
            show_percentage: true,
            show_counts: true,
            scale: Scale::Linear,
            show_empty_bins: false,
            max_bar_width: 40,
        }
    }
}

/// Histogram of real values with equal-width bins
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Identifier, e.g. `align_x_run000123_sensor02`
    name: String,
    /// Lower edge of the first bin
    low: f64,
    /// Upper edge of the last bin
    high: f64,
    /// Counts in each bin
    counts: Vec<u64>,
    /// Values below `low`
    underflow: u64,
    /// Values at or above `high`
    overflow: u64,
    /// Every accepted fill, in range or not
    entries: u64,
    /// Number of in-range fills contributing to the moments
    moment_count: u64,
    /// Sum of in-range values
    sum: f64,
    /// Sum of squared in-range values
    sum_squares: f64,
    /// Display configuration
    config: HistogramConfig,
}

impl Histogram {
    /// Create an empty histogram with `bins` equal bins over `[low, high)`.
    pub fn new(name: impl Into<String>, bins: usize, low: f64, high: f64) -> Result<Self> {
        if bins == 0 {
            return Err(VizError::HistogramError(
                "Histogram must have at least 1 bin".to_string(),
            ));
        }
        if !low.is_finite() || !high.is_finite() || low >= high {
            return Err(VizError::HistogramError(format!(
                "Histogram range must be finite and ascending, got [{low}, {high})"
            )));
        }

        Ok(Self {
            name: name.into(),
            low,
            high,
            counts: vec![0; bins],
            underflow: 0,
            overflow: 0,
            entries: 0,
            moment_count: 0,
            sum: 0.0,
            sum_squares: 0.0,
            config: HistogramConfig::default(),
        })
    }

    /// Set the configuration for the histogram
    pub fn with_config(mut self, config: HistogramConfig) -> Self {
        self.config = config;
        self
    }

    /// Histogram identifier
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display title, if one was configured
    pub fn title(&self) -> Option<&str> {
        self.config.title.as_deref()
    }

    /// Add a value to the histogram. Non-finite values are ignored.
    pub fn fill(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        self.entries += 1;

        if value < self.low {
            self.underflow += 1;
            return;
        }
        if value >= self.high {
            self.overflow += 1;
            return;
        }

        let idx = ((value - self.low) / self.bin_width()) as usize;
        let idx = idx.min(self.counts.len() - 1);
        self.counts[idx] += 1;
        self.moment_count += 1;
        self.sum += value;
        self.sum_squares += value * value;
    }

    /// Add multiple values to the histogram
    pub fn fill_all<I>(&mut self, values: I)
    where
        I: IntoIterator<Item = f64>,
    {
        for value in values {
            self.fill(value);
        }
    }

    /// Number of fills, including under- and overflow
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Number of bins
    pub fn bin_count(&self) -> usize {
        self.counts.len()
    }

    /// Lower edge of the range
    pub fn low(&self) -> f64 {
        self.low
    }

    /// Upper edge of the range
    pub fn high(&self) -> f64 {
        self.high
    }

    /// Width of every bin
    pub fn bin_width(&self) -> f64 {
        (self.high - self.low) / self.counts.len() as f64
    }

    /// Lower edge of bin `idx`
    pub fn bin_low_edge(&self, idx: usize) -> f64 {
        self.low + self.bin_width() * idx as f64
    }

    /// Center of bin `idx`
    pub fn bin_center(&self, idx: usize) -> f64 {
        self.low + self.bin_width() * (idx as f64 + 0.5)
    }

    /// Get the counts in each bin
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Values that fell below the range
    pub fn underflow(&self) -> u64 {
        self.underflow
    }

    /// Values that fell at or above the range, plus bins dropped by rebinning
    pub fn overflow(&self) -> u64 {
        self.overflow
    }

    /// Index of the fullest bin; the first one wins ties.
    ///
    /// Returns None when every bin is empty.
    pub fn maximum_bin(&self) -> Option<usize> {
        let mut best: Option<(usize, u64)> = None;
        for (i, &count) in self.counts.iter().enumerate() {
            if count > best.map_or(0, |(_, c)| c) {
                best = Some((i, count));
            }
        }
        best.map(|(i, _)| i)
    }

    /// Content of the fullest bin
    pub fn maximum(&self) -> u64 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    /// Mean of the in-range values
    pub fn mean(&self) -> Option<f64> {
        if self.moment_count == 0 {
            return None;
        }
        Some(self.sum / self.moment_count as f64)
    }

    /// Root mean square deviation of the in-range values from their mean
    pub fn rms(&self) -> Option<f64> {
        let mean = self.mean()?;
        let variance = self.sum_squares / self.moment_count as f64 - mean * mean;
        Some(variance.max(0.0).sqrt())
    }

    /// Merge groups of `factor` consecutive bins into one.
    ///
    /// If `factor` does not divide the bin count, the upper edge is lowered to
    /// the end of the last complete group and the left-over bins are moved to
    /// overflow. Factors above the bin count are clamped to it. Moments are
    /// left untouched.
    pub fn rebin(&mut self, factor: usize) -> Result<()> {
        if factor == 0 {
            return Err(VizError::HistogramError(
                "Rebin factor must be at least 1".to_string(),
            ));
        }
        let factor = factor.min(self.counts.len());
        if factor == 1 {
            return Ok(());
        }

        let width = self.bin_width();
        let new_bins = self.counts.len() / factor;
        let mut merged = Vec::with_capacity(new_bins);
        for group in self.counts.chunks(factor) {
            if group.len() == factor {
                merged.push(group.iter().sum());
            } else {
                self.overflow += group.iter().sum::<u64>();
            }
        }

        self.high = self.low + width * (new_bins * factor) as f64;
        self.counts = merged;
        Ok(())
    }

    /// Bin centers and contents of every bin whose center lies in `[from, to]`
    pub fn bins_in_range(&self, from: f64, to: f64) -> Vec<(f64, u64)> {
        (0..self.counts.len())
            .map(|i| (self.bin_center(i), self.counts[i]))
            .filter(|&(x, _)| x >= from && x <= to)
            .collect()
    }

    /// Format the histogram as a string
    pub fn format(&self) -> Result<String> {
        let mut output = String::new();

        let title = self.config.title.as_deref().unwrap_or(&self.name);
        writeln!(output, "{title}")?;
        writeln!(output, "{}", "=".repeat(title.len()))?;

        // Calculate maximum count for scaling
        let max_count = self.maximum().max(1) as f64;

        let count_column_width = self
            .counts
            .iter()
            .map(|c| c.to_string().len())
            .max()
            .unwrap_or(5)
            .max(5)
            + 2;

        let mut header = String::new();
        write!(header, "{:<19} ", "Range")?;
        if self.config.show_counts {
            write!(header, "| {:<width$} ", "Count", width = count_column_width)?;
        }
        if self.config.show_percentage {
            write!(header, "| {:<10} ", "Percentage")?;
        }
        write!(header, "| Bar")?;

        writeln!(output, "{header}")?;
        writeln!(output, "{}", "-".repeat(header.len()))?;

        let format_with_sign = |val: f64| -> String {
            if val < 0.0 {
                format!("{val:.3}")
            } else {
                format!("+{val:.3}")
            }
        };

        for (i, &count) in self.counts.iter().enumerate() {
            if count == 0 && !self.config.show_empty_bins {
                continue;
            }

            let percentage = if self.entries > 0 {
                (count as f64 / self.entries as f64) * 100.0
            } else {
                0.0
            };

            let bar_length = match self.config.scale {
                Scale::Linear => {
                    ((count as f64 / max_count) * self.config.max_bar_width as f64).round() as usize
                }
                Scale::Log10 => {
                    if count > 0 {
                        ((count as f64).log10() * 10.0).round() as usize
                    } else {
                        0
                    }
                }
            };

            write!(
                output,
                "{:<8} - {:<8}",
                format_with_sign(self.bin_low_edge(i)),
                format_with_sign(self.bin_low_edge(i + 1)),
            )?;

            if self.config.show_counts {
                write!(output, " | {:<width$} ", count, width = count_column_width)?;
            }

            if self.config.show_percentage {
                write!(output, "| {percentage:5.2}%      ")?;
            }

            writeln!(
                output,
                "| {}",
                self.config.bar_char.to_string().repeat(bar_length)
            )?;
        }

        writeln!(
            output,
            "entries={} underflow={} overflow={}",
            self.entries, self.underflow, self.overflow
        )?;

        if self.config.scale == Scale::Log10 {
            writeln!(
                output,
                "Note: Bar lengths use log10 scale (each {} represents a power of 10)",
                self.config.bar_char
            )?;
        }

        Ok(output)
    }
}
