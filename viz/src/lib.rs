//! Text visualisation and binned distributions for alignment analysis.
//!
//! This crate provides the binned distribution used to accumulate
//! position residuals and a couple of ASCII renderers that make the results
//! readable in terminals and log files:
//!
//! - [`histogram::Histogram`]: equal-width binning with under/overflow,
//!   fill-time moments, rebinning and a bar-chart text format.
//! - [`grid::render_ratio_grid`]: character map of per-cell ratios, used for
//!   efficiency maps.
//!
//! ```rust
//! use viz::histogram::Histogram;
//!
//! let mut hist = Histogram::new("residual_x", 20, -1.0, 1.0)?;
//! hist.fill_all(vec![-0.05, 0.01, 0.02, 0.3]);
//! assert_eq!(hist.entries(), 4);
//! println!("{}", hist.format()?);
//! # Ok::<(), viz::VizError>(())
//! ```

use std::fmt;
use thiserror::Error;

/// Error types for visualization operations.
#[derive(Debug, Error)]
pub enum VizError {
    /// Histogram creation or manipulation error.
    #[error("Histogram error: {0}")]
    HistogramError(String),

    /// Ratio grid shape or configuration error.
    #[error("Grid error: {0}")]
    GridError(String),

    /// Text formatting error.
    #[error("Formatting error: {0}")]
    FmtError(#[from] fmt::Error),
}

/// Standard Result type for all visualization operations.
pub type Result<T> = std::result::Result<T, VizError>;

pub mod grid;
pub mod histogram;
