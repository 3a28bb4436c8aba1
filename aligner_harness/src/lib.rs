//! Aligner harness for simulation and batch analysis
//!
//! This crate provides the infrastructure around the aligner core: event
//! sources backed by files or a synthetic generator, diagnostic plots of
//! the fitted residual distributions, and a runner that drives whole runs
//! and writes their reports.

pub mod alignment_plots;
pub mod jsonl;
pub mod runner;
pub mod synthetic;

use plotters::drawing::DrawingAreaErrorKind;
use thiserror::Error;

pub use alignment_plots::{AlignmentPlotConfig, AlignmentPlotter, DistributionDump};
pub use jsonl::{write_run, JsonLinesEventSource};
pub use runner::{run_analysis, AnalysisOutput};
pub use synthetic::{SyntheticConfig, SyntheticEventSource, SyntheticSensor};

/// Errors produced by the harness
#[derive(Error, Debug)]
pub enum HarnessError {
    /// Error from the aligner core
    #[error(transparent)]
    Align(#[from] aligner::AlignError),

    /// Rendering of a diagnostic image failed
    #[error("plot error: {0}")]
    Plot(String),

    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Text rendering failed
    #[error("text rendering error: {0}")]
    Viz(#[from] viz::VizError),

    /// File system failure
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for HarnessError {
    fn from(e: DrawingAreaErrorKind<E>) -> Self {
        HarnessError::Plot(e.to_string())
    }
}

impl HarnessError {
    pub(crate) fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        HarnessError::Io {
            path: path.into(),
            source,
        }
    }
}
