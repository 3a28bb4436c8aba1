use std::path::PathBuf;

use aligner::{DriverConfig, RunId, SensorId};
use aligner_harness::{run_analysis, JsonLinesEventSource};
use anyhow::Context;
use clap::Parser;

/// Command line arguments for the strip efficiency analysis
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Align strip sensors and measure their hit efficiency"
)]
struct Args {
    /// JSON driver configuration; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding run<NNNNNN>.jsonl event files
    #[arg(short, long, default_value = "events")]
    events_dir: PathBuf,

    /// Run to analyse, may be repeated
    #[arg(short, long = "run")]
    runs: Vec<RunId>,

    /// Sensor expected in every run, may be repeated
    #[arg(short, long = "sensor")]
    sensors: Vec<SensorId>,

    /// Refit the alignment even when calibration files exist
    #[arg(long)]
    force_alignment: bool,

    /// X matching window in units of the fitted X cut
    #[arg(long)]
    n_sigma: Option<f64>,

    /// Directory for calibration files
    #[arg(long)]
    calibration_dir: Option<PathBuf>,

    /// Directory for reports and diagnostics
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Skip the per-sensor fit diagnostics
    #[arg(long)]
    no_diagnostics: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = match &args.config {
        Some(path) => DriverConfig::load_from_file(path)
            .with_context(|| format!("loading configuration {}", path.display()))?,
        None => DriverConfig::default(),
    };
    if !args.runs.is_empty() {
        config.runs = args.runs.clone();
    }
    if !args.sensors.is_empty() {
        config.sensors = args.sensors.clone();
    }
    if args.force_alignment {
        config.force_alignment = true;
    }
    if let Some(n_sigma) = args.n_sigma {
        config.calibrator.n_sigma = n_sigma;
    }
    if let Some(dir) = &args.calibration_dir {
        config.calibration_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if args.no_diagnostics {
        config.write_diagnostics = false;
    }
    config.validate().context("invalid configuration")?;

    let mut source = JsonLinesEventSource::new(&args.events_dir);
    let output = run_analysis(&config, &mut source).context("strip efficiency analysis failed")?;

    for report in &output.reports {
        println!(
            "Run {} ({:?} calibration, {} alignment / {} efficiency events)",
            report.run,
            report.calibration_source,
            report.alignment_events,
            report.efficiency_events
        );
        for sensor in &report.sensors {
            let offset = sensor.calibration.offset;
            let cuts = sensor.calibration.cuts;
            let efficiency = match sensor.efficiency.as_ref().and_then(|e| e.efficiency.zip(e.error)) {
                Some((value, error)) => format!("{value:.4} +/- {error:.4}"),
                None => "n/a".to_string(),
            };
            println!(
                "  sensor {:3}: offset ({:+.4}, {:+.4}) cuts ({:.4}, {:.4}) efficiency {}",
                sensor.sensor, offset.x, offset.y, cuts.x, cuts.y, efficiency
            );
        }
    }
    println!(
        "{} files written to {}",
        output.files.len(),
        config.output_dir.display()
    );
    Ok(())
}
