use std::path::PathBuf;

use aligner::RunId;
use aligner_harness::jsonl::{run_file, write_run};
use aligner_harness::synthetic::generate_run;
use aligner_harness::SyntheticConfig;
use anyhow::Context;
use clap::Parser;

/// Command line arguments for the synthetic event generator
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Write synthetic strip sensor runs as JSON lines"
)]
struct Args {
    /// JSON generator configuration, defaults when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output directory for run<NNNNNN>.jsonl files
    #[arg(short, long, default_value = "events")]
    output_dir: PathBuf,

    /// Run to generate, may be repeated
    #[arg(short, long = "run", default_value = "1")]
    runs: Vec<RunId>,

    /// Override the number of events per run
    #[arg(short = 'n', long)]
    events: Option<usize>,

    /// Override the RNG seed
    #[arg(long)]
    seed: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config: SyntheticConfig = match &args.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SyntheticConfig::default(),
    };
    if let Some(events) = args.events {
        config.events = events;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    for &run in &args.runs {
        let events = generate_run(&config, run).with_context(|| format!("generating run {run}"))?;
        let path = run_file(&args.output_dir, run);
        write_run(&path, &events).with_context(|| format!("writing {}", path.display()))?;
        println!("Run {run}: {} events -> {}", events.len(), path.display());
    }
    Ok(())
}
