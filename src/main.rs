use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use log::info;

use lpr_lib::api::PlateRecognizer;
use lpr_lib::backend::GstBackend;
use lpr_lib::core::{GraphStrategy, PipelineConfig};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Variant {
    /// Single recognition stage, no rendering
    Plate,
    /// Recognition plus rendered JPEG per input
    Rendered,
    /// Vehicle → plate detection → plate recognition, rendered
    Cascade,
}

/// Recognize license plates in a folder of images and save a copy per plate
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON5 configuration file; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Preset used when no configuration file is given
    #[arg(long, value_enum, default_value = "plate")]
    variant: Variant,

    /// Directory with .jpg/.jpeg/.png inputs
    #[arg(short, long)]
    input_dir: Option<PathBuf>,

    /// Directory for recognized plate copies
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Minimum recognition confidence to keep a result
    #[arg(short, long)]
    threshold: Option<f32>,

    /// Per-image deadline in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Pause between images in milliseconds
    #[arg(long)]
    delay_ms: Option<u64>,

    /// Keep one graph for the whole batch
    #[arg(long)]
    reuse: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => match args.variant {
            Variant::Plate => PipelineConfig::plate_recognition(),
            Variant::Rendered => PipelineConfig::rendered(),
            Variant::Cascade => PipelineConfig::cascade(),
        },
    };

    if let Some(dir) = &args.input_dir {
        config.input_dir = dir.clone();
    }
    if let Some(dir) = &args.output_dir {
        config.output_dir = dir.clone();
    }
    if let Some(threshold) = args.threshold {
        config.confidence_threshold = threshold;
    }
    if let Some(secs) = args.timeout_secs {
        config.run_timeout_secs = secs;
    }
    if let Some(ms) = args.delay_ms {
        config.inter_item_delay_ms = ms;
    }
    if args.reuse {
        config.strategy = GraphStrategy::Reuse;
    }
    Ok(config)
}

fn main() -> Result<()> {
    lpr_lib::init_logging();
    let args = Args::parse();
    let config = load_config(&args)?;

    if !config.input_dir.is_dir() {
        bail!("Input directory {} does not exist", config.input_dir.display());
    }
    let input_dir = config.input_dir.clone();

    let backend = GstBackend::new()?;
    let mut recognizer =
        PlateRecognizer::create(backend, config).context("Failed to build pipeline")?;
    let summary = recognizer
        .process_dir(&input_dir)
        .context("Batch aborted")?;

    info!(
        "🏁 {} image(s): {} recognized, {} failed, {} plate file(s) written",
        summary.processed,
        summary.succeeded,
        summary.failed,
        summary.saved.len()
    );
    Ok(())
}
