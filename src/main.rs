use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use unblend::{
    DEFAULT_PRIOR_SPREAD, EnergyOptions, SolverSettings, UnmixSettings,
    color::{LayerSpec, parse_layer_spec},
    energy::DEFAULT_SIGMA,
    process_image,
};

#[derive(Parser, Debug)]
#[command(
    name = "unblend",
    about = "Decompose a flattened image into a stack of blended, semi-transparent layers",
    version,
    disable_version_flag = true
)]
struct Args {
    /// Input image path
    input: PathBuf,

    /// Output directory (optional, defaults to the input name with a -layers suffix)
    output: Option<PathBuf>,

    /// Layers from bottom to top, as COLOR, MODE:COLOR or MODE:OPERATOR:COLOR.
    /// COLOR is a hex color (e.g., f00, ff0000, #ff0000) or 'auto' for unknown.
    /// Example: --layer ffffff multiply:auto screen:source-atop:00f
    #[arg(short = 'l', long = "layer", num_args = 1.., value_name = "SPEC", required = true)]
    layers: Vec<String>,

    /// Standard deviation of the Gaussian prior around each known layer color
    #[arg(long = "spread", value_name = "FLOAT", default_value_t = DEFAULT_PRIOR_SPREAD)]
    spread: f64,

    /// Weight of the color prior term, as 1 / (2 sigma^2)
    #[arg(long = "sigma", value_name = "FLOAT", default_value_t = DEFAULT_SIGMA)]
    sigma: f64,

    /// Prefer decompositions with fewer visible layers
    #[arg(long = "sparsity")]
    sparsity: bool,

    /// Penalize layers whose alpha falls below a small floor
    #[arg(long = "min-alpha")]
    min_alpha: bool,

    /// Indices of layers (0 = bottom) whose color must be gray
    #[arg(short = 'g', long = "gray", num_args = 1.., value_name = "INDEX")]
    gray_layers: Vec<usize>,

    /// Fixed alpha for every layer, bottom first (0.0-1.0)
    #[arg(short = 'a', long = "target-alphas", num_args = 1.., value_name = "FLOAT")]
    target_alphas: Vec<f64>,

    /// Maximum number of augmented Lagrangian iterations per pixel
    #[arg(long = "max-iterations", value_name = "COUNT")]
    max_iterations: Option<usize>,

    /// Print version
    #[arg(short = 'v', short_alias = 'V', long = "version", action = clap::ArgAction::Version)]
    version: (),
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let layers = parse_layer_specs(&args.layers)?;
    let settings = build_settings(&args, layers)?;

    let output_dir = determine_output_dir(&args.input, args.output.as_deref())?;
    tracing::debug!(output = %output_dir.display(), "Resolved output directory");

    process_image(&args.input, &output_dir, &settings)?;

    Ok(())
}

/// Log to stderr, filtered by `RUST_LOG` (warnings only by default)
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("warn"))
        .unwrap_or_default();

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

/// Validate numeric options and assemble the settings for [`process_image`]
fn build_settings(args: &Args, layers: Vec<LayerSpec>) -> Result<UnmixSettings> {
    if !(args.spread > 0.0 && args.spread.is_finite()) {
        anyhow::bail!("Spread must be a positive number, got: {}", args.spread);
    }
    if !(args.sigma > 0.0 && args.sigma.is_finite()) {
        anyhow::bail!("Sigma must be a positive number, got: {}", args.sigma);
    }

    let target_alphas = if args.target_alphas.is_empty() {
        None
    } else {
        if args.target_alphas.len() != layers.len() {
            anyhow::bail!(
                "Expected {} target alphas (one per layer), got: {}",
                layers.len(),
                args.target_alphas.len()
            );
        }
        if let Some(alpha) = args
            .target_alphas
            .iter()
            .find(|alpha| !(0.0..=1.0).contains(*alpha))
        {
            anyhow::bail!("Target alphas must be between 0.0 and 1.0, got: {}", alpha);
        }
        Some(args.target_alphas.clone())
    };

    if let Some(&index) = args.gray_layers.iter().find(|&&index| index >= layers.len()) {
        anyhow::bail!(
            "Gray layer index {} is out of range for {} layers",
            index,
            layers.len()
        );
    }

    let mut solver = SolverSettings::default();
    if let Some(max_iterations) = args.max_iterations {
        if max_iterations == 0 {
            anyhow::bail!("Max iterations must be at least 1");
        }
        solver.max_outer_iterations = max_iterations;
    }

    Ok(UnmixSettings {
        layers,
        prior_spread: args.spread,
        energy: EnergyOptions {
            sigma: args.sigma,
            use_sparsity: args.sparsity,
            use_minimum_alpha: args.min_alpha,
            ..Default::default()
        },
        solver,
        target_alphas,
        gray_layers: args.gray_layers.clone(),
    })
}

/// Determine the directory the layer images are written to
///
/// If output is provided, use it as-is.
/// If output is None, use the input's file stem with a -layers suffix next to it.
/// If that already exists, append -1, -2, etc. until we find an unused name.
fn determine_output_dir(input: &Path, output: Option<&Path>) -> Result<PathBuf> {
    if let Some(output) = output {
        return Ok(output.to_path_buf());
    }

    let input_stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .context("Invalid input filename")?;

    let parent = input.parent().unwrap_or_else(|| Path::new("."));

    let base_output = parent.join(format!("{}-layers", input_stem));
    if !base_output.exists() {
        return Ok(base_output);
    }

    for i in 1..1000 {
        let numbered_output = parent.join(format!("{}-layers-{}", input_stem, i));
        if !numbered_output.exists() {
            return Ok(numbered_output);
        }
    }

    anyhow::bail!("Could not generate unique output directory (tried up to -layers-999)")
}

/// Parse layer specifications from command line arguments
fn parse_layer_specs(layer_strings: &[String]) -> Result<Vec<LayerSpec>> {
    layer_strings
        .iter()
        .enumerate()
        .map(|(i, spec_str)| {
            parse_layer_spec(spec_str)
                .with_context(|| format!("Invalid layer specification #{}: {}", i + 1, spec_str))
        })
        .collect()
}
