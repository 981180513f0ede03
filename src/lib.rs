pub mod algebra;
pub mod blend;
pub mod color;
pub mod color_model;
pub mod comp_op;
pub mod composite;
pub mod constraint;
pub mod decision;
pub mod energy;
pub mod error;
pub mod lagrangian;
pub mod unmix;

use anyhow::{Context, Result};
use image::{ImageBuffer, Rgba};
use indicatif::{ParallelProgressIterator, ProgressBar, ProgressStyle};
use nalgebra::{DVector, Vector3};
use rayon::prelude::*;
use std::fs;
use std::path::Path;
use std::sync::Arc;

pub use crate::algebra::{CompositeAlgebra, Registry, standard_registry};
pub use crate::blend::BlendMode;
pub use crate::color_model::{ColorPriorModel, GaussianColorModel, UniformColorModel};
pub use crate::comp_op::CompositeOperator;
pub use crate::composite::{
    LayerStack, composite_layers, composite_two_layers, composite_two_layers_packed,
};
pub use crate::constraint::{
    Target, calculate_constraint_vector, calculate_constraint_vector_packed,
    calculate_derivative_of_constraint_vector, calculate_derivative_of_constraint_vector_packed,
};
pub use crate::energy::{
    EnergyOptions, SharedColorModel, calculate_derivative_of_unmixing_energy,
    calculate_derivative_of_unmixing_energy_packed, calculate_unmixing_energy_term,
    calculate_unmixing_energy_term_packed,
};
pub use crate::error::UnmixError;
pub use crate::lagrangian::{UnmixingProblem, calculate_lagrange_term, calculate_penalty_term};
pub use crate::unmix::{SolverSettings, UnmixResult, unmix_pixel};

use crate::color::{LayerSpec, NormalizedColor, PriorSpec, denormalize_color, normalize_color};
use crate::decision::join_decision_vector;

/// Default standard deviation of a known layer color's Gaussian prior
pub const DEFAULT_PRIOR_SPREAD: f64 = 0.2;

/// Everything needed to decompose an image
#[derive(Debug, Clone)]
pub struct UnmixSettings {
    /// Bottom layer first
    pub layers: Vec<LayerSpec>,
    pub prior_spread: f64,
    pub energy: EnergyOptions,
    pub solver: SolverSettings,
    pub target_alphas: Option<Vec<f64>>,
    pub gray_layers: Vec<usize>,
}

impl UnmixSettings {
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        Self {
            layers,
            prior_spread: DEFAULT_PRIOR_SPREAD,
            energy: EnergyOptions::default(),
            solver: SolverSettings::default(),
            target_alphas: None,
            gray_layers: Vec::new(),
        }
    }
}

/// Per-pixel solver for one stack configuration, shared across threads
pub struct PixelUnmixer {
    stack: LayerStack,
    models: Vec<SharedColorModel>,
    means: Vec<Option<Vector3<f64>>>,
    target_alphas: Option<DVector<f64>>,
    gray_layers: Vec<usize>,
    energy: EnergyOptions,
    solver: SolverSettings,
}

impl PixelUnmixer {
    pub fn new(settings: &UnmixSettings) -> Result<Self, UnmixError> {
        let operators: Vec<CompositeOperator> =
            settings.layers.iter().map(|layer| layer.operator).collect();
        let modes: Vec<BlendMode> = settings.layers.iter().map(|layer| layer.mode).collect();
        let stack = LayerStack::new(&operators, &modes)?;

        let means: Vec<Option<Vector3<f64>>> = settings
            .layers
            .iter()
            .map(|layer| match layer.prior {
                PriorSpec::Known(known) => Some(color::to_vector(normalize_color(known))),
                PriorSpec::Unknown => None,
            })
            .collect();
        let models = means
            .iter()
            .map(|mean| -> SharedColorModel {
                match mean {
                    Some(mean) => Arc::new(GaussianColorModel::isotropic(
                        *mean,
                        settings.prior_spread,
                    )),
                    None => Arc::new(UniformColorModel),
                }
            })
            .collect();

        let target_alphas = settings
            .target_alphas
            .as_ref()
            .map(|alphas| DVector::from_column_slice(alphas));
        let unmixer = Self {
            stack,
            models,
            means,
            target_alphas,
            gray_layers: settings.gray_layers.clone(),
            energy: settings.energy,
            solver: settings.solver,
        };
        // Surface bad target alphas or gray indices before touching any pixel
        unmixer.target(&Vector3::zeros()).validate(unmixer.stack.len())?;
        Ok(unmixer)
    }

    pub fn stack(&self) -> &LayerStack {
        &self.stack
    }

    fn target(&self, observed: &Vector3<f64>) -> Target {
        let mut target = Target::new(*observed).with_gray_layers(self.gray_layers.clone());
        if let Some(alphas) = &self.target_alphas {
            target = target.with_alphas(alphas.clone());
        }
        target
    }

    /// Starting point: opaque bottom layer, half-transparent layers above,
    /// colors at their prior means (the observed color when unknown)
    pub fn initial_guess(&self, observed: &Vector3<f64>) -> DVector<f64> {
        let n = self.stack.len();
        let alphas = DVector::from_fn(n, |i, _| if i == 0 { 1.0 } else { 0.5 });
        let colors = DVector::from_iterator(
            3 * n,
            self.means
                .iter()
                .flat_map(|mean| {
                    let color = mean.unwrap_or(*observed);
                    [color[0], color[1], color[2]]
                }),
        );
        join_decision_vector(&alphas, &colors)
    }

    pub fn unmix(&self, observed: NormalizedColor) -> Result<UnmixResult, UnmixError> {
        let observed = color::to_vector(observed);
        let target = self.target(&observed);
        let problem = UnmixingProblem::new(&self.stack, &self.models, &target, self.energy)?;
        unmix_pixel(&problem, &self.initial_guess(&observed), &self.solver)
    }
}

/// Outcome of decomposing a whole image
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmixReport {
    pub pixels: usize,
    /// Pixels whose residual stayed above the solver tolerance
    pub unconverged: usize,
    /// Pixels the solver rejected as numerically degenerate
    pub degenerate: usize,
}

enum PixelOutcome {
    Transparent,
    Solved(UnmixResult),
    Degenerate,
}

/// Decompose an image into one RGBA image per layer.
///
/// Writes `layer-<i>.png` (bottom layer first) and `recomposited.png` into
/// `output_dir`, creating it if needed.
pub fn process_image<P: AsRef<Path>, Q: AsRef<Path>>(
    input_path: P,
    output_dir: Q,
    settings: &UnmixSettings,
) -> Result<UnmixReport> {
    let input_path = input_path.as_ref();
    let output_dir = output_dir.as_ref();
    let unmixer = PixelUnmixer::new(settings).context("Invalid layer configuration")?;

    // Loading progress
    let load_progress = create_spinner("Loading image...")?;
    let img = image::open(input_path)
        .with_context(|| format!("Failed to open input image: {}", input_path.display()))?;

    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();
    load_progress.finish_and_clear();
    println!(
        "✓ Loaded {} ({}x{} pixels)",
        input_path.file_name().unwrap_or_default().to_string_lossy(),
        width,
        height
    );
    tracing::info!(
        layers = unmixer.stack().len(),
        width,
        height,
        "Decomposing image"
    );

    let total = pixel_count(width, height);
    let progress = create_progress_bar(total)?;

    let pixels: Vec<_> = rgba.pixels().collect();
    let outcomes: Vec<PixelOutcome> = pixels
        .par_iter()
        .progress_with(progress.clone())
        .map(|pixel| {
            if pixel[3] == 0 {
                return PixelOutcome::Transparent;
            }
            let observed = normalize_color([pixel[0], pixel[1], pixel[2]]);
            match unmixer.unmix(observed) {
                Ok(result) => PixelOutcome::Solved(result),
                Err(err) => {
                    tracing::debug!(%err, "Pixel could not be decomposed");
                    PixelOutcome::Degenerate
                }
            }
        })
        .collect();

    progress.finish_with_message(format!("✓ Decomposed {} pixels", total));

    let save_progress = create_spinner("Saving layers...")?;
    fs::create_dir_all(output_dir).with_context(|| {
        format!(
            "Failed to create output directory: {}",
            output_dir.display()
        )
    })?;

    let n = unmixer.stack().len();
    let mut layer_images: Vec<ImageBuffer<Rgba<u8>, Vec<u8>>> =
        (0..n).map(|_| ImageBuffer::new(width, height)).collect();
    let mut recomposited = ImageBuffer::<Rgba<u8>, Vec<u8>>::new(width, height);
    let mut report = UnmixReport {
        pixels: outcomes.len(),
        ..Default::default()
    };

    for (index, outcome) in outcomes.iter().enumerate() {
        let (x, y) = (index as u32 % width, index as u32 / width);
        let result = match outcome {
            PixelOutcome::Solved(result) => result,
            PixelOutcome::Degenerate => {
                report.degenerate += 1;
                continue;
            }
            PixelOutcome::Transparent => continue,
        };
        if !result.converged {
            report.unconverged += 1;
        }

        for (i, layer_image) in layer_images.iter_mut().enumerate() {
            layer_image.put_pixel(
                x,
                y,
                to_rgba(&result.layer_color(i), result.layer_alpha(i)),
            );
        }

        let composite = unmixer
            .stack()
            .composite(&result.alphas, &result.colors, false)?;
        let (color, alpha) = composite::unpack(&composite);
        recomposited.put_pixel(x, y, to_rgba(&color, alpha));
    }

    for (i, layer_image) in layer_images.iter().enumerate() {
        let path = output_dir.join(format!("layer-{}.png", i));
        layer_image
            .save(&path)
            .with_context(|| format!("Failed to save layer image: {}", path.display()))?;
    }
    let recomposited_path = output_dir.join("recomposited.png");
    recomposited.save(&recomposited_path).with_context(|| {
        format!(
            "Failed to save recomposited image: {}",
            recomposited_path.display()
        )
    })?;

    save_progress.finish_and_clear();
    println!("✓ Saved {} layers to {}", n, output_dir.display());

    if report.unconverged > 0 || report.degenerate > 0 {
        tracing::warn!(
            unconverged = report.unconverged,
            degenerate = report.degenerate,
            "Some pixels were not decomposed exactly"
        );
        println!(
            "! {} pixels did not converge, {} were degenerate",
            report.unconverged, report.degenerate
        );
    }

    Ok(report)
}

fn pixel_count(width: u32, height: u32) -> u64 {
    width as u64 * height as u64
}

fn to_rgba(color: &Vector3<f64>, alpha: f64) -> Rgba<u8> {
    let rgb = denormalize_color(color::from_vector(color));
    Rgba([
        rgb[0],
        rgb[1],
        rgb[2],
        (alpha * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

fn create_spinner(message: &'static str) -> Result<ProgressBar> {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
    spinner.set_message(message);
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    Ok(spinner)
}

/// Create a progress bar with consistent styling
fn create_progress_bar(total: u64) -> Result<ProgressBar> {
    let progress = ProgressBar::new(total);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} pixels ({percent}%)")?
            .progress_chars("#>-")
    );
    progress.set_message("Decomposing pixels...");
    Ok(progress)
}
