//! Energy of a candidate decomposition:
//!
//! ```text
//! E(x) = Σᵢ cost_i(cᵢ) / (2σ²)
//!      + w_s · Σᵢ αᵢ                     (sparsity, optional)
//!      + w_m · Σᵢ max(0, α_min − αᵢ)²    (minimum alpha, optional)
//! ```

use std::sync::Arc;

use nalgebra::{DVector, Vector3};

use crate::color_model::ColorPriorModel;
use crate::decision::split_decision_vector;
use crate::error::{UnmixError, check_dimension};

/// Default spread of the color prior term
pub const DEFAULT_SIGMA: f64 = 0.5;

/// Shared, read-only color prior for one layer
pub type SharedColorModel = Arc<dyn ColorPriorModel>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnergyOptions {
    /// Scales the prior term by `1 / (2σ²)`
    pub sigma: f64,
    pub use_sparsity: bool,
    pub use_minimum_alpha: bool,
    pub sparsity_weight: f64,
    pub minimum_alpha_weight: f64,
    /// Alphas below this floor are penalized
    pub minimum_alpha: f64,
}

impl Default for EnergyOptions {
    fn default() -> Self {
        Self {
            sigma: DEFAULT_SIGMA,
            use_sparsity: false,
            use_minimum_alpha: false,
            sparsity_weight: 0.1,
            minimum_alpha_weight: 10.0,
            minimum_alpha: 0.05,
        }
    }
}

impl EnergyOptions {
    fn prior_scale(&self) -> f64 {
        1.0 / (2.0 * self.sigma * self.sigma)
    }
}

fn check_inputs(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    models: &[SharedColorModel],
) -> Result<usize, UnmixError> {
    let n = alphas.len();
    if n == 0 {
        return Err(UnmixError::EmptyStack);
    }
    check_dimension("colors", 3 * n, colors.len())?;
    check_dimension("color models", n, models.len())?;
    Ok(n)
}

fn layer_color(colors: &DVector<f64>, i: usize) -> Vector3<f64> {
    Vector3::new(colors[3 * i], colors[3 * i + 1], colors[3 * i + 2])
}

pub fn calculate_unmixing_energy_term(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    models: &[SharedColorModel],
    options: &EnergyOptions,
) -> Result<f64, UnmixError> {
    let n = check_inputs(alphas, colors, models)?;

    let prior: f64 = models
        .iter()
        .enumerate()
        .map(|(i, model)| model.cost(&layer_color(colors, i)))
        .sum();
    let mut energy = options.prior_scale() * prior;

    if options.use_sparsity {
        energy += options.sparsity_weight * alphas.sum();
    }

    if options.use_minimum_alpha {
        let shortfall: f64 = (0..n)
            .map(|i| (options.minimum_alpha - alphas[i]).max(0.0).powi(2))
            .sum();
        energy += options.minimum_alpha_weight * shortfall;
    }

    Ok(energy)
}

/// Gradient of [`calculate_unmixing_energy_term`] over the full decision
/// vector (length 4N, alphas first)
pub fn calculate_derivative_of_unmixing_energy(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    models: &[SharedColorModel],
    options: &EnergyOptions,
) -> Result<DVector<f64>, UnmixError> {
    let n = check_inputs(alphas, colors, models)?;
    let mut gradient = DVector::zeros(4 * n);

    let scale = options.prior_scale();
    for (i, model) in models.iter().enumerate() {
        let grad = model.gradient(&layer_color(colors, i)) * scale;
        gradient.rows_mut(n + 3 * i, 3).copy_from(&grad);
    }

    for i in 0..n {
        if options.use_sparsity {
            gradient[i] += options.sparsity_weight;
        }
        if options.use_minimum_alpha {
            let shortfall = (options.minimum_alpha - alphas[i]).max(0.0);
            gradient[i] -= 2.0 * options.minimum_alpha_weight * shortfall;
        }
    }

    Ok(gradient)
}

pub fn calculate_unmixing_energy_term_packed(
    x: &DVector<f64>,
    models: &[SharedColorModel],
    options: &EnergyOptions,
) -> Result<f64, UnmixError> {
    let (alphas, colors) = split_decision_vector(x, models.len())?;
    calculate_unmixing_energy_term(&alphas, &colors, models, options)
}

pub fn calculate_derivative_of_unmixing_energy_packed(
    x: &DVector<f64>,
    models: &[SharedColorModel],
    options: &EnergyOptions,
) -> Result<DVector<f64>, UnmixError> {
    let (alphas, colors) = split_decision_vector(x, models.len())?;
    calculate_derivative_of_unmixing_energy(&alphas, &colors, models, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color_model::{GaussianColorModel, UniformColorModel};
    use approx::assert_relative_eq;

    fn models() -> Vec<SharedColorModel> {
        vec![
            Arc::new(GaussianColorModel::isotropic(Vector3::new(1.0, 1.0, 1.0), 1.0)),
            Arc::new(UniformColorModel),
        ]
    }

    #[test]
    fn test_prior_term_only() {
        let alphas = DVector::from_vec(vec![1.0, 0.5]);
        let colors = DVector::from_vec(vec![0.5, 1.0, 1.0, 0.2, 0.3, 0.4]);
        let options = EnergyOptions {
            sigma: 1.0,
            ..Default::default()
        };
        // Gaussian cost 0.25, scaled by 1/2
        let energy =
            calculate_unmixing_energy_term(&alphas, &colors, &models(), &options).unwrap();
        assert_relative_eq!(energy, 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_regularizers() {
        let alphas = DVector::from_vec(vec![0.02, 0.6]);
        let colors = DVector::from_vec(vec![1.0; 6]);
        let options = EnergyOptions {
            use_sparsity: true,
            use_minimum_alpha: true,
            ..Default::default()
        };
        let energy =
            calculate_unmixing_energy_term(&alphas, &colors, &models(), &options).unwrap();
        let expected = 0.1 * 0.62 + 10.0 * 0.03f64.powi(2);
        assert_relative_eq!(energy, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_gradient_matches_finite_differences() {
        let x = DVector::from_vec(vec![0.03, 0.7, 0.4, 0.9, 0.1, 0.2, 0.5, 0.6]);
        let options = EnergyOptions {
            use_sparsity: true,
            use_minimum_alpha: true,
            ..Default::default()
        };
        let models = models();
        let analytic =
            calculate_derivative_of_unmixing_energy_packed(&x, &models, &options).unwrap();

        let step = 1e-6;
        for j in 0..x.len() {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[j] += step;
            minus[j] -= step;
            let numeric = (calculate_unmixing_energy_term_packed(&plus, &models, &options)
                .unwrap()
                - calculate_unmixing_energy_term_packed(&minus, &models, &options).unwrap())
                / (2.0 * step);
            assert_relative_eq!(analytic[j], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_dimension_checks() {
        let alphas = DVector::from_vec(vec![0.5, 0.5]);
        let colors = DVector::from_vec(vec![0.5; 6]);
        let one_model: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        assert_eq!(
            calculate_unmixing_energy_term(&alphas, &colors, &one_model, &Default::default())
                .unwrap_err(),
            UnmixError::DimensionMismatch {
                quantity: "color models",
                expected: 2,
                actual: 1,
            }
        );
        assert_eq!(
            calculate_unmixing_energy_term(
                &DVector::zeros(0),
                &DVector::zeros(0),
                &[],
                &Default::default()
            )
            .unwrap_err(),
            UnmixError::EmptyStack
        );
        let x = DVector::from_vec(vec![0.5; 9]);
        assert!(matches!(
            calculate_derivative_of_unmixing_energy_packed(&x, &models(), &Default::default()),
            Err(UnmixError::DimensionMismatch { .. })
        ));
    }
}
