//! Reference augmented-Lagrangian solver for one pixel.
//!
//! The inner loop minimizes the merit function over the box
//! `αᵢ ∈ [alpha_floor, 1]`, `cᵢ ∈ [0, 1]³` by projected gradient descent
//! (Barzilai–Borwein step, Armijo backtracking). The outer loop updates the
//! multipliers and grows the penalty while the residual does not shrink.

use nalgebra::{DVector, Vector3};
use tracing::{debug, trace};

use crate::decision::split_decision_vector;
use crate::error::{UnmixError, check_dimension};
use crate::lagrangian::{MeritEvaluation, UnmixingProblem};

/// Sufficient decrease constant of the Armijo test
const ARMIJO: f64 = 1e-4;
const MAX_BACKTRACKS: usize = 40;
const MIN_STEP: f64 = 1e-12;
const MAX_STEP: f64 = 1e6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverSettings {
    pub max_outer_iterations: usize,
    pub max_inner_iterations: usize,
    pub initial_penalty: f64,
    /// Factor applied to ρ when the residual did not shrink enough
    pub penalty_growth: f64,
    pub max_penalty: f64,
    /// Required ratio between consecutive residuals to keep ρ unchanged
    pub residual_shrink: f64,
    /// Converged once ‖C(x)‖ drops to this value
    pub constraint_tolerance: f64,
    pub step_tolerance: f64,
    /// Lower bound on every alpha, keeps composite alphas away from zero
    pub alpha_floor: f64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_outer_iterations: 20,
            max_inner_iterations: 200,
            initial_penalty: 10.0,
            penalty_growth: 10.0,
            max_penalty: 1e6,
            residual_shrink: 0.25,
            constraint_tolerance: 1e-4,
            step_tolerance: 1e-10,
            alpha_floor: 1e-3,
        }
    }
}

/// Recovered layers for one pixel
#[derive(Debug, Clone, PartialEq)]
pub struct UnmixResult {
    pub alphas: DVector<f64>,
    pub colors: DVector<f64>,
    /// ‖C(x)‖ at the returned point
    pub residual: f64,
    pub energy: f64,
    pub outer_iterations: usize,
    pub converged: bool,
}

impl UnmixResult {
    pub fn layer_color(&self, i: usize) -> Vector3<f64> {
        Vector3::new(
            self.colors[3 * i],
            self.colors[3 * i + 1],
            self.colors[3 * i + 2],
        )
    }

    pub fn layer_alpha(&self, i: usize) -> f64 {
        self.alphas[i]
    }
}

/// Solve one pixel starting from `initial` (a packed decision vector)
pub fn unmix_pixel(
    problem: &UnmixingProblem<'_>,
    initial: &DVector<f64>,
    settings: &SolverSettings,
) -> Result<UnmixResult, UnmixError> {
    check_dimension("decision vector", problem.decision_dimension(), initial.len())?;
    let layers = problem.layers();

    let mut x = project(initial.clone(), layers, settings.alpha_floor);
    let mut lambda = DVector::zeros(problem.constraint_dimension());
    let mut rho = settings.initial_penalty;
    let mut residual = finite_residual(&problem.constraints(&x)?)?;
    let mut previous_residual = f64::INFINITY;
    let mut outer_iterations = 0;
    let mut converged = residual <= settings.constraint_tolerance;

    while !converged && outer_iterations < settings.max_outer_iterations {
        outer_iterations += 1;
        x = minimize_merit(problem, x, &lambda, rho, settings)?;

        let constraints = problem.constraints(&x)?;
        residual = finite_residual(&constraints)?;
        trace!(outer_iterations, residual, rho, "augmented Lagrangian iteration");

        if residual <= settings.constraint_tolerance {
            converged = true;
            break;
        }

        lambda = problem.update_multipliers(&lambda, &constraints, rho)?;
        if residual > settings.residual_shrink * previous_residual {
            rho = (rho * settings.penalty_growth).min(settings.max_penalty);
        }
        previous_residual = residual;
    }

    if !converged {
        debug!(residual, outer_iterations, "pixel did not reach the constraint tolerance");
    }

    let energy = problem.energy(&x)?;
    let (alphas, colors) = split_decision_vector(&x, layers)?;
    Ok(UnmixResult {
        alphas,
        colors,
        residual,
        energy,
        outer_iterations,
        converged,
    })
}

fn finite_residual(constraints: &DVector<f64>) -> Result<f64, UnmixError> {
    let residual = constraints.norm();
    if residual.is_finite() {
        Ok(residual)
    } else {
        Err(UnmixError::NumericDegeneracy {
            context: "constraint residual",
        })
    }
}

/// Clamp alphas to `[alpha_floor, 1]` and colors to `[0, 1]`
fn project(mut x: DVector<f64>, layers: usize, alpha_floor: f64) -> DVector<f64> {
    for (j, value) in x.iter_mut().enumerate() {
        let lower = if j < layers { alpha_floor } else { 0.0 };
        *value = value.clamp(lower, 1.0);
    }
    x
}

fn evaluate_finite(
    problem: &UnmixingProblem<'_>,
    x: &DVector<f64>,
    lambda: &DVector<f64>,
    rho: f64,
) -> Result<MeritEvaluation, UnmixError> {
    let evaluation = problem.evaluate(x, lambda, rho)?;
    if evaluation.value.is_finite() && evaluation.gradient.iter().all(|g| g.is_finite()) {
        Ok(evaluation)
    } else {
        Err(UnmixError::NumericDegeneracy {
            context: "augmented Lagrangian",
        })
    }
}

fn minimize_merit(
    problem: &UnmixingProblem<'_>,
    mut x: DVector<f64>,
    lambda: &DVector<f64>,
    rho: f64,
    settings: &SolverSettings,
) -> Result<DVector<f64>, UnmixError> {
    let layers = problem.layers();
    let mut current = evaluate_finite(problem, &x, lambda, rho)?;
    let mut step = 1.0 / current.gradient.amax().max(1.0);

    for _ in 0..settings.max_inner_iterations {
        let mut accepted = None;
        let mut t = step;
        for _ in 0..MAX_BACKTRACKS {
            let candidate = project(&x - &current.gradient * t, layers, settings.alpha_floor);
            let direction = &candidate - &x;
            if direction.norm() <= settings.step_tolerance {
                // Projected stationary point
                return Ok(x);
            }

            let value = problem.value(&candidate, lambda, rho)?;
            if value.is_finite() && value <= current.value + ARMIJO * current.gradient.dot(&direction)
            {
                accepted = Some(candidate);
                break;
            }
            t *= 0.5;
        }

        let Some(candidate) = accepted else {
            trace!(rho, "line search failed to make progress");
            break;
        };

        let next = evaluate_finite(problem, &candidate, lambda, rho)?;
        let s = &candidate - &x;
        let y = &next.gradient - &current.gradient;
        let curvature = s.dot(&y);
        step = if curvature > 0.0 {
            (s.norm_squared() / curvature).clamp(MIN_STEP, MAX_STEP)
        } else {
            (t * 2.0).min(MAX_STEP)
        };

        x = candidate;
        current = next;
        if s.norm() <= settings.step_tolerance {
            break;
        }
    }

    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use crate::color_model::{GaussianColorModel, UniformColorModel};
    use crate::comp_op::CompositeOperator;
    use crate::composite::LayerStack;
    use crate::constraint::Target;
    use crate::energy::{EnergyOptions, SharedColorModel};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    #[test]
    fn test_single_layer_matches_target() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver], &[BlendMode::Normal])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::new(0.2, 0.4, 0.6));
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();

        let initial = DVector::from_vec(vec![1.0, 0.5, 0.5, 0.5]);
        let result = unmix_pixel(&problem, &initial, &SolverSettings::default()).unwrap();

        assert!(result.converged);
        assert!(result.residual <= 1e-4);
        assert_relative_eq!(
            result.layer_color(0),
            Vector3::new(0.2, 0.4, 0.6),
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_two_layer_multiply_recomposites_to_target() {
        let stack = LayerStack::new(
            &[CompositeOperator::SourceOver; 2],
            &[BlendMode::Normal, BlendMode::Multiply],
        )
        .unwrap();
        let models: Vec<SharedColorModel> = vec![
            Arc::new(GaussianColorModel::isotropic(Vector3::new(1.0, 1.0, 1.0), 0.2)),
            Arc::new(GaussianColorModel::isotropic(Vector3::new(1.0, 0.0, 0.0), 0.2)),
        ];
        // White background with a half-transparent multiplied red on top
        let target = Target::new(Vector3::new(0.95, 0.55, 0.55));
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();

        let initial = DVector::from_vec(vec![1.0, 0.5, 1.0, 1.0, 1.0, 1.0, 0.0, 0.0]);
        let result = unmix_pixel(&problem, &initial, &SolverSettings::default()).unwrap();
        assert!(result.converged, "residual {}", result.residual);

        let recomposited = stack
            .composite(&result.alphas, &result.colors, false)
            .unwrap();
        for k in 0..3 {
            assert_relative_eq!(recomposited[k], target.color[k], epsilon = 1e-3);
        }
        for value in result.alphas.iter().chain(result.colors.iter()) {
            assert!((0.0..=1.0).contains(value));
        }
    }

    #[test]
    fn test_gray_constraint_is_enforced() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver], &[BlendMode::Normal])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::new(0.3, 0.3, 0.3)).with_gray_layers(vec![0]);
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();

        let initial = DVector::from_vec(vec![1.0, 0.9, 0.1, 0.5]);
        let result = unmix_pixel(&problem, &initial, &SolverSettings::default()).unwrap();
        assert!(result.converged);
        let color = result.layer_color(0);
        assert_relative_eq!(color[0], color[1], epsilon = 1e-3);
        assert_relative_eq!(color[1], color[2], epsilon = 1e-3);
    }

    #[test]
    fn test_degenerate_stack_is_reported() {
        // Two opaque layers under xor cancel out completely: α = 0
        let stack = LayerStack::new(&[CompositeOperator::Xor; 2], &[BlendMode::Normal; 2])
            .unwrap();
        let uniform: SharedColorModel = Arc::new(UniformColorModel);
        let models = vec![uniform; 2];
        let target = Target::new(Vector3::new(0.5, 0.5, 0.5));
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();

        let initial = DVector::from_vec(vec![1.0, 1.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5]);
        assert!(matches!(
            unmix_pixel(&problem, &initial, &SolverSettings::default()),
            Err(UnmixError::NumericDegeneracy { .. })
        ));
    }

    #[test]
    fn test_feasible_start_reports_zero_residual() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver], &[BlendMode::Normal])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::new(0.2, 0.4, 0.6));
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();
        let initial = DVector::from_vec(vec![1.0, 0.2, 0.4, 0.6]);

        for max_outer_iterations in [0, 20] {
            let settings = SolverSettings {
                max_outer_iterations,
                ..Default::default()
            };
            let result = unmix_pixel(&problem, &initial, &settings).unwrap();
            assert!(result.converged);
            assert_eq!(result.residual, 0.0);
            assert_eq!(result.outer_iterations, 0);
            assert_eq!(result.layer_color(0), Vector3::new(0.2, 0.4, 0.6));
        }

        // Without iterations the residual still describes the returned point
        let settings = SolverSettings {
            max_outer_iterations: 0,
            ..Default::default()
        };
        let result =
            unmix_pixel(&problem, &DVector::from_vec(vec![1.0, 0.5, 0.4, 0.6]), &settings)
                .unwrap();
        assert!(!result.converged);
        assert_relative_eq!(result.residual, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_initial_dimension_is_checked() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver], &[BlendMode::Normal])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::zeros());
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();
        assert!(matches!(
            unmix_pixel(&problem, &DVector::zeros(3), &SolverSettings::default()),
            Err(UnmixError::DimensionMismatch { .. })
        ));
    }
}
