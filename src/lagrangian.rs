//! Augmented-Lagrangian merit function handed to the solver:
//!
//! ```text
//! L(x; λ, ρ) = E(x) − λᵀC(x) + ½ρ‖C(x)‖²
//! ∇L         = ∇E − Jᵀλ + ρ JᵀC
//! ```

use nalgebra::DVector;

use crate::composite::LayerStack;
use crate::constraint::{
    Target, calculate_constraint_vector, calculate_derivative_of_constraint_vector,
};
use crate::decision::split_decision_vector;
use crate::energy::{
    EnergyOptions, SharedColorModel, calculate_derivative_of_unmixing_energy,
    calculate_unmixing_energy_term,
};
use crate::error::{UnmixError, check_dimension};

/// `−λᵀC`
pub fn calculate_lagrange_term(
    constraint_vector: &DVector<f64>,
    lambda: &DVector<f64>,
) -> Result<f64, UnmixError> {
    check_dimension("multipliers", constraint_vector.len(), lambda.len())?;
    Ok(-lambda.dot(constraint_vector))
}

/// `½ρ‖C‖²`
pub fn calculate_penalty_term(constraint_vector: &DVector<f64>, rho: f64) -> f64 {
    0.5 * rho * constraint_vector.norm_squared()
}

/// Merit value and everything the solver needs from one evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct MeritEvaluation {
    pub value: f64,
    pub gradient: DVector<f64>,
    pub energy: f64,
    pub constraints: DVector<f64>,
}

/// One pixel's unmixing problem: the stack, its priors and the target
#[derive(Clone)]
pub struct UnmixingProblem<'a> {
    stack: &'a LayerStack,
    models: &'a [SharedColorModel],
    target: &'a Target,
    energy: EnergyOptions,
}

impl<'a> UnmixingProblem<'a> {
    pub fn new(
        stack: &'a LayerStack,
        models: &'a [SharedColorModel],
        target: &'a Target,
        energy: EnergyOptions,
    ) -> Result<Self, UnmixError> {
        check_dimension("color models", stack.len(), models.len())?;
        target.validate(stack.len())?;
        Ok(Self {
            stack,
            models,
            target,
            energy,
        })
    }

    pub fn layers(&self) -> usize {
        self.stack.len()
    }

    pub fn decision_dimension(&self) -> usize {
        self.stack.decision_dimension()
    }

    pub fn constraint_dimension(&self) -> usize {
        self.target.constraint_dimension(self.layers())
    }

    pub fn energy(&self, x: &DVector<f64>) -> Result<f64, UnmixError> {
        let (alphas, colors) = split_decision_vector(x, self.layers())?;
        calculate_unmixing_energy_term(&alphas, &colors, self.models, &self.energy)
    }

    pub fn constraints(&self, x: &DVector<f64>) -> Result<DVector<f64>, UnmixError> {
        let (alphas, colors) = split_decision_vector(x, self.layers())?;
        calculate_constraint_vector(&alphas, &colors, self.stack, self.target)
    }

    /// Merit value only, for line searches
    pub fn value(&self, x: &DVector<f64>, lambda: &DVector<f64>, rho: f64) -> Result<f64, UnmixError> {
        let (alphas, colors) = split_decision_vector(x, self.layers())?;
        let energy = calculate_unmixing_energy_term(&alphas, &colors, self.models, &self.energy)?;
        let constraints = calculate_constraint_vector(&alphas, &colors, self.stack, self.target)?;
        Ok(energy
            + calculate_lagrange_term(&constraints, lambda)?
            + calculate_penalty_term(&constraints, rho))
    }

    pub fn evaluate(
        &self,
        x: &DVector<f64>,
        lambda: &DVector<f64>,
        rho: f64,
    ) -> Result<MeritEvaluation, UnmixError> {
        let (alphas, colors) = split_decision_vector(x, self.layers())?;
        let energy = calculate_unmixing_energy_term(&alphas, &colors, self.models, &self.energy)?;
        let constraints = calculate_constraint_vector(&alphas, &colors, self.stack, self.target)?;
        let value = energy
            + calculate_lagrange_term(&constraints, lambda)?
            + calculate_penalty_term(&constraints, rho);

        let jacobian =
            calculate_derivative_of_constraint_vector(&alphas, &colors, self.stack, self.target)?;
        let energy_gradient =
            calculate_derivative_of_unmixing_energy(&alphas, &colors, self.models, &self.energy)?;
        let gradient = energy_gradient + jacobian.tr_mul(&(&constraints * rho - lambda));

        Ok(MeritEvaluation {
            value,
            gradient,
            energy,
            constraints,
        })
    }

    /// First-order multiplier update `λ − ρC`
    pub fn update_multipliers(
        &self,
        lambda: &DVector<f64>,
        constraints: &DVector<f64>,
        rho: f64,
    ) -> Result<DVector<f64>, UnmixError> {
        check_dimension("multipliers", constraints.len(), lambda.len())?;
        Ok(lambda - constraints * rho)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendMode;
    use crate::color_model::{GaussianColorModel, UniformColorModel};
    use crate::comp_op::CompositeOperator;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;
    use std::sync::Arc;

    #[test]
    fn test_lagrange_and_penalty_terms() {
        let constraints = DVector::from_vec(vec![0.5, -1.0, 2.0]);
        let lambda = DVector::from_vec(vec![2.0, 1.0, 0.5]);
        assert_relative_eq!(
            calculate_lagrange_term(&constraints, &lambda).unwrap(),
            -1.0,
            epsilon = 1e-12
        );
        assert_relative_eq!(calculate_penalty_term(&constraints, 4.0), 10.5, epsilon = 1e-12);
        assert!(matches!(
            calculate_lagrange_term(&constraints, &DVector::zeros(2)),
            Err(UnmixError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_merit_gradient_matches_finite_differences() {
        let stack = LayerStack::new(
            &[CompositeOperator::SourceOver; 2],
            &[BlendMode::Normal, BlendMode::Screen],
        )
        .unwrap();
        let models: Vec<SharedColorModel> = vec![
            Arc::new(UniformColorModel),
            Arc::new(GaussianColorModel::isotropic(Vector3::new(0.9, 0.1, 0.1), 0.3)),
        ];
        let target = Target::new(Vector3::new(0.6, 0.4, 0.3))
            .with_alphas(DVector::from_vec(vec![1.0, 0.5]))
            .with_gray_layers(vec![0]);
        let options = EnergyOptions {
            use_sparsity: true,
            use_minimum_alpha: true,
            ..Default::default()
        };
        let problem = UnmixingProblem::new(&stack, &models, &target, options).unwrap();
        assert_eq!(problem.constraint_dimension(), 3 + 2 + 2);

        let x = DVector::from_vec(vec![0.85, 0.45, 0.3, 0.5, 0.55, 0.7, 0.25, 0.35]);
        let lambda = DVector::from_vec(vec![0.3, -0.2, 0.1, 0.05, -0.4, 0.2, 0.1]);
        let rho = 3.0;
        let evaluation = problem.evaluate(&x, &lambda, rho).unwrap();
        assert_relative_eq!(
            evaluation.value,
            problem.value(&x, &lambda, rho).unwrap(),
            epsilon = 1e-12
        );

        let step = 1e-6;
        for j in 0..x.len() {
            let mut plus = x.clone();
            let mut minus = x.clone();
            plus[j] += step;
            minus[j] -= step;
            let numeric = (problem.value(&plus, &lambda, rho).unwrap()
                - problem.value(&minus, &lambda, rho).unwrap())
                / (2.0 * step);
            assert_relative_eq!(evaluation.gradient[j], numeric, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_multiplier_update() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver], &[BlendMode::Normal])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::new(0.5, 0.5, 0.5));
        let problem =
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()).unwrap();

        let lambda = DVector::from_vec(vec![1.0, 1.0, 1.0]);
        let constraints = DVector::from_vec(vec![0.1, -0.2, 0.0]);
        let updated = problem.update_multipliers(&lambda, &constraints, 10.0).unwrap();
        assert_relative_eq!(
            updated,
            DVector::from_vec(vec![0.0, 3.0, 1.0]),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_problem_rejects_mismatched_models() {
        let stack = LayerStack::new(&[CompositeOperator::SourceOver; 2], &[BlendMode::Normal; 2])
            .unwrap();
        let models: Vec<SharedColorModel> = vec![Arc::new(UniformColorModel)];
        let target = Target::new(Vector3::zeros());
        assert!(matches!(
            UnmixingProblem::new(&stack, &models, &target, EnergyOptions::default()),
            Err(UnmixError::DimensionMismatch {
                quantity: "color models",
                ..
            })
        ));
    }
}
