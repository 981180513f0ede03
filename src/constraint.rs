//! Equality constraints `C(x) = 0` tying a decomposition to the observed
//! pixel, and their Jacobian.
//!
//! Blocks, in order:
//! 1. composited color − target color (3 rows)
//! 2. αᵢ − target αᵢ for every layer (N rows, only with target alphas)
//! 3. per gray layer g: `c_g.r − c_g.g` and `c_g.g − c_g.b` (2 rows each)

use nalgebra::{DMatrix, DVector, Vector3};

use crate::composite::LayerStack;
use crate::decision::split_decision_vector;
use crate::error::{UnmixError, check_dimension};

/// What a decomposition has to reproduce
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    /// Observed, flattened pixel color
    pub color: Vector3<f64>,
    /// Per-layer alphas to match, if any
    pub alphas: Option<DVector<f64>>,
    /// Layers whose color must be achromatic
    pub gray_layers: Vec<usize>,
}

impl Target {
    pub fn new(color: Vector3<f64>) -> Self {
        Self {
            color,
            alphas: None,
            gray_layers: Vec::new(),
        }
    }

    pub fn with_alphas(mut self, alphas: DVector<f64>) -> Self {
        self.alphas = Some(alphas);
        self
    }

    pub fn with_gray_layers(mut self, gray_layers: Vec<usize>) -> Self {
        self.gray_layers = gray_layers;
        self
    }

    /// Length of the constraint vector for a stack of `layers` layers
    pub fn constraint_dimension(&self, layers: usize) -> usize {
        let alpha_rows = if self.alphas.is_some() { layers } else { 0 };
        3 + alpha_rows + 2 * self.gray_layers.len()
    }

    pub(crate) fn validate(&self, layers: usize) -> Result<(), UnmixError> {
        if let Some(alphas) = &self.alphas {
            check_dimension("target alphas", layers, alphas.len())?;
        }
        match self.gray_layers.iter().find(|&&index| index >= layers) {
            Some(&index) => Err(UnmixError::LayerOutOfRange { index, layers }),
            None => Ok(()),
        }
    }
}

pub fn calculate_constraint_vector(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    stack: &LayerStack,
    target: &Target,
) -> Result<DVector<f64>, UnmixError> {
    let n = stack.len();
    target.validate(n)?;
    let composite = stack.composite(alphas, colors, false)?;

    let mut constraints = DVector::zeros(target.constraint_dimension(n));
    for k in 0..3 {
        constraints[k] = composite[k] - target.color[k];
    }

    let mut row = 3;
    if let Some(target_alphas) = &target.alphas {
        for i in 0..n {
            constraints[row + i] = alphas[i] - target_alphas[i];
        }
        row += n;
    }

    for &g in &target.gray_layers {
        constraints[row] = colors[3 * g] - colors[3 * g + 1];
        constraints[row + 1] = colors[3 * g + 1] - colors[3 * g + 2];
        row += 2;
    }

    Ok(constraints)
}

/// Jacobian of [`calculate_constraint_vector`]: one row per constraint,
/// one column per decision variable (4N, alphas first)
pub fn calculate_derivative_of_constraint_vector(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    stack: &LayerStack,
    target: &Target,
) -> Result<DMatrix<f64>, UnmixError> {
    let n = stack.len();
    target.validate(n)?;
    let (_, composite_jacobian) = stack.composite_with_jacobian(alphas, colors, false)?;

    let mut jacobian = DMatrix::zeros(target.constraint_dimension(n), 4 * n);
    jacobian
        .rows_mut(0, 3)
        .copy_from(&composite_jacobian.rows(0, 3));

    let mut row = 3;
    if target.alphas.is_some() {
        for i in 0..n {
            jacobian[(row + i, i)] = 1.0;
        }
        row += n;
    }

    for &g in &target.gray_layers {
        let column = n + 3 * g;
        jacobian[(row, column)] = 1.0;
        jacobian[(row, column + 1)] = -1.0;
        jacobian[(row + 1, column + 1)] = 1.0;
        jacobian[(row + 1, column + 2)] = -1.0;
        row += 2;
    }

    Ok(jacobian)
}

pub fn calculate_constraint_vector_packed(
    x: &DVector<f64>,
    stack: &LayerStack,
    target: &Target,
) -> Result<DVector<f64>, UnmixError> {
    let (alphas, colors) = split_decision_vector(x, stack.len())?;
    calculate_constraint_vector(&alphas, &colors, stack, target)
}

pub fn calculate_derivative_of_constraint_vector_packed(
    x: &DVector<f64>,
    stack: &LayerStack,
    target: &Target,
) -> Result<DMatrix<f64>, UnmixError> {
    let (alphas, colors) = split_decision_vector(x, stack.len())?;
    calculate_derivative_of_constraint_vector(&alphas, &colors, stack, target)
}
