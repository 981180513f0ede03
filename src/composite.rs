//! Forward compositing of two layers and of a whole layer stack, with the
//! local Jacobians needed to differentiate through the stack.
//!
//! Packed layers are `Vector4` values laid out as `(r, g, b, α)`.

use nalgebra::{DMatrix, DVector, Matrix4, Vector3, Vector4};

use crate::algebra::{CompositeAlgebra, Registry, standard_registry};
use crate::blend::BlendMode;
use crate::comp_op::CompositeOperator;
use crate::error::{UnmixError, check_dimension};

/// Jacobians of one composite result `(r, g, b, α)` with respect to the
/// packed source and destination layers
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeJacobian {
    pub wrt_source: Matrix4<f64>,
    pub wrt_destination: Matrix4<f64>,
}

pub fn pack(color: &Vector3<f64>, alpha: f64) -> Vector4<f64> {
    Vector4::new(color[0], color[1], color[2], alpha)
}

pub fn unpack(x: &Vector4<f64>) -> (Vector3<f64>, f64) {
    (Vector3::new(x[0], x[1], x[2]), x[3])
}

/// Composite `x_s` over `x_d` with an already resolved algebra
pub fn composite_resolved(
    algebra: &CompositeAlgebra,
    x_s: &Vector4<f64>,
    x_d: &Vector4<f64>,
    crop: bool,
) -> Vector4<f64> {
    let (c_s, alpha_s) = unpack(x_s);
    let (c_d, alpha_d) = unpack(x_d);

    let (w_both, w_source, w_destination) = algebra.weights().areas(alpha_s, alpha_d);
    let alpha = w_both + w_source + w_destination;
    let overlap = algebra.overlap_color(&c_s, &c_d);
    let color = (overlap * w_both + c_s * w_source + c_d * w_destination) / alpha;

    pack(&color, if crop { alpha_d } else { alpha })
}

/// Like [`composite_resolved`], also returning the local Jacobians
pub fn composite_resolved_with_jacobian(
    algebra: &CompositeAlgebra,
    x_s: &Vector4<f64>,
    x_d: &Vector4<f64>,
    crop: bool,
) -> (Vector4<f64>, CompositeJacobian) {
    let (c_s, alpha_s) = unpack(x_s);
    let (c_d, alpha_d) = unpack(x_d);
    let weights = algebra.weights();

    let (w_both, w_source, w_destination) = weights.areas(alpha_s, alpha_d);
    let (dw_s, dw_d) = weights.area_derivatives(alpha_s, alpha_d);
    let alpha = w_both + w_source + w_destination;
    let dalpha_s: f64 = dw_s.iter().sum();
    let dalpha_d: f64 = dw_d.iter().sum();

    let overlap = algebra.overlap_color(&c_s, &c_d);
    let (doverlap_s, doverlap_d) = algebra.overlap_derivative(&c_s, &c_d);
    let color = (overlap * w_both + c_s * w_source + c_d * w_destination) / alpha;

    let mut wrt_source = Matrix4::zeros();
    let mut wrt_destination = Matrix4::zeros();
    for k in 0..3 {
        wrt_source[(k, k)] = (w_both * doverlap_s[k] + w_source) / alpha;
        wrt_destination[(k, k)] = (w_both * doverlap_d[k] + w_destination) / alpha;

        // Quotient rule through the region areas
        let dnumerator_s = dw_s[0] * overlap[k] + dw_s[1] * c_s[k] + dw_s[2] * c_d[k];
        let dnumerator_d = dw_d[0] * overlap[k] + dw_d[1] * c_s[k] + dw_d[2] * c_d[k];
        wrt_source[(k, 3)] = (dnumerator_s - color[k] * dalpha_s) / alpha;
        wrt_destination[(k, 3)] = (dnumerator_d - color[k] * dalpha_d) / alpha;
    }

    let result_alpha = if crop {
        wrt_destination[(3, 3)] = 1.0;
        alpha_d
    } else {
        wrt_source[(3, 3)] = dalpha_s;
        wrt_destination[(3, 3)] = dalpha_d;
        alpha
    };

    (
        pack(&color, result_alpha),
        CompositeJacobian {
            wrt_source,
            wrt_destination,
        },
    )
}

/// Composite a source layer onto a destination layer.
///
/// Returns `(r, g, b, α)`. With `crop` the result alpha is the destination
/// alpha. Zero result alpha yields non-finite colors, which are returned as-is.
pub fn composite_two_layers(
    c_s: &Vector3<f64>,
    c_d: &Vector3<f64>,
    alpha_s: f64,
    alpha_d: f64,
    operator: CompositeOperator,
    mode: BlendMode,
    crop: bool,
) -> Result<Vector4<f64>, UnmixError> {
    composite_two_layers_packed(
        &pack(c_s, alpha_s),
        &pack(c_d, alpha_d),
        operator,
        mode,
        crop,
    )
}

pub fn composite_two_layers_packed(
    x_s: &Vector4<f64>,
    x_d: &Vector4<f64>,
    operator: CompositeOperator,
    mode: BlendMode,
    crop: bool,
) -> Result<Vector4<f64>, UnmixError> {
    let algebra = standard_registry().lookup(operator, mode)?;
    Ok(composite_resolved(&algebra, x_s, x_d, crop))
}

/// Fold a stack of layers, bottom (index 0) first.
pub fn composite_layers(
    alphas: &DVector<f64>,
    colors: &DVector<f64>,
    operators: &[CompositeOperator],
    modes: &[BlendMode],
    crop: bool,
) -> Result<Vector4<f64>, UnmixError> {
    LayerStack::new(operators, modes)?.composite(alphas, colors, crop)
}

/// An ordered stack of layers with their algebras resolved once.
///
/// Layer 0 is the bottom of the stack. Its own operator and mode are never
/// applied: it is the initial destination of the fold.
#[derive(Debug, Clone)]
pub struct LayerStack {
    layers: usize,
    /// Algebra for layer `i + 1` folded onto everything below it
    folds: Vec<CompositeAlgebra>,
}

impl LayerStack {
    pub fn new(
        operators: &[CompositeOperator],
        modes: &[BlendMode],
    ) -> Result<Self, UnmixError> {
        Self::with_registry(standard_registry(), operators, modes)
    }

    /// Resolve the stack against `registry`. Only the pairs of layers
    /// `1..N` are looked up, since the bottom layer is never folded.
    pub fn with_registry(
        registry: &Registry,
        operators: &[CompositeOperator],
        modes: &[BlendMode],
    ) -> Result<Self, UnmixError> {
        if operators.is_empty() {
            return Err(UnmixError::EmptyStack);
        }
        check_dimension("blend modes", operators.len(), modes.len())?;

        let folds = operators
            .iter()
            .zip(modes)
            .skip(1)
            .map(|(&operator, &mode)| registry.lookup(operator, mode))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            layers: operators.len(),
            folds,
        })
    }

    /// Number of layers
    pub fn len(&self) -> usize {
        self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers == 0
    }

    /// Size of the decision vector `[alphas; colors]`
    pub fn decision_dimension(&self) -> usize {
        4 * self.len()
    }

    pub(crate) fn check_layers(
        &self,
        alphas: &DVector<f64>,
        colors: &DVector<f64>,
    ) -> Result<(), UnmixError> {
        check_dimension("alphas", self.len(), alphas.len())?;
        check_dimension("colors", 3 * self.len(), colors.len())
    }

    pub fn composite(
        &self,
        alphas: &DVector<f64>,
        colors: &DVector<f64>,
        crop: bool,
    ) -> Result<Vector4<f64>, UnmixError> {
        self.check_layers(alphas, colors)?;
        let last = self.len() - 1;

        let mut result = layer(alphas, colors, 0);
        for (i, algebra) in (1..).zip(&self.folds) {
            result = composite_resolved(
                algebra,
                &layer(alphas, colors, i),
                &result,
                crop && i == last,
            );
        }
        Ok(result)
    }

    /// Composite result and its 4×4N Jacobian with respect to the decision
    /// vector `[alphas; colors]`.
    pub fn composite_with_jacobian(
        &self,
        alphas: &DVector<f64>,
        colors: &DVector<f64>,
        crop: bool,
    ) -> Result<(Vector4<f64>, DMatrix<f64>), UnmixError> {
        self.check_layers(alphas, colors)?;
        let n = self.len();
        let last = n - 1;

        let mut steps = Vec::with_capacity(last);
        let mut result = layer(alphas, colors, 0);
        for (i, algebra) in (1..).zip(&self.folds) {
            let (next, step) = composite_resolved_with_jacobian(
                algebra,
                &layer(alphas, colors, i),
                &result,
                crop && i == last,
            );
            result = next;
            steps.push(step);
        }

        // Backward pass: `upstream` is ∂result/∂(running result before fold i)
        let mut jacobian = DMatrix::zeros(4, 4 * n);
        let mut upstream = Matrix4::<f64>::identity();
        for (i, step) in steps.iter().enumerate().rev().map(|(j, s)| (j + 1, s)) {
            scatter_layer_block(&mut jacobian, n, i, &(upstream * step.wrt_source));
            upstream *= step.wrt_destination;
        }
        scatter_layer_block(&mut jacobian, n, 0, &upstream);

        Ok((result, jacobian))
    }
}

/// Packed `(r, g, b, α)` of layer `i`
pub(crate) fn layer(alphas: &DVector<f64>, colors: &DVector<f64>, i: usize) -> Vector4<f64> {
    Vector4::new(
        colors[3 * i],
        colors[3 * i + 1],
        colors[3 * i + 2],
        alphas[i],
    )
}

// Column layout of the decision vector: alpha of layer i at column i, its
// color channels at n + 3i .. n + 3i + 3.
fn scatter_layer_block(jacobian: &mut DMatrix<f64>, n: usize, i: usize, block: &Matrix4<f64>) {
    for row in 0..4 {
        for k in 0..3 {
            jacobian[(row, n + 3 * i + k)] = block[(row, k)];
        }
        jacobian[(row, i)] = block[(row, 3)];
    }
}
