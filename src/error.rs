use thiserror::Error;

use crate::blend::BlendMode;
use crate::comp_op::CompositeOperator;

/// Errors raised by the unmixing core and the reference solver.
///
/// Everything here is a hard failure for the evaluation call that produced
/// it. Non-finite arithmetic inside the core is *not* an error: it is
/// propagated as-is so that derivative bugs stay visible.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnmixError {
    /// A vector or slice does not have the size the layer stack requires
    #[error("Dimension mismatch for {quantity}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being checked (e.g. "decision vector")
        quantity: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A layer stack needs at least one layer
    #[error("Layer stack must contain at least one layer")]
    EmptyStack,

    /// A layer index (e.g. a gray layer) does not exist in the stack
    #[error("Layer index {index} is out of range for a stack of {layers} layers")]
    LayerOutOfRange { index: usize, layers: usize },

    /// No value/derivative pair is registered for this operator and mode
    #[error("No compositing algebra registered for {operator} with blend mode {mode}")]
    UnregisteredAlgebra {
        operator: CompositeOperator,
        mode: BlendMode,
    },

    #[error("Unknown blend mode: {0}")]
    UnknownBlendMode(String),

    #[error("Unknown compositing operator: {0}")]
    UnknownCompositeOperator(String),

    /// The solver hit a non-finite merit value
    #[error("Non-finite value encountered in {context}")]
    NumericDegeneracy { context: &'static str },
}

/// Fail with [`UnmixError::DimensionMismatch`] unless `actual == expected`
pub(crate) fn check_dimension(
    quantity: &'static str,
    expected: usize,
    actual: usize,
) -> Result<(), UnmixError> {
    if expected == actual {
        Ok(())
    } else {
        Err(UnmixError::DimensionMismatch {
            quantity,
            expected,
            actual,
        })
    }
}
