//! Packing of the decision vector `x = [α₀ … α_{N−1}, c₀ … c_{N−1}]`.

use nalgebra::DVector;

use crate::error::{UnmixError, check_dimension};

/// Split `x` into `(alphas, colors)` for a stack of `layers` layers
pub fn split_decision_vector(
    x: &DVector<f64>,
    layers: usize,
) -> Result<(DVector<f64>, DVector<f64>), UnmixError> {
    check_dimension("decision vector", 4 * layers, x.len())?;
    Ok((
        x.rows(0, layers).into_owned(),
        x.rows(layers, 3 * layers).into_owned(),
    ))
}

pub fn join_decision_vector(alphas: &DVector<f64>, colors: &DVector<f64>) -> DVector<f64> {
    DVector::from_iterator(
        alphas.len() + colors.len(),
        alphas.iter().chain(colors.iter()).copied(),
    )
}
