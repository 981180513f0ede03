use nalgebra::{Matrix3, Vector3};

/// Plausibility prior over layer colors.
///
/// Lower cost means more plausible. Implementations are shared read-only
/// across concurrently solved pixels, hence `Send + Sync`.
pub trait ColorPriorModel: Send + Sync {
    fn cost(&self, color: &Vector3<f64>) -> f64;

    /// Gradient of [`ColorPriorModel::cost`] with respect to `color`
    fn gradient(&self, color: &Vector3<f64>) -> Vector3<f64>;
}

/// Gaussian prior: the cost is the squared Mahalanobis distance to the mean
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianColorModel {
    pub mean: Vector3<f64>,
    pub inverse_covariance: Matrix3<f64>,
}

impl GaussianColorModel {
    /// Returns `None` when the covariance is not invertible
    pub fn new(mean: Vector3<f64>, covariance: Matrix3<f64>) -> Option<Self> {
        let inverse_covariance = covariance.try_inverse()?;
        Some(Self {
            mean,
            // Symmetrize so the gradient formula 2Σ⁻¹d stays exact
            inverse_covariance: (inverse_covariance + inverse_covariance.transpose()) * 0.5,
        })
    }

    /// Same spread `std_dev` along every channel
    pub fn isotropic(mean: Vector3<f64>, std_dev: f64) -> Self {
        Self {
            mean,
            inverse_covariance: Matrix3::identity() / (std_dev * std_dev),
        }
    }
}

impl ColorPriorModel for GaussianColorModel {
    fn cost(&self, color: &Vector3<f64>) -> f64 {
        let diff = color - self.mean;
        diff.dot(&(self.inverse_covariance * diff))
    }

    fn gradient(&self, color: &Vector3<f64>) -> Vector3<f64> {
        (self.inverse_covariance * (color - self.mean)) * 2.0
    }
}

/// Prior that finds every color equally plausible
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UniformColorModel;

impl ColorPriorModel for UniformColorModel {
    fn cost(&self, _color: &Vector3<f64>) -> f64 {
        0.0
    }

    fn gradient(&self, _color: &Vector3<f64>) -> Vector3<f64> {
        Vector3::zeros()
    }
}
