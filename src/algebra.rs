use std::collections::HashMap;
use std::sync::OnceLock;

use nalgebra::Vector3;

use crate::blend::{BlendFunctions, BlendMode};
use crate::comp_op::{CompositeOperator, OverlapColor, RegionWeights};
use crate::error::UnmixError;

/// A resolved (operator, blend mode) pair: region geometry plus the blend
/// value/derivative functions used where the layers overlap
#[derive(Debug, Clone, Copy)]
pub struct CompositeAlgebra {
    pub operator: CompositeOperator,
    pub mode: BlendMode,
    weights: RegionWeights,
    blend: BlendFunctions,
}

impl CompositeAlgebra {
    pub fn new(operator: CompositeOperator, mode: BlendMode, blend: BlendFunctions) -> Self {
        Self {
            operator,
            mode,
            weights: operator.weights(),
            blend,
        }
    }

    pub fn weights(&self) -> &RegionWeights {
        &self.weights
    }

    /// Color of the overlap region for a source/destination pair
    pub fn overlap_color(&self, c_s: &Vector3<f64>, c_d: &Vector3<f64>) -> Vector3<f64> {
        match self.weights.overlap {
            OverlapColor::Blend => c_s.zip_map(c_d, self.blend.value),
            OverlapColor::Source => *c_s,
            OverlapColor::Destination => *c_d,
        }
    }

    /// Per-channel derivatives of [`CompositeAlgebra::overlap_color`] with
    /// respect to the source and destination channel. Channels are
    /// independent, so these are the diagonals of the 3×3 Jacobians.
    pub fn overlap_derivative(
        &self,
        c_s: &Vector3<f64>,
        c_d: &Vector3<f64>,
    ) -> (Vector3<f64>, Vector3<f64>) {
        match self.weights.overlap {
            OverlapColor::Blend => {
                let mut wrt_source = Vector3::zeros();
                let mut wrt_destination = Vector3::zeros();
                for k in 0..3 {
                    let (ds, dd) = (self.blend.derivative)(c_s[k], c_d[k]);
                    wrt_source[k] = ds;
                    wrt_destination[k] = dd;
                }
                (wrt_source, wrt_destination)
            }
            OverlapColor::Source => (Vector3::repeat(1.0), Vector3::zeros()),
            OverlapColor::Destination => (Vector3::zeros(), Vector3::repeat(1.0)),
        }
    }
}

/// Table from (operator, blend mode) to the algebra that evaluates it
#[derive(Debug, Clone, Default)]
pub struct Registry {
    entries: HashMap<(CompositeOperator, BlendMode), CompositeAlgebra>,
}

impl Registry {
    /// An empty registry; every lookup fails until pairs are inserted
    pub fn new() -> Self {
        Self::default()
    }

    /// Every built-in operator combined with every built-in blend mode
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for operator in CompositeOperator::ALL {
            for mode in BlendMode::ALL {
                registry.insert(CompositeAlgebra::new(operator, mode, mode.functions()));
            }
        }
        registry
    }

    pub fn insert(&mut self, algebra: CompositeAlgebra) {
        self.entries
            .insert((algebra.operator, algebra.mode), algebra);
    }

    pub fn lookup(
        &self,
        operator: CompositeOperator,
        mode: BlendMode,
    ) -> Result<CompositeAlgebra, UnmixError> {
        self.entries
            .get(&(operator, mode))
            .copied()
            .ok_or(UnmixError::UnregisteredAlgebra { operator, mode })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Shared read-only copy of [`Registry::standard`]
pub fn standard_registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(Registry::standard)
}
