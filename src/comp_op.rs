//! Porter–Duff compositing operators.
//!
//! Two overlapping layers split a pixel into three regions: both layers
//! (area `αs·αd`), source only (`αs·(1 − αd)`) and destination only
//! (`αd·(1 − αs)`). An operator decides which regions are painted and what
//! color fills the region where both layers are present.

use std::fmt;
use std::str::FromStr;

use crate::error::UnmixError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompositeOperator {
    SourceOver,
    SourceAtop,
    SourceIn,
    DestinationOver,
    DestinationAtop,
    DestinationIn,
    Xor,
}

/// Color shown where source and destination overlap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapColor {
    /// The blend mode's result `B(cs, cd)`
    Blend,
    Source,
    Destination,
}

/// Which Porter–Duff regions an operator paints, as 0/1 weights
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionWeights {
    pub both: f64,
    pub source: f64,
    pub destination: f64,
    pub overlap: OverlapColor,
}

impl RegionWeights {
    /// Region areas for the given alphas, scaled by the operator's weights,
    /// returned as `(both, source, destination)`
    pub fn areas(&self, alpha_s: f64, alpha_d: f64) -> (f64, f64, f64) {
        (
            self.both * alpha_s * alpha_d,
            self.source * alpha_s * (1.0 - alpha_d),
            self.destination * alpha_d * (1.0 - alpha_s),
        )
    }

    /// Partial derivatives of [`RegionWeights::areas`] with respect to
    /// `alpha_s` and `alpha_d`
    pub fn area_derivatives(&self, alpha_s: f64, alpha_d: f64) -> ([f64; 3], [f64; 3]) {
        (
            [
                self.both * alpha_d,
                self.source * (1.0 - alpha_d),
                -self.destination * alpha_d,
            ],
            [
                self.both * alpha_s,
                -self.source * alpha_s,
                self.destination * (1.0 - alpha_s),
            ],
        )
    }
}

impl CompositeOperator {
    pub const ALL: [CompositeOperator; 7] = [
        CompositeOperator::SourceOver,
        CompositeOperator::SourceAtop,
        CompositeOperator::SourceIn,
        CompositeOperator::DestinationOver,
        CompositeOperator::DestinationAtop,
        CompositeOperator::DestinationIn,
        CompositeOperator::Xor,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CompositeOperator::SourceOver => "source-over",
            CompositeOperator::SourceAtop => "source-atop",
            CompositeOperator::SourceIn => "source-in",
            CompositeOperator::DestinationOver => "destination-over",
            CompositeOperator::DestinationAtop => "destination-atop",
            CompositeOperator::DestinationIn => "destination-in",
            CompositeOperator::Xor => "xor",
        }
    }

    pub fn weights(self) -> RegionWeights {
        let (both, source, destination, overlap) = match self {
            CompositeOperator::SourceOver => (1.0, 1.0, 1.0, OverlapColor::Blend),
            CompositeOperator::SourceAtop => (1.0, 0.0, 1.0, OverlapColor::Blend),
            CompositeOperator::SourceIn => (1.0, 0.0, 0.0, OverlapColor::Blend),
            CompositeOperator::DestinationOver => (1.0, 1.0, 1.0, OverlapColor::Destination),
            CompositeOperator::DestinationAtop => (1.0, 1.0, 0.0, OverlapColor::Destination),
            CompositeOperator::DestinationIn => (1.0, 0.0, 0.0, OverlapColor::Destination),
            CompositeOperator::Xor => (0.0, 1.0, 1.0, OverlapColor::Source),
        };
        RegionWeights {
            both,
            source,
            destination,
            overlap,
        }
    }
}

impl fmt::Display for CompositeOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompositeOperator {
    type Err = UnmixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        CompositeOperator::ALL
            .into_iter()
            .find(|op| op.name() == normalized)
            .ok_or_else(|| UnmixError::UnknownCompositeOperator(s.to_string()))
    }
}
