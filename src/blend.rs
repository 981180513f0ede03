//! Separable blend modes and their partial derivatives.
//!
//! Every mode works channel by channel: `value(s, d)` combines a source
//! channel `s` with a destination (backdrop) channel `d`, and
//! `derivative(s, d)` returns `(∂B/∂s, ∂B/∂d)`. Piecewise modes use the
//! derivative of the branch their value function selects.

use std::fmt;
use std::str::FromStr;

use crate::error::UnmixError;

/// Per-pixel color combination applied before alpha compositing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    LinearDodge,
    LinearBurn,
}

/// Value function of a separable blend mode
pub type BlendValueFn = fn(f64, f64) -> f64;

/// Partial derivatives `(∂B/∂s, ∂B/∂d)` of a separable blend mode
pub type BlendDerivativeFn = fn(f64, f64) -> (f64, f64);

/// A blend mode's value function together with its derivative
#[derive(Clone, Copy)]
pub struct BlendFunctions {
    pub value: BlendValueFn,
    pub derivative: BlendDerivativeFn,
}

impl fmt::Debug for BlendFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlendFunctions").finish_non_exhaustive()
    }
}

impl BlendMode {
    pub const ALL: [BlendMode; 14] = [
        BlendMode::Normal,
        BlendMode::Multiply,
        BlendMode::Screen,
        BlendMode::Overlay,
        BlendMode::Darken,
        BlendMode::Lighten,
        BlendMode::ColorDodge,
        BlendMode::ColorBurn,
        BlendMode::HardLight,
        BlendMode::SoftLight,
        BlendMode::Difference,
        BlendMode::Exclusion,
        BlendMode::LinearDodge,
        BlendMode::LinearBurn,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
            BlendMode::LinearDodge => "linear-dodge",
            BlendMode::LinearBurn => "linear-burn",
        }
    }

    /// The built-in value/derivative pair for this mode
    pub fn functions(self) -> BlendFunctions {
        let (value, derivative): (BlendValueFn, BlendDerivativeFn) = match self {
            BlendMode::Normal => (normal, d_normal),
            BlendMode::Multiply => (multiply, d_multiply),
            BlendMode::Screen => (screen, d_screen),
            BlendMode::Overlay => (overlay, d_overlay),
            BlendMode::Darken => (darken, d_darken),
            BlendMode::Lighten => (lighten, d_lighten),
            BlendMode::ColorDodge => (color_dodge, d_color_dodge),
            BlendMode::ColorBurn => (color_burn, d_color_burn),
            BlendMode::HardLight => (hard_light, d_hard_light),
            BlendMode::SoftLight => (soft_light, d_soft_light),
            BlendMode::Difference => (difference, d_difference),
            BlendMode::Exclusion => (exclusion, d_exclusion),
            BlendMode::LinearDodge => (linear_dodge, d_linear_dodge),
            BlendMode::LinearBurn => (linear_burn, d_linear_burn),
        };
        BlendFunctions { value, derivative }
    }
}

impl fmt::Display for BlendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendMode {
    type Err = UnmixError;

    /// Accepts the kebab-case name, case-insensitively, with `_` or `-`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        BlendMode::ALL
            .into_iter()
            .find(|mode| mode.name() == normalized)
            .ok_or_else(|| UnmixError::UnknownBlendMode(s.to_string()))
    }
}

fn normal(s: f64, _d: f64) -> f64 {
    s
}

fn d_normal(_s: f64, _d: f64) -> (f64, f64) {
    (1.0, 0.0)
}

fn multiply(s: f64, d: f64) -> f64 {
    s * d
}

fn d_multiply(s: f64, d: f64) -> (f64, f64) {
    (d, s)
}

fn screen(s: f64, d: f64) -> f64 {
    s + d - s * d
}

fn d_screen(s: f64, d: f64) -> (f64, f64) {
    (1.0 - d, 1.0 - s)
}

// Overlay is hard-light with the roles of source and destination swapped.
fn overlay(s: f64, d: f64) -> f64 {
    hard_light(d, s)
}

fn d_overlay(s: f64, d: f64) -> (f64, f64) {
    let (dd, ds) = d_hard_light(d, s);
    (ds, dd)
}

fn darken(s: f64, d: f64) -> f64 {
    if s <= d { s } else { d }
}

fn d_darken(s: f64, d: f64) -> (f64, f64) {
    if s <= d { (1.0, 0.0) } else { (0.0, 1.0) }
}

fn lighten(s: f64, d: f64) -> f64 {
    if s >= d { s } else { d }
}

fn d_lighten(s: f64, d: f64) -> (f64, f64) {
    if s >= d { (1.0, 0.0) } else { (0.0, 1.0) }
}

fn color_dodge(s: f64, d: f64) -> f64 {
    if d == 0.0 {
        0.0
    } else if s >= 1.0 {
        1.0
    } else {
        (d / (1.0 - s)).min(1.0)
    }
}

fn d_color_dodge(s: f64, d: f64) -> (f64, f64) {
    if d == 0.0 || s >= 1.0 {
        return (0.0, 0.0);
    }
    let inv = 1.0 / (1.0 - s);
    if d * inv < 1.0 {
        (d * inv * inv, inv)
    } else {
        (0.0, 0.0)
    }
}

fn color_burn(s: f64, d: f64) -> f64 {
    if d >= 1.0 {
        1.0
    } else if s <= 0.0 {
        0.0
    } else {
        1.0 - ((1.0 - d) / s).min(1.0)
    }
}

fn d_color_burn(s: f64, d: f64) -> (f64, f64) {
    if d >= 1.0 || s <= 0.0 {
        return (0.0, 0.0);
    }
    let ratio = (1.0 - d) / s;
    if ratio < 1.0 {
        (ratio / s, 1.0 / s)
    } else {
        (0.0, 0.0)
    }
}

fn hard_light(s: f64, d: f64) -> f64 {
    if s <= 0.5 {
        2.0 * s * d
    } else {
        screen(2.0 * s - 1.0, d)
    }
}

fn d_hard_light(s: f64, d: f64) -> (f64, f64) {
    if s <= 0.5 {
        (2.0 * d, 2.0 * s)
    } else {
        (2.0 * (1.0 - d), 2.0 - 2.0 * s)
    }
}

fn soft_light_ramp(d: f64) -> f64 {
    if d <= 0.25 {
        ((16.0 * d - 12.0) * d + 4.0) * d
    } else {
        d.sqrt()
    }
}

fn d_soft_light_ramp(d: f64) -> f64 {
    if d <= 0.25 {
        (48.0 * d - 24.0) * d + 4.0
    } else {
        0.5 / d.sqrt()
    }
}

fn soft_light(s: f64, d: f64) -> f64 {
    if s <= 0.5 {
        d - (1.0 - 2.0 * s) * d * (1.0 - d)
    } else {
        d + (2.0 * s - 1.0) * (soft_light_ramp(d) - d)
    }
}

fn d_soft_light(s: f64, d: f64) -> (f64, f64) {
    if s <= 0.5 {
        (
            2.0 * d * (1.0 - d),
            1.0 - (1.0 - 2.0 * s) * (1.0 - 2.0 * d),
        )
    } else {
        (
            2.0 * (soft_light_ramp(d) - d),
            1.0 + (2.0 * s - 1.0) * (d_soft_light_ramp(d) - 1.0),
        )
    }
}

fn difference(s: f64, d: f64) -> f64 {
    (s - d).abs()
}

fn d_difference(s: f64, d: f64) -> (f64, f64) {
    if s >= d { (1.0, -1.0) } else { (-1.0, 1.0) }
}

fn exclusion(s: f64, d: f64) -> f64 {
    s + d - 2.0 * s * d
}

fn d_exclusion(s: f64, d: f64) -> (f64, f64) {
    (1.0 - 2.0 * d, 1.0 - 2.0 * s)
}

fn linear_dodge(s: f64, d: f64) -> f64 {
    (s + d).min(1.0)
}

fn d_linear_dodge(s: f64, d: f64) -> (f64, f64) {
    if s + d < 1.0 { (1.0, 1.0) } else { (0.0, 0.0) }
}

fn linear_burn(s: f64, d: f64) -> f64 {
    (s + d - 1.0).max(0.0)
}

fn d_linear_burn(s: f64, d: f64) -> (f64, f64) {
    if s + d > 1.0 { (1.0, 1.0) } else { (0.0, 0.0) }
}
