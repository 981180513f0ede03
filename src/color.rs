use anyhow::{Context, Result};
use nalgebra::Vector3;

use crate::blend::BlendMode;
use crate::comp_op::CompositeOperator;

/// Multiplier to expand hex color shorthand (e.g., F -> FF)
const HEX_SHORTHAND_MULTIPLIER: u8 = 17;

/// RGB color represented as [R, G, B] with values 0-255
pub type Color = [u8; 3];

/// Normalized RGB color with values 0.0-1.0
pub type NormalizedColor = [f64; 3];

/// Prior knowledge about a layer's color
#[derive(Debug, Clone, PartialEq)]
pub enum PriorSpec {
    /// Colors near this one are plausible
    Known(Color),
    /// Any color is plausible
    Unknown,
}

/// One layer of the stack as given on the command line
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSpec {
    pub mode: BlendMode,
    pub operator: CompositeOperator,
    pub prior: PriorSpec,
}

/// Parse a hex color string into RGB
/// Supports: "#ff0000", "ff0000", "#f00", "f00"
pub fn parse_hex_color(hex: &str) -> Result<Color> {
    let hex = hex.trim_start_matches('#');
    if !hex.is_ascii() {
        anyhow::bail!("Hex color must only contain hex digits (got: {})", hex);
    }

    let (r, g, b) = match hex.len() {
        3 => {
            // Expand shorthand: "f00" -> "ff0000"
            let r = u8::from_str_radix(&hex[0..1], 16).context("Invalid red component")?;
            let g = u8::from_str_radix(&hex[1..2], 16).context("Invalid green component")?;
            let b = u8::from_str_radix(&hex[2..3], 16).context("Invalid blue component")?;
            (
                r * HEX_SHORTHAND_MULTIPLIER,
                g * HEX_SHORTHAND_MULTIPLIER,
                b * HEX_SHORTHAND_MULTIPLIER,
            )
        }
        6 => {
            let r = u8::from_str_radix(&hex[0..2], 16).context("Invalid red component")?;
            let g = u8::from_str_radix(&hex[2..4], 16).context("Invalid green component")?;
            let b = u8::from_str_radix(&hex[4..6], 16).context("Invalid blue component")?;
            (r, g, b)
        }
        _ => anyhow::bail!("Hex color must be 3 or 6 characters long (got: {})", hex),
    };

    Ok([r, g, b])
}

/// Parse a prior: a hex color, or "auto" when the color is unknown
pub fn parse_prior_spec(spec: &str) -> Result<PriorSpec> {
    if spec == "auto" {
        Ok(PriorSpec::Unknown)
    } else {
        parse_hex_color(spec).map(PriorSpec::Known)
    }
}

/// Parse a layer specification
///
/// Accepted forms: `COLOR`, `MODE:COLOR` and `MODE:OPERATOR:COLOR`, where
/// COLOR is a hex color or "auto". The mode defaults to "normal" and the
/// operator to "source-over".
pub fn parse_layer_spec(spec: &str) -> Result<LayerSpec> {
    let parts: Vec<&str> = spec.split(':').collect();
    let (mode, operator, color) = match parts.as_slice() {
        [color] => (BlendMode::Normal, CompositeOperator::SourceOver, *color),
        [mode, color] => (
            mode.parse::<BlendMode>()?,
            CompositeOperator::SourceOver,
            *color,
        ),
        [mode, operator, color] => (
            mode.parse::<BlendMode>()?,
            operator.parse::<CompositeOperator>()?,
            *color,
        ),
        _ => anyhow::bail!(
            "Layer must look like COLOR, MODE:COLOR or MODE:OPERATOR:COLOR (got: {})",
            spec
        ),
    };

    Ok(LayerSpec {
        mode,
        operator,
        prior: parse_prior_spec(color)
            .with_context(|| format!("Invalid layer color: {}", color))?,
    })
}

/// Convert a Color to NormalizedColor
pub fn normalize_color(color: Color) -> NormalizedColor {
    [
        color[0] as f64 / 255.0,
        color[1] as f64 / 255.0,
        color[2] as f64 / 255.0,
    ]
}

/// Convert a NormalizedColor back to Color
pub fn denormalize_color(color: NormalizedColor) -> Color {
    [
        (color[0] * 255.0).round().clamp(0.0, 255.0) as u8,
        (color[1] * 255.0).round().clamp(0.0, 255.0) as u8,
        (color[2] * 255.0).round().clamp(0.0, 255.0) as u8,
    ]
}

pub fn to_vector(color: NormalizedColor) -> Vector3<f64> {
    Vector3::new(color[0], color[1], color[2])
}

pub fn from_vector(color: &Vector3<f64>) -> NormalizedColor {
    [color[0], color[1], color[2]]
}
