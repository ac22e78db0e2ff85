//! Reference oracle: pure, device-independent expected-value computations.
//!
//! Everything in this module is a total function over plain data. The
//! harness uses these to compute ground truth before touching the device,
//! so each function must be independently testable against hand-computed
//! values and must never read device state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Color
// ---------------------------------------------------------------------------

/// An RGBA color with unclamped f64 channels.
///
/// Oracle math runs in f64; conversion to the narrower device formats
/// happens at the device boundary.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub const TRANSPARENT_BLACK: Color = Color::new(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Color = Color::new(1.0, 1.0, 1.0, 1.0);
    pub const GREEN: Color = Color::new(0.0, 1.0, 0.0, 1.0);

    pub const fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// All four channels set to `v`.
    pub const fn splat(v: f64) -> Self {
        Self::new(v, v, v, v)
    }

    /// Apply `f` to every channel.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self::new(f(self.r), f(self.g), f(self.b), f(self.a))
    }

    /// Combine two colors channel-wise.
    pub fn zip(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self::new(
            f(self.r, other.r),
            f(self.g, other.g),
            f(self.b, other.b),
            f(self.a, other.a),
        )
    }

    pub fn to_array(self) -> [f64; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_f32_array(self) -> [f32; 4] {
        [self.r as f32, self.g as f32, self.b as f32, self.a as f32]
    }

    /// Build a color from a 4-element slice, as stored in case parameters.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() != 4 {
            return Err(Error::usage(format!(
                "color requires 4 channels, got {}",
                values.len()
            )));
        }
        Ok(Self::new(values[0], values[1], values[2], values[3]))
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {}, {})", self.r, self.g, self.b, self.a)
    }
}

// ---------------------------------------------------------------------------
// Blend factors
// ---------------------------------------------------------------------------

/// Blend factor kinds, a closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturated,
    ConstantColor,
    OneMinusConstantColor,
}

impl BlendFactor {
    /// Every factor kind, in canonical order.
    pub const ALL: [BlendFactor; 13] = [
        BlendFactor::Zero,
        BlendFactor::One,
        BlendFactor::SrcColor,
        BlendFactor::OneMinusSrcColor,
        BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor,
        BlendFactor::OneMinusDstColor,
        BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturated,
        BlendFactor::ConstantColor,
        BlendFactor::OneMinusConstantColor,
    ];

    /// True for the factors that read the blend constant.
    pub fn uses_constant(self) -> bool {
        matches!(
            self,
            BlendFactor::ConstantColor | BlendFactor::OneMinusConstantColor
        )
    }
}

impl fmt::Display for BlendFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlendFactor::Zero => "zero",
            BlendFactor::One => "one",
            BlendFactor::SrcColor => "src-color",
            BlendFactor::OneMinusSrcColor => "one-minus-src-color",
            BlendFactor::SrcAlpha => "src-alpha",
            BlendFactor::OneMinusSrcAlpha => "one-minus-src-alpha",
            BlendFactor::DstColor => "dst-color",
            BlendFactor::OneMinusDstColor => "one-minus-dst-color",
            BlendFactor::DstAlpha => "dst-alpha",
            BlendFactor::OneMinusDstAlpha => "one-minus-dst-alpha",
            BlendFactor::SrcAlphaSaturated => "src-alpha-saturated",
            BlendFactor::ConstantColor => "constant-color",
            BlendFactor::OneMinusConstantColor => "one-minus-constant-color",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BlendFactor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        for factor in BlendFactor::ALL {
            if factor.to_string() == s {
                return Ok(factor);
            }
        }
        Err(Error::usage(format!("unknown blend factor '{}'", s)))
    }
}

// ---------------------------------------------------------------------------
// Blend operations
// ---------------------------------------------------------------------------

/// Blend operation kinds, a closed enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendOperation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

impl BlendOperation {
    /// Every operation kind, in canonical order.
    pub const ALL: [BlendOperation; 5] = [
        BlendOperation::Add,
        BlendOperation::Subtract,
        BlendOperation::ReverseSubtract,
        BlendOperation::Min,
        BlendOperation::Max,
    ];
}

impl fmt::Display for BlendOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlendOperation::Add => "add",
            BlendOperation::Subtract => "subtract",
            BlendOperation::ReverseSubtract => "reverse-subtract",
            BlendOperation::Min => "min",
            BlendOperation::Max => "max",
        };
        write!(f, "{}", name)
    }
}

impl FromStr for BlendOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        for op in BlendOperation::ALL {
            if op.to_string() == s {
                return Ok(op);
            }
        }
        Err(Error::usage(format!("unknown blend operation '{}'", s)))
    }
}

// ---------------------------------------------------------------------------
// Blend computations
// ---------------------------------------------------------------------------

/// Compute the per-channel blend factor value for `factor`.
///
/// `constant` is the blend constant supplied to the render pass, if any;
/// factors that reference it fail with a usage error when it is missing.
/// `src-alpha-saturated` computes the scalar `min(src.a, 1 - dst.a)`,
/// broadcast to r/g/b with the alpha factor fixed at 1.
pub fn compute_blend_factor(
    src: Color,
    dst: Color,
    constant: Option<Color>,
    factor: BlendFactor,
) -> Result<Color> {
    let color = match factor {
        BlendFactor::Zero => Color::splat(0.0),
        BlendFactor::One => Color::splat(1.0),
        BlendFactor::SrcColor => src,
        BlendFactor::OneMinusSrcColor => src.map(|v| 1.0 - v),
        BlendFactor::SrcAlpha => Color::splat(src.a),
        BlendFactor::OneMinusSrcAlpha => Color::splat(1.0 - src.a),
        BlendFactor::DstColor => dst,
        BlendFactor::OneMinusDstColor => dst.map(|v| 1.0 - v),
        BlendFactor::DstAlpha => Color::splat(dst.a),
        BlendFactor::OneMinusDstAlpha => Color::splat(1.0 - dst.a),
        BlendFactor::SrcAlphaSaturated => {
            let f = src.a.min(1.0 - dst.a);
            Color::new(f, f, f, 1.0)
        }
        BlendFactor::ConstantColor => require_constant(constant, factor)?,
        BlendFactor::OneMinusConstantColor => {
            require_constant(constant, factor)?.map(|v| 1.0 - v)
        }
    };
    Ok(color)
}

fn require_constant(constant: Option<Color>, factor: BlendFactor) -> Result<Color> {
    constant.ok_or_else(|| {
        Error::usage(format!(
            "blend factor '{}' requires a blend constant, but none was set",
            factor
        ))
    })
}

/// Combine source and destination colors under `operation`.
///
/// `src_factor` and `dst_factor` are the already-computed factor values
/// (see [`compute_blend_factor`]); each channel combines with its own
/// factor channel. `min` and `max` ignore the factors entirely.
pub fn compute_blend_operation(
    src: Color,
    src_factor: Color,
    dst: Color,
    dst_factor: Color,
    operation: BlendOperation,
) -> Color {
    match operation {
        BlendOperation::Add => src
            .zip(src_factor, |c, f| c * f)
            .zip(dst.zip(dst_factor, |c, f| c * f), |s, d| s + d),
        BlendOperation::Subtract => src
            .zip(src_factor, |c, f| c * f)
            .zip(dst.zip(dst_factor, |c, f| c * f), |s, d| s - d),
        BlendOperation::ReverseSubtract => src
            .zip(src_factor, |c, f| c * f)
            .zip(dst.zip(dst_factor, |c, f| c * f), |s, d| d - s),
        BlendOperation::Min => src.zip(dst, f64::min),
        BlendOperation::Max => src.zip(dst, f64::max),
    }
}
