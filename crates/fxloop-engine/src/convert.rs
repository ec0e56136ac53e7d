//! Sample conversion between the device's S16 frames and the effect domain.
//!
//! Every effect tick is bracketed by [`normalize`] and [`denormalize`]; the
//! effects only ever see `f32` samples in [-1, 1].

use std::fmt;
use std::str::FromStr;

/// Divisor used in both directions.
pub const SCALE: f32 = 32768.0;

/// What to do when an effect pushes a sample outside the 16-bit range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipMode {
    /// Clamp into [-32768, 32767].
    #[default]
    Saturate,
    /// Truncate to integer and keep the low 16 bits.
    /// Loud transients wrap around to the opposite polarity.
    Wrap,
}

impl fmt::Display for ClipMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ClipMode::Saturate => "saturate",
            ClipMode::Wrap => "wrap",
        })
    }
}

impl FromStr for ClipMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "saturate" => Ok(ClipMode::Saturate),
            "wrap" => Ok(ClipMode::Wrap),
            other => Err(format!("unknown clip mode `{other}` (saturate, wrap)")),
        }
    }
}

pub fn normalize(input: &[i16], out: &mut [f32]) {
    debug_assert_eq!(input.len(), out.len());
    for (o, &s) in out.iter_mut().zip(input) {
        *o = s as f32 / SCALE;
    }
}

pub fn denormalize(input: &[f32], out: &mut [i16], mode: ClipMode) {
    debug_assert_eq!(input.len(), out.len());
    match mode {
        ClipMode::Saturate => {
            for (o, &v) in out.iter_mut().zip(input) {
                // float -> int `as` casts saturate (and map NaN to 0)
                *o = (v * SCALE) as i16;
            }
        }
        ClipMode::Wrap => {
            for (o, &v) in out.iter_mut().zip(input) {
                *o = (v * SCALE) as i32 as i16;
            }
        }
    }
}
