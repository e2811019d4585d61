//! Scaling and rounding real vectors onto the integer grid.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::tensor::{l2_norm_int, IntVector, Vector};

/// Resampling budget for conditional randomized rounding.
pub const MAX_ROUNDING_ATTEMPTS: usize = 1_000;

/// Largest magnitude accepted when converting a scaled coordinate to `i64`.
const MAX_GRID_MAGNITUDE: f64 = (1u64 << 62) as f64;

/// How scaled coordinates are mapped to integers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    /// Deterministic rounding to the nearest integer.
    #[default]
    Nearest,
    /// Unbiased randomized rounding, resampled until the rounded norm stays
    /// within [`rounded_l2_norm_bound`].
    ConditionalRandomized,
}

/// Bound on the L2 norm of a vector after rounding each coordinate.
///
/// `l2_norm_bound` is the pre-rounding norm in grid units. With `beta == 0`
/// the deterministic bound `l2 + sqrt(dim)` is returned; otherwise the bound
/// that holds with probability `1 - beta` for randomized rounding is used when
/// it is tighter.
pub fn rounded_l2_norm_bound(l2_norm_bound: f64, beta: f64, dim: usize) -> Result<f64> {
    if dim == 0 {
        return Err(DpError::input("dimension must be positive"));
    }
    if !(0.0..1.0).contains(&beta) {
        return Err(DpError::invalid_budget("beta", beta));
    }
    if !l2_norm_bound.is_finite() || l2_norm_bound <= 0.0 {
        return Err(DpError::input(format!(
            "l2 norm bound must be positive, got {l2_norm_bound}"
        )));
    }

    let sqrt_dim = (dim as f64).sqrt();
    let bound_1 = l2_norm_bound + sqrt_dim;
    if beta == 0.0 {
        return Ok(bound_1);
    }

    let squared_bound_2 = l2_norm_bound * l2_norm_bound
        + 0.25 * dim as f64
        + (2.0 * (1.0 / beta).ln()).sqrt() * (l2_norm_bound + 0.5 * sqrt_dim);
    Ok(bound_1.min(squared_bound_2.sqrt()))
}

/// Multiply by `scale` and round onto the integer grid.
///
/// `norm_bound` (grid units) is only consulted by
/// [`Rounding::ConditionalRandomized`].
pub fn scale_and_round<R: Rng + ?Sized>(
    v: &Vector,
    scale: f64,
    rounding: Rounding,
    norm_bound: f64,
    rng: &mut R,
) -> Result<IntVector> {
    if !scale.is_finite() || scale <= 0.0 {
        return Err(DpError::numerical(format!("invalid quantization scale {scale}")));
    }
    let scaled = v.mapv(|x| x * scale);
    if let Some(bad) = scaled
        .iter()
        .find(|x| !x.is_finite() || x.abs() >= MAX_GRID_MAGNITUDE)
    {
        return Err(DpError::numerical(format!(
            "scaled coordinate {bad} does not fit the integer grid"
        )));
    }

    match rounding {
        Rounding::Nearest => Ok(scaled.mapv(|x| x.round() as i64)),
        Rounding::ConditionalRandomized => {
            for _ in 0..MAX_ROUNDING_ATTEMPTS {
                let rounded = scaled.mapv(|x| {
                    let floor = x.floor();
                    if rng.gen_bool(x - floor) {
                        floor as i64 + 1
                    } else {
                        floor as i64
                    }
                });
                if l2_norm_int(&rounded) <= norm_bound {
                    return Ok(rounded);
                }
            }
            Err(DpError::numerical(format!(
                "randomized rounding exceeded norm bound {norm_bound} after {MAX_ROUNDING_ATTEMPTS} attempts"
            )))
        }
    }
}

/// Map grid values back to reals by dividing by `scale`.
pub fn dequantize(v: &IntVector, scale: f64) -> Vector {
    v.mapv(|x| x as f64 / scale)
}
