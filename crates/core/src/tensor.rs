//! Vector and tensor types plus low-level norms.

use ndarray::{Array1, ArrayD};

/// Dynamic-dimensional tensor, one entry of a client update.
pub type Tensor = ArrayD<f64>;

/// Flattened real-valued client record.
pub type Vector = Array1<f64>;

/// Flattened integer record on the quantization grid.
pub type IntVector = Array1<i64>;

/// Compute the L2 norm of a real vector, propagating NaN and infinity.
pub fn l2_norm(v: &Vector) -> f64 {
    let mut sum_sq = 0.0_f64;
    for &x in v.iter() {
        if x.is_nan() {
            return f64::NAN;
        }
        if !x.is_finite() {
            return f64::INFINITY;
        }
        sum_sq += x * x;
    }
    sum_sq.sqrt()
}

/// Compute the L2 norm of an integer vector.
pub fn l2_norm_int(v: &IntVector) -> f64 {
    v.iter()
        .map(|&x| {
            let x = x as f64;
            x * x
        })
        .sum::<f64>()
        .sqrt()
}

/// Replace NaN and infinite values in-place.
pub fn sanitize(v: &mut Vector, nan_val: f64, inf_val: f64) {
    v.mapv_inplace(|x| {
        if x.is_nan() {
            nan_val
        } else if x.is_infinite() {
            if x.is_sign_negative() {
                -inf_val
            } else {
                inf_val
            }
        } else {
            x
        }
    });
}
