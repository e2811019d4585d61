//! Noise-multiplier calibration for the continuous Gaussian mechanism.

use distributed_dp_core::{DpError, Result};
use tracing::debug;

use crate::rdp::RdpAccountant;

/// Upper limit for the bracket search; larger multipliers are treated as
/// unreachable.
const MAX_NOISE_MULTIPLIER: f64 = 1e6;
const RELATIVE_TOLERANCE: f64 = 1e-7;

/// RDP epsilon of `steps` Poisson-subsampled Gaussian rounds.
pub fn gaussian_epsilon(
    orders: &[f64],
    noise_multiplier: f64,
    delta: f64,
    sampling_rate: f64,
    steps: usize,
) -> f64 {
    let mut acc = RdpAccountant::with_orders(orders.to_vec());
    acc.compose(noise_multiplier, sampling_rate, steps);
    acc.epsilon(delta)
}

/// Smallest noise multiplier meeting `(epsilon, delta)` over `steps` rounds
/// sampled at `sampling_rate`.
pub fn calibrate_noise_multiplier(
    orders: &[f64],
    epsilon: f64,
    delta: f64,
    sampling_rate: f64,
    steps: usize,
) -> Result<f64> {
    if !epsilon.is_finite() || epsilon <= 0.0 {
        return Err(DpError::accounting(format!("target epsilon {epsilon} must be positive")));
    }
    if !(delta > 0.0 && delta <= 1.0) {
        return Err(DpError::accounting(format!("target delta {delta} outside (0, 1]")));
    }
    if !(sampling_rate > 0.0 && sampling_rate <= 1.0) || steps == 0 {
        return Err(DpError::accounting(format!(
            "cannot calibrate for sampling rate {sampling_rate} over {steps} steps"
        )));
    }

    let epsilon_for = |z: f64| gaussian_epsilon(orders, z, delta, sampling_rate, steps);

    let mut lo = 0.0;
    let mut hi = 1.0;
    while epsilon_for(hi) > epsilon {
        lo = hi;
        hi *= 2.0;
        if hi > MAX_NOISE_MULTIPLIER {
            return Err(DpError::accounting(format!(
                "no noise multiplier up to {MAX_NOISE_MULTIPLIER} reaches epsilon {epsilon}"
            )));
        }
    }

    for _ in 0..200 {
        if hi - lo <= RELATIVE_TOLERANCE * hi {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if epsilon_for(mid) <= epsilon {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    debug!(noise_multiplier = hi, epsilon, delta, sampling_rate, steps, "calibrated gaussian");
    Ok(hi)
}
