//! Accounting and parameter search for the distributed discrete Gaussian.
//!
//! Each of `n` clients adds discrete Gaussian noise of scale `sigma` on the
//! integer grid. The sum is close to a discrete Gaussian of scale
//! `sqrt(n) * sigma` and satisfies `eps_z^2 / 2` concentrated DP with
//!
//! ```text
//! eps_z = min(sqrt(l2^2 / (n sigma^2) + tau d / 2), l1 / (sqrt(n) sigma) + tau sqrt(d))
//! tau   = 10 * sum_{k=1}^{n-1} exp(-2 pi^2 sigma^2 k / (k + 1))
//! ```
//!
//! where `l2` and `l1` are sensitivities in grid units after rounding. A
//! round is then accounted as a Gaussian with noise multiplier `1 / eps_z`
//! under Poisson sampling.

use std::f64::consts::PI;

use distributed_dp_core::quantize::rounded_l2_norm_bound;
use distributed_dp_core::{DpError, Result};
use tracing::debug;

use crate::rdp::RdpAccountant;

const MAX_BRACKET_STEPS: usize = 64;
const MAX_BISECTION_STEPS: usize = 200;
const RELATIVE_TOLERANCE: f64 = 1e-7;

/// Everything the distributed discrete Gaussian search needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiscreteGaussianTarget {
    /// Target epsilon over all rounds.
    pub epsilon: f64,
    /// Target delta.
    pub delta: f64,
    /// Per-round Poisson sampling rate of clients.
    pub sampling_rate: f64,
    /// Number of rounds.
    pub steps: usize,
    /// Per-client L2 clipping norm.
    pub l2_clip_norm: f64,
    /// Bit width of the modular range.
    pub bits: u32,
    /// Clients summed per round.
    pub num_clients: usize,
    /// Padded dimension.
    pub dim: usize,
    /// Conditional rounding failure probability.
    pub beta: f64,
    /// Standard deviations of the aggregate that must fit in the modulus.
    pub k_stddevs: f64,
}

impl DiscreteGaussianTarget {
    fn validate(&self) -> Result<()> {
        let positive = |v: f64| v.is_finite() && v > 0.0;
        if !positive(self.epsilon) {
            return Err(DpError::accounting(format!("epsilon {} must be positive", self.epsilon)));
        }
        if !(self.delta > 0.0 && self.delta <= 1.0) {
            return Err(DpError::accounting(format!("delta {} outside (0, 1]", self.delta)));
        }
        if !(self.sampling_rate > 0.0 && self.sampling_rate <= 1.0) {
            return Err(DpError::accounting(format!(
                "sampling rate {} outside (0, 1]",
                self.sampling_rate
            )));
        }
        if self.steps == 0 || self.num_clients == 0 || self.dim == 0 {
            return Err(DpError::accounting(
                "steps, clients and dimension must be positive",
            ));
        }
        if !positive(self.l2_clip_norm) || !positive(self.k_stddevs) {
            return Err(DpError::accounting("clip norm and k must be positive"));
        }
        if self.bits == 0 || self.bits > 62 {
            return Err(DpError::accounting(format!("unsupported bit width {}", self.bits)));
        }
        Ok(())
    }
}

/// Concentrated-DP parameter `eps_z` of one round, all arguments in grid
/// units.
pub fn ddgauss_zcdp_epsilon(l2_sensitivity: f64, sigma: f64, num_clients: usize, dim: usize) -> f64 {
    if !(sigma > 0.0) || num_clients == 0 {
        return f64::INFINITY;
    }
    let n = num_clients as f64;
    let d = dim as f64;
    let sigma_sq = sigma * sigma;

    let tau = 10.0
        * (1..num_clients)
            .map(|k| {
                let k = k as f64;
                (-2.0 * PI * PI * sigma_sq * k / (k + 1.0)).exp()
            })
            .sum::<f64>();

    // Integer vectors satisfy |x|_1 <= |x|_2^2.
    let l1_sensitivity = l2_sensitivity * d.sqrt().min(l2_sensitivity);

    let via_l2 = (l2_sensitivity * l2_sensitivity / (n * sigma_sq) + 0.5 * tau * d).sqrt();
    let via_l1 = l1_sensitivity / (n.sqrt() * sigma) + tau * d.sqrt();
    via_l2.min(via_l1)
}

/// Epsilon spent over all rounds for grid step `gamma` and per-client noise
/// `local_stddev` (real units).
pub fn ddgauss_epsilon(
    orders: &[f64],
    gamma: f64,
    local_stddev: f64,
    target: &DiscreteGaussianTarget,
) -> f64 {
    let scale = 1.0 / gamma;
    let l2 = match rounded_l2_norm_bound(target.l2_clip_norm * scale, target.beta, target.dim) {
        Ok(l2) => l2,
        Err(_) => return f64::INFINITY,
    };
    let eps_z = ddgauss_zcdp_epsilon(l2, local_stddev * scale, target.num_clients, target.dim);
    if !eps_z.is_finite() || eps_z <= 0.0 {
        return f64::INFINITY;
    }

    let mut acc = RdpAccountant::with_orders(orders.to_vec());
    acc.compose(1.0 / eps_z, target.sampling_rate, target.steps);
    acc.epsilon(target.delta)
}

/// Smallest per-client stddev (real units) meeting the target at grid step
/// `gamma`.
pub fn local_stddev_for_gamma(
    orders: &[f64],
    gamma: f64,
    target: &DiscreteGaussianTarget,
) -> Result<f64> {
    if !gamma.is_finite() || gamma <= 0.0 {
        return Err(DpError::accounting(format!("grid step {gamma} must be positive")));
    }
    let meets = |sigma: f64| ddgauss_epsilon(orders, gamma, sigma, target) <= target.epsilon;

    let mut lo = 0.0;
    let mut hi = gamma;
    let mut doublings = 0;
    while !meets(hi) {
        lo = hi;
        hi *= 2.0;
        doublings += 1;
        if doublings > MAX_BRACKET_STEPS || !hi.is_finite() {
            return Err(DpError::accounting(format!(
                "no local stddev reaches epsilon {} at gamma {gamma}",
                target.epsilon
            )));
        }
    }

    for _ in 0..MAX_BISECTION_STEPS {
        if hi - lo <= RELATIVE_TOLERANCE * hi {
            break;
        }
        let mid = 0.5 * (lo + hi);
        if meets(mid) {
            hi = mid;
        } else {
            lo = mid;
        }
    }
    Ok(hi)
}

/// Search the grid step `gamma` and per-client stddev for a target.
///
/// `gamma` is taken as small as possible such that `k_stddevs` standard
/// deviations of the aggregate, signal plus noise plus rounding, fit in the
/// `2^bits` modulus. Returns `(gamma, local_stddev)`.
pub fn ddgauss_params(orders: &[f64], target: &DiscreteGaussianTarget) -> Result<(f64, f64)> {
    target.validate()?;

    let n = target.num_clients as f64;
    let modulus = 2f64.powi(target.bits as i32);
    if target.k_stddevs * n.sqrt() >= modulus {
        return Err(DpError::accounting(format!(
            "{} bits cannot hold {} stddevs of rounding noise from {} clients",
            target.bits, target.k_stddevs, target.num_clients
        )));
    }

    let signal = target.l2_clip_norm * target.l2_clip_norm * n * n / target.dim as f64;
    let excess = |gamma: f64| -> Result<f64> {
        let sigma = local_stddev_for_gamma(orders, gamma, target)?;
        let spread = (signal + n * (gamma * gamma / 4.0 + sigma * sigma)).sqrt();
        Ok(2.0 * target.k_stddevs * spread / gamma - modulus)
    };

    let start = target.l2_clip_norm / target.dim as f64;
    let (mut lo, mut hi) = (start, start);
    if excess(start)? > 0.0 {
        let mut steps = 0;
        loop {
            hi *= 2.0;
            if excess(hi)? <= 0.0 {
                break;
            }
            lo = hi;
            steps += 1;
            if steps > MAX_BRACKET_STEPS {
                return Err(DpError::accounting(format!(
                    "no grid step fits the {}-bit modulus",
                    target.bits
                )));
            }
        }
    } else {
        let mut steps = 0;
        loop {
            lo /= 2.0;
            if excess(lo)? > 0.0 {
                break;
            }
            hi = lo;
            steps += 1;
            if steps > MAX_BRACKET_STEPS {
                break;
            }
        }
    }

    for _ in 0..MAX_BISECTION_STEPS {
        if hi - lo <= RELATIVE_TOLERANCE * hi {
            break;
        }
        let mid = (lo * hi).sqrt();
        if excess(mid)? <= 0.0 {
            hi = mid;
        } else {
            lo = mid;
        }
    }

    let local_stddev = local_stddev_for_gamma(orders, hi, target)?;
    debug!(gamma = hi, local_stddev, bits = target.bits, "ddgauss parameters");
    Ok((hi, local_stddev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rdp::default_orders;

    fn target() -> DiscreteGaussianTarget {
        DiscreteGaussianTarget {
            epsilon: 6.0,
            delta: 1e-5,
            sampling_rate: 0.05,
            steps: 50,
            l2_clip_norm: 1.0,
            bits: 16,
            num_clients: 20,
            dim: 1 << 10,
            beta: (-0.5f64).exp(),
            k_stddevs: 4.0,
        }
    }

    #[test]
    fn single_client_has_no_tau_term() {
        let eps = ddgauss_zcdp_epsilon(3.0, 1.5, 1, 16);
        assert!((eps - 2.0).abs() < 1e-12);
    }

    #[test]
    fn zcdp_epsilon_falls_with_noise() {
        let low = ddgauss_zcdp_epsilon(10.0, 1.0, 10, 64);
        let high = ddgauss_zcdp_epsilon(10.0, 4.0, 10, 64);
        assert!(high < low);
        assert!(ddgauss_zcdp_epsilon(10.0, 0.0, 10, 64).is_infinite());
    }

    #[test]
    fn local_stddev_meets_target() {
        let orders = default_orders();
        let t = target();
        let gamma = 1e-3;
        let sigma = local_stddev_for_gamma(&orders, gamma, &t).expect("stddev");
        assert!(ddgauss_epsilon(&orders, gamma, sigma, &t) <= t.epsilon);
        assert!(ddgauss_epsilon(&orders, gamma, sigma * 0.99, &t) > t.epsilon);
    }

    #[test]
    fn params_fit_the_modulus() {
        let orders = default_orders();
        let t = target();
        let (gamma, sigma) = ddgauss_params(&orders, &t).expect("params");
        assert!(gamma > 0.0 && sigma > 0.0);
        let n = t.num_clients as f64;
        let spread = (n * n / t.dim as f64 + n * (gamma * gamma / 4.0 + sigma * sigma)).sqrt();
        assert!(2.0 * t.k_stddevs * spread / gamma <= 2f64.powi(16) * (1.0 + 1e-9));
        assert!(ddgauss_epsilon(&orders, gamma, sigma, &t) <= t.epsilon);
    }

    #[test]
    fn fewer_bits_need_a_coarser_grid() {
        let orders = default_orders();
        let (fine, _) = ddgauss_params(&orders, &target()).expect("16 bits");
        let (coarse, _) = ddgauss_params(
            &orders,
            &DiscreteGaussianTarget {
                bits: 12,
                ..target()
            },
        )
        .expect("12 bits");
        assert!(coarse > fine);
    }

    #[test]
    fn tiny_modulus_is_rejected() {
        let orders = default_orders();
        let result = ddgauss_params(
            &orders,
            &DiscreteGaussianTarget {
                bits: 2,
                ..target()
            },
        );
        assert!(matches!(result, Err(DpError::Accounting { .. })));
    }
}
