//! The accountant seam used by parameter derivation.

use distributed_dp_core::quantize::rounded_l2_norm_bound;
use distributed_dp_core::Result;

use crate::ddgauss::{ddgauss_params, DiscreteGaussianTarget};
use crate::gaussian::calibrate_noise_multiplier;
use crate::rdp::default_orders;

/// Answers the privacy questions asked while deriving mechanism parameters.
pub trait PrivacyAccountant {
    /// Noise multiplier of the Gaussian mechanism meeting `(epsilon, delta)`
    /// over `steps` rounds sampled at `sampling_rate`.
    fn gaussian_noise_multiplier(
        &self,
        epsilon: f64,
        delta: f64,
        sampling_rate: f64,
        steps: usize,
    ) -> Result<f64>;

    /// Grid step and per-client stddev `(gamma, local_stddev)` of the
    /// distributed discrete Gaussian.
    fn discrete_gaussian_params(&self, target: &DiscreteGaussianTarget) -> Result<(f64, f64)>;

    /// Norm bound after rounding a vector of norm `l2_norm_bound` (grid
    /// units) in `dim` dimensions.
    fn rounded_l2_inflation(&self, l2_norm_bound: f64, beta: f64, dim: usize) -> Result<f64> {
        rounded_l2_norm_bound(l2_norm_bound, beta, dim)
    }
}

/// RDP-based accountant.
#[derive(Clone, Debug)]
pub struct RdpPrivacyAccountant {
    orders: Vec<f64>,
}

impl Default for RdpPrivacyAccountant {
    fn default() -> Self {
        Self {
            orders: default_orders(),
        }
    }
}

impl RdpPrivacyAccountant {
    /// Accountant evaluating the given Rényi orders.
    pub fn with_orders(orders: Vec<f64>) -> Self {
        Self { orders }
    }

    /// Rényi orders in use.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }
}

impl PrivacyAccountant for RdpPrivacyAccountant {
    fn gaussian_noise_multiplier(
        &self,
        epsilon: f64,
        delta: f64,
        sampling_rate: f64,
        steps: usize,
    ) -> Result<f64> {
        calibrate_noise_multiplier(&self.orders, epsilon, delta, sampling_rate, steps)
    }

    fn discrete_gaussian_params(&self, target: &DiscreteGaussianTarget) -> Result<(f64, f64)> {
        ddgauss_params(&self.orders, target)
    }
}

impl<A: PrivacyAccountant + ?Sized> PrivacyAccountant for &A {
    fn gaussian_noise_multiplier(
        &self,
        epsilon: f64,
        delta: f64,
        sampling_rate: f64,
        steps: usize,
    ) -> Result<f64> {
        (**self).gaussian_noise_multiplier(epsilon, delta, sampling_rate, steps)
    }

    fn discrete_gaussian_params(&self, target: &DiscreteGaussianTarget) -> Result<(f64, f64)> {
        (**self).discrete_gaussian_params(target)
    }

    fn rounded_l2_inflation(&self, l2_norm_bound: f64, beta: f64, dim: usize) -> Result<f64> {
        (**self).rounded_l2_inflation(l2_norm_bound, beta, dim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_inflation_matches_bound() {
        let acc = RdpPrivacyAccountant::default();
        let got = acc.rounded_l2_inflation(100.0, 0.0, 64).expect("bound");
        assert!((got - 108.0).abs() < 1e-12);
    }

    #[test]
    fn accountant_is_usable_by_reference() {
        fn multiplier<A: PrivacyAccountant>(acc: A) -> f64 {
            acc.gaussian_noise_multiplier(3.0, 1e-5, 0.1, 10)
                .expect("multiplier")
        }
        let acc = RdpPrivacyAccountant::default();
        assert_eq!(multiplier(&acc), multiplier(acc.clone()));
    }

    #[test]
    fn custom_orders_are_kept() {
        let acc = RdpPrivacyAccountant::with_orders(vec![2.0, 4.0]);
        assert_eq!(acc.orders(), &[2.0, 4.0]);
    }
}
