//! Rényi differential privacy of the Poisson-subsampled Gaussian mechanism.

use std::cmp::Ordering;

/// Accumulated RDP over a fixed set of orders.
#[derive(Clone, Debug)]
pub struct RdpAccountant {
    orders: Vec<f64>,
    rdp: Vec<f64>,
    log_factorials: Vec<f64>,
}

impl Default for RdpAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl RdpAccountant {
    /// Accountant over [`default_orders`].
    pub fn new() -> Self {
        Self::with_orders(default_orders())
    }

    /// Accountant over custom orders; orders `<= 1` are dropped.
    pub fn with_orders(orders: Vec<f64>) -> Self {
        let mut orders: Vec<f64> = orders
            .into_iter()
            .filter(|&a| a.is_finite() && a > 1.0)
            .collect();
        orders.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
        orders.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
        if orders.is_empty() {
            orders = default_orders();
        }

        let max_alpha = orders
            .iter()
            .map(|a| a.ceil() as usize)
            .max()
            .unwrap_or(2);
        let rdp = vec![0.0; orders.len()];
        Self {
            orders,
            rdp,
            log_factorials: log_factorials(max_alpha),
        }
    }

    /// The orders tracked by this accountant.
    pub fn orders(&self) -> &[f64] {
        &self.orders
    }

    /// Compose `steps` rounds of the Gaussian mechanism with noise multiplier
    /// `noise_multiplier`, each over a Poisson sample at rate `q`.
    ///
    /// Invalid parameters make every order infinite.
    pub fn compose(&mut self, noise_multiplier: f64, q: f64, steps: usize) {
        if steps == 0 || q == 0.0 {
            return;
        }
        if !noise_multiplier.is_finite()
            || noise_multiplier <= 0.0
            || !q.is_finite()
            || !(0.0..=1.0).contains(&q)
        {
            self.rdp.fill(f64::INFINITY);
            return;
        }

        let steps = steps as f64;
        for (rdp, &alpha) in self.rdp.iter_mut().zip(&self.orders) {
            let step = subsampled_gaussian_rdp(alpha, noise_multiplier, q, &self.log_factorials);
            *rdp = if step.is_finite() {
                *rdp + step * steps
            } else {
                f64::INFINITY
            };
        }
    }

    /// Smallest `epsilon` such that the composition is `(epsilon, delta)`-DP.
    ///
    /// Uses the conversion
    /// `rdp + ln((a - 1) / a) - (ln delta + ln a) / (a - 1)`, floored at zero.
    pub fn epsilon(&self, delta: f64) -> f64 {
        if !delta.is_finite() || delta <= 0.0 || delta > 1.0 {
            return f64::INFINITY;
        }
        let log_delta = delta.ln();
        self.orders
            .iter()
            .zip(&self.rdp)
            .filter(|(_, rdp)| rdp.is_finite())
            .map(|(&alpha, &rdp)| {
                rdp + ((alpha - 1.0) / alpha).ln() - (log_delta + alpha.ln()) / (alpha - 1.0)
            })
            .fold(f64::INFINITY, f64::min)
            .max(0.0)
    }

    /// Clear the accumulated RDP.
    pub fn reset(&mut self) {
        self.rdp.fill(0.0);
    }
}

/// Default Rényi orders: a fine grid near 1, every integer up to 63 and a few
/// large orders for strong composition.
pub fn default_orders() -> Vec<f64> {
    let mut orders = vec![1.25, 1.5, 1.75, 2.0, 2.25, 2.5, 3.0, 3.5, 4.0, 4.5];
    orders.extend((5..64).map(f64::from));
    orders.extend([128.0, 256.0, 512.0]);
    orders
}

fn log_factorials(max_alpha: usize) -> Vec<f64> {
    let mut table = vec![0.0; max_alpha + 1];
    for i in 1..table.len() {
        table[i] = table[i - 1] + (i as f64).ln();
    }
    table
}

/// RDP at order `alpha` of one subsampled Gaussian step.
fn subsampled_gaussian_rdp(alpha: f64, sigma: f64, q: f64, log_fact: &[f64]) -> f64 {
    if q == 1.0 {
        return alpha / (2.0 * sigma * sigma);
    }
    log_moment(alpha, sigma, q, log_fact) / (alpha - 1.0)
}

/// `ln A_alpha`, exact at integer orders.
///
/// Fractional orders interpolate linearly between the neighbouring integers,
/// an upper bound because `ln A_alpha` is convex in `alpha`.
fn log_moment(alpha: f64, sigma: f64, q: f64, log_fact: &[f64]) -> f64 {
    let floor = alpha.floor();
    let t = alpha - floor;
    if t < 1e-12 {
        return integer_log_moment(floor as usize, sigma, q, log_fact);
    }
    let lo = integer_log_moment(floor as usize, sigma, q, log_fact);
    let hi = integer_log_moment(floor as usize + 1, sigma, q, log_fact);
    (1.0 - t) * lo + t * hi
}

fn integer_log_moment(alpha: usize, sigma: f64, q: f64, log_fact: &[f64]) -> f64 {
    if alpha <= 1 {
        return 0.0;
    }
    if alpha >= log_fact.len() {
        return f64::INFINITY;
    }

    let log_q = q.ln();
    let log_1mq = (-q).ln_1p();
    let two_sigma_sq = 2.0 * sigma * sigma;
    let a = alpha as f64;

    (0..=alpha).fold(f64::NEG_INFINITY, |acc, j| {
        let jf = j as f64;
        let log_binom = log_fact[alpha] - log_fact[j] - log_fact[alpha - j];
        let term = log_binom + jf * log_q + (a - jf) * log_1mq + jf * (jf - 1.0) / two_sigma_sq;
        log_add_exp(acc, term)
    })
}

/// `ln(exp(a) + exp(b))` without overflow.
fn log_add_exp(a: f64, b: f64) -> f64 {
    let (hi, lo) = if a > b { (a, b) } else { (b, a) };
    if lo == f64::NEG_INFINITY {
        return hi;
    }
    hi + (lo - hi).exp().ln_1p()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unsampled_gaussian_matches_closed_form() {
        let mut acc = RdpAccountant::with_orders(vec![2.0, 8.0]);
        acc.compose(2.0, 1.0, 3);
        // 3 * alpha / (2 sigma^2) at alpha = 2 and 8.
        assert!((acc.rdp[0] - 0.75).abs() < 1e-12);
        assert!((acc.rdp[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn integer_moment_at_full_sampling_is_gaussian() {
        let log_fact = log_factorials(16);
        let sigma: f64 = 1.5;
        for alpha in 2..=16usize {
            let expected = (alpha as f64) * (alpha as f64 - 1.0) / (2.0 * sigma * sigma);
            let got = integer_log_moment(alpha, sigma, 1.0 - 1e-15, &log_fact);
            assert!((got - expected).abs() < 1e-6, "alpha {alpha}: {got} vs {expected}");
        }
    }

    #[test]
    fn epsilon_grows_with_steps() {
        let mut acc = RdpAccountant::new();
        acc.compose(1.0, 0.01, 1);
        let eps1 = acc.epsilon(1e-5);
        acc.compose(1.0, 0.01, 1);
        let eps2 = acc.epsilon(1e-5);
        assert!(eps1.is_finite() && eps1 > 0.0);
        assert!(eps2 > eps1);
    }

    #[test]
    fn compose_steps_matches_repeated_compose() {
        let mut a = RdpAccountant::new();
        let mut b = RdpAccountant::new();
        for _ in 0..5 {
            a.compose(1.3, 0.02, 1);
        }
        b.compose(1.3, 0.02, 5);
        assert!((a.epsilon(1e-6) - b.epsilon(1e-6)).abs() < 1e-9);
    }

    #[test]
    fn invalid_parameters_are_infinite() {
        let mut acc = RdpAccountant::new();
        acc.compose(0.0, 0.1, 1);
        assert!(acc.epsilon(1e-5).is_infinite());
        acc.reset();
        assert!(acc.epsilon(0.0).is_infinite());
    }

    #[test]
    fn zero_rdp_leaves_only_the_conversion_term() {
        let acc = RdpAccountant::new();
        // Largest order 512: ln(511/512) + (ln(1e5) - ln(512)) / 511.
        let eps = acc.epsilon(1e-5);
        let expected = (511.0f64 / 512.0).ln() + (1e5f64.ln() - 512f64.ln()) / 511.0;
        assert!(eps > 0.0 && eps < 0.01, "eps {eps}");
        assert!((eps - expected).abs() < 1e-12, "eps {eps} vs {expected}");
        // Every order's conversion term is negative at delta = 1.
        assert_eq!(acc.epsilon(1.0), 0.0);
    }

    #[test]
    fn default_orders_are_sorted_and_large() {
        let acc = RdpAccountant::new();
        assert!(acc.orders().windows(2).all(|w| w[0] < w[1]));
        assert_eq!(acc.orders().first().copied(), Some(1.25));
        assert_eq!(acc.orders().last().copied(), Some(512.0));
    }

    proptest! {
        #[test]
        fn prop_more_noise_never_costs_more(
            sigma in 0.5f64..5.0,
            q in 0.001f64..1.0,
            steps in 1usize..200,
        ) {
            let mut low = RdpAccountant::new();
            let mut high = RdpAccountant::new();
            low.compose(sigma, q, steps);
            high.compose(sigma * 1.5, q, steps);
            prop_assert!(high.epsilon(1e-5) <= low.epsilon(1e-5) + 1e-9);
        }
    }
}
