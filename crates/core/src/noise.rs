//! Continuous and discrete Gaussian noise.

use rand::distributions::Distribution;
use rand::Rng;
use rand_distr::Normal;

use crate::error::{DpError, Result};
use crate::rng::StageRng;
use crate::tensor::{IntVector, Vector};
use crate::transform::{AggregationStage, Record, RoundContext, RoundMetrics};

/// Add Gaussian noise to a real vector in-place.
pub fn add_gaussian_noise<R: Rng + ?Sized>(v: &mut Vector, sigma: f64, rng: &mut R) {
    if !sigma.is_finite() || sigma <= 0.0 || v.is_empty() {
        return;
    }

    let dist = match Normal::new(0.0, sigma) {
        Ok(d) => d,
        Err(_) => return,
    };

    v.mapv_inplace(|x| {
        if x.is_finite() {
            x + dist.sample(rng)
        } else {
            x
        }
    });
}

/// Discrete Gaussian distribution over the integers, centered at zero.
///
/// Sampling is exact up to floating-point evaluation of the acceptance
/// probabilities: a discrete Laplace proposal with scale `floor(sigma) + 1`
/// is accepted with probability `exp(-(|y| - sigma^2/t)^2 / (2 sigma^2))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DiscreteGaussian {
    sigma: f64,
}

impl DiscreteGaussian {
    /// Create a sampler with the given scale parameter.
    ///
    /// Non-finite or non-positive `sigma` yields a point mass at zero.
    pub fn new(sigma: f64) -> Self {
        let sigma = if sigma.is_finite() && sigma > 0.0 {
            sigma
        } else {
            0.0
        };
        Self { sigma }
    }

    /// The scale parameter.
    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl Distribution<i64> for DiscreteGaussian {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> i64 {
        if self.sigma == 0.0 {
            return 0;
        }
        let sigma_sq = self.sigma * self.sigma;
        let t = self.sigma.floor() as u64 + 1;
        loop {
            let y = sample_discrete_laplace(t, rng);
            let diff = y.unsigned_abs() as f64 - sigma_sq / t as f64;
            if bernoulli_exp_neg(diff * diff / (2.0 * sigma_sq), rng) {
                return y;
            }
        }
    }
}

/// Add i.i.d. discrete Gaussian noise to an integer vector in-place.
pub fn add_discrete_gaussian_noise<R: Rng + ?Sized>(v: &mut IntVector, sigma: f64, rng: &mut R) {
    let dist = DiscreteGaussian::new(sigma);
    if dist.sigma() == 0.0 {
        return;
    }
    v.mapv_inplace(|x| x.saturating_add(dist.sample(rng)));
}

/// Stage adding continuous Gaussian noise to the summed record on the server.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ServerGaussianNoiseStage {
    stddev: f64,
}

impl ServerGaussianNoiseStage {
    /// Create a stage with noise standard deviation `stddev`.
    pub fn new(stddev: f64) -> Result<Self> {
        if !stddev.is_finite() || stddev < 0.0 {
            return Err(DpError::numerical(format!("invalid noise stddev {stddev}")));
        }
        Ok(Self { stddev })
    }

    /// Noise standard deviation.
    pub fn stddev(&self) -> f64 {
        self.stddev
    }
}

impl AggregationStage for ServerGaussianNoiseStage {
    fn name(&self) -> &'static str {
        "server_gaussian_noise"
    }

    fn server_transform(
        &self,
        aggregate: Record,
        _ctx: &RoundContext,
        rng: &mut StageRng,
        _metrics: &mut RoundMetrics,
    ) -> Result<Record> {
        let mut v = aggregate.into_real(self.name())?;
        add_gaussian_noise(&mut v, self.stddev, rng);
        Ok(Record::Real(v))
    }
}

fn bernoulli_exp_neg<R: Rng + ?Sized>(gamma: f64, rng: &mut R) -> bool {
    let p = (-gamma).exp();
    if !(0.0..=1.0).contains(&p) {
        return p > 1.0;
    }
    rng.gen_bool(p)
}

/// Discrete Laplace with scale `t`, i.e. `P(y) ∝ exp(-|y| / t)`.
fn sample_discrete_laplace<R: Rng + ?Sized>(t: u64, rng: &mut R) -> i64 {
    loop {
        let u = rng.gen_range(0..t);
        if !bernoulli_exp_neg(u as f64 / t as f64, rng) {
            continue;
        }
        let mut v = 0u64;
        while bernoulli_exp_neg(1.0, rng) {
            v += 1;
        }
        let x = u.saturating_add(t.saturating_mul(v));
        let negative = rng.gen_bool(0.5);
        if negative && x == 0 {
            continue;
        }
        let x = i64::try_from(x).unwrap_or(i64::MAX);
        return if negative { -x } else { x };
    }
}
