//! Privacy budget, compression and schedule inputs.

use std::fmt;
use std::str::FromStr;

use distributed_dp_core::{DpError, Result, Rotation, Rounding};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Epsilon value requesting plain aggregation without differential privacy.
///
/// A budget carrying this epsilon takes the [`Mechanism::None`] branch
/// whatever mechanism it names; the mismatch is logged.
pub const NO_DP_EPSILON: f64 = -1.0;

/// Largest supported modular bit width.
pub const MAX_BITS: u32 = 32;

/// Noise mechanism applied to the aggregate.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mechanism {
    /// Plain mean, optionally clipped.
    #[default]
    #[serde(rename = "none")]
    None,
    /// Continuous Gaussian noise added on the server.
    #[serde(rename = "gaussian")]
    Gaussian,
    /// Distributed discrete Gaussian with quantization and modular summation.
    #[serde(rename = "ddgauss")]
    DiscreteGaussian,
}

impl Mechanism {
    /// Canonical lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Mechanism::None => "none",
            Mechanism::Gaussian => "gaussian",
            Mechanism::DiscreteGaussian => "ddgauss",
        }
    }
}

impl fmt::Display for Mechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mechanism {
    type Err = DpError;

    /// Case-insensitive; unknown names are reported verbatim.
    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Mechanism::None),
            "gaussian" => Ok(Mechanism::Gaussian),
            "ddgauss" => Ok(Mechanism::DiscreteGaussian),
            _ => Err(DpError::unsupported(s)),
        }
    }
}

/// Requested privacy guarantee.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrivacyBudget {
    /// Target epsilon; `None` or [`NO_DP_EPSILON`] disables DP.
    pub epsilon: Option<f64>,
    /// Target delta; defaults to `1 / num_clients`.
    pub delta: Option<f64>,
    /// Per-client L2 clipping norm.
    pub clip: Option<f64>,
    /// Requested mechanism.
    pub mechanism: Mechanism,
}

impl PrivacyBudget {
    /// Budget for `mechanism` at `(epsilon, delta)` with clipping norm `clip`.
    pub fn new(mechanism: Mechanism, epsilon: f64, delta: Option<f64>, clip: f64) -> Self {
        Self {
            epsilon: Some(epsilon),
            delta,
            clip: Some(clip),
            mechanism,
        }
    }

    /// Plain aggregation, clipped when `clip` is given.
    pub fn no_dp(clip: Option<f64>) -> Self {
        Self {
            epsilon: None,
            delta: None,
            clip,
            mechanism: Mechanism::None,
        }
    }

    /// Whether this budget disables DP.
    pub fn is_no_dp(&self) -> bool {
        match self.epsilon {
            None => true,
            Some(eps) => eps == NO_DP_EPSILON,
        }
    }

    /// Mechanism actually applied, after resolving the no-DP cases.
    ///
    /// A missing epsilon is only accepted together with [`Mechanism::None`];
    /// the [`NO_DP_EPSILON`] sentinel overrides any requested mechanism.
    pub fn effective_mechanism(&self) -> Result<Mechanism> {
        if self.epsilon.is_none() && self.mechanism != Mechanism::None {
            return Err(DpError::invalid_budget("epsilon", "missing"));
        }
        if self.is_no_dp() {
            if self.mechanism != Mechanism::None {
                warn!(
                    requested = %self.mechanism,
                    "epsilon disables DP; ignoring requested mechanism"
                );
            }
            return Ok(Mechanism::None);
        }

        let epsilon = self.epsilon.unwrap_or_default();
        if !epsilon.is_finite() || epsilon <= 0.0 {
            return Err(DpError::invalid_budget("epsilon", epsilon));
        }
        // A positive epsilon needs a noise mechanism.
        if self.mechanism == Mechanism::None {
            return Err(DpError::unsupported(self.mechanism.as_str()));
        }
        Ok(self.mechanism)
    }

    /// Resolved delta for a population of `num_clients`.
    pub fn resolved_delta(&self, num_clients: usize) -> Result<f64> {
        let delta = self.delta.unwrap_or(1.0 / num_clients as f64);
        if !(delta > 0.0 && delta <= 1.0) {
            return Err(DpError::invalid_budget("delta", delta));
        }
        Ok(delta)
    }

    /// Clipping norm, which must be present and positive.
    pub fn required_clip(&self) -> Result<f64> {
        match self.clip {
            Some(clip) => positive_clip(clip),
            None => Err(DpError::invalid_budget("clip", "missing")),
        }
    }

    /// Clipping norm if present, validated.
    pub fn optional_clip(&self) -> Result<Option<f64>> {
        self.clip.map(positive_clip).transpose()
    }
}

fn positive_clip(clip: f64) -> Result<f64> {
    if clip.is_finite() && clip > 0.0 {
        Ok(clip)
    } else {
        Err(DpError::invalid_budget("clip", clip))
    }
}

/// Quantization and modular summation settings.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompressionParams {
    /// Bit width of the modular range.
    pub bits: u32,
    /// Conditional rounding failure probability.
    pub beta: f64,
    /// Aggregate standard deviations that must fit in the modulus.
    pub k_stddevs: f64,
    /// Rotation before quantization.
    pub rotation: Rotation,
    /// Rounding onto the grid.
    pub rounding: Rounding,
}

impl Default for CompressionParams {
    fn default() -> Self {
        Self {
            bits: 16,
            beta: (-0.5f64).exp(),
            k_stddevs: 4.0,
            rotation: Rotation::default(),
            rounding: Rounding::default(),
        }
    }
}

impl CompressionParams {
    /// Check ranges of every field.
    pub fn validate(&self) -> Result<()> {
        if self.bits == 0 || self.bits > MAX_BITS {
            return Err(DpError::invalid_budget("bits", self.bits));
        }
        if !(0.0..1.0).contains(&self.beta) {
            return Err(DpError::invalid_budget("beta", self.beta));
        }
        if !self.k_stddevs.is_finite() || self.k_stddevs <= 0.0 {
            return Err(DpError::invalid_budget("k_stddevs", self.k_stddevs));
        }
        Ok(())
    }
}

/// Client population and round schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Total client population.
    pub num_clients: usize,
    /// Clients aggregated per round.
    pub num_clients_per_round: usize,
    /// Number of rounds.
    pub num_rounds: usize,
}

impl Schedule {
    /// Check population and round counts.
    pub fn validate(&self) -> Result<()> {
        if self.num_clients == 0 {
            return Err(DpError::invalid_budget("num_clients", self.num_clients));
        }
        if self.num_clients_per_round == 0 || self.num_clients_per_round > self.num_clients {
            return Err(DpError::invalid_budget(
                "num_clients_per_round",
                self.num_clients_per_round,
            ));
        }
        if self.num_rounds == 0 {
            return Err(DpError::invalid_budget("num_rounds", self.num_rounds));
        }
        Ok(())
    }

    /// Fraction of the population sampled each round.
    pub fn sampling_rate(&self) -> f64 {
        self.num_clients_per_round as f64 / self.num_clients as f64
    }
}
