//! Parameter derivation and the audit record.
//!
//! Derivation is a pure function of the public inputs: every participant
//! computing it from the same budget, compression settings, schedule and
//! template obtains bit-identical parameters.

use distributed_dp_accounting::{DiscreteGaussianTarget, PrivacyAccountant};
use distributed_dp_core::{
    pad_dim, ClientTemplate, DpError, ModularRange, Result, Rotation, Rounding,
};
use serde::Serialize;
use tracing::info;

use crate::budget::{CompressionParams, Mechanism, PrivacyBudget, Schedule};

/// Derived parameters of the distributed discrete Gaussian.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DerivedParams {
    /// Bit width of the modular range.
    pub bits: u32,
    /// Modulus `2^bits`.
    pub modulus: i64,
    /// Inclusive lower end of the modular range.
    pub mod_clip_lo: i64,
    /// Exclusive upper end of the modular range.
    pub mod_clip_hi: i64,
    /// Conditional rounding failure probability.
    pub beta: f64,
    /// Aggregate standard deviations fitted into the modulus.
    pub k_stddevs: f64,
    /// Padded dimension.
    pub padded_dim: usize,
    /// Grid step.
    pub gamma: f64,
    /// `1 / gamma`.
    pub scale: f64,
    /// Per-client noise stddev, real units.
    pub local_stddev: f64,
    /// Stddev of the summed noise, real units.
    pub central_stddev: f64,
    /// `central_stddev / clip`.
    pub noise_mult_clip: f64,
    /// Sensitivity after rounding, real units.
    pub inflated_l2: f64,
    /// `central_stddev / inflated_l2`.
    pub noise_mult_inflated: f64,
    /// Rotation before quantization.
    pub rotation: Rotation,
    /// Rounding onto the grid.
    pub rounding: Rounding,
}

impl DerivedParams {
    /// The modular range `[mod_clip_lo, mod_clip_hi)`.
    pub fn modular_range(&self) -> Result<ModularRange> {
        ModularRange::new(self.mod_clip_lo, self.mod_clip_hi)
    }
}

/// Derived parameters of the continuous Gaussian.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GaussianParams {
    /// Calibrated noise multiplier.
    pub noise_multiplier: f64,
    /// `noise_multiplier * clip`.
    pub server_stddev: f64,
}

/// Mechanism-specific part of a [`ParamsRecord`].
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "mechanism")]
pub enum MechanismParams {
    /// Plain mean.
    #[serde(rename = "none")]
    None {
        /// Clipping norm, if any.
        clip: Option<f64>,
    },
    /// Server-side continuous Gaussian.
    #[serde(rename = "gaussian")]
    Gaussian(GaussianParams),
    /// Distributed discrete Gaussian.
    #[serde(rename = "ddgauss")]
    DiscreteGaussian(DerivedParams),
}

impl MechanismParams {
    /// The mechanism these parameters belong to.
    pub fn mechanism(&self) -> Mechanism {
        match self {
            MechanismParams::None { .. } => Mechanism::None,
            MechanismParams::Gaussian(_) => Mechanism::Gaussian,
            MechanismParams::DiscreteGaussian(_) => Mechanism::DiscreteGaussian,
        }
    }
}

/// Everything derived at construction, returned and logged for auditing.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ParamsRecord {
    /// Target epsilon as requested.
    pub epsilon: Option<f64>,
    /// Delta actually used; `None` without DP.
    pub delta: Option<f64>,
    /// Clipping norm.
    pub clip: Option<f64>,
    /// Unpadded client dimension.
    pub dim: usize,
    /// Per-round sampling rate.
    pub sampling_rate: f64,
    /// Mechanism named in the budget.
    pub requested_mechanism: Mechanism,
    /// Population and rounds.
    pub schedule: Schedule,
    /// Mechanism-specific derived values.
    pub params: MechanismParams,
}

impl ParamsRecord {
    /// Mechanism applied after resolving the no-DP cases.
    pub fn mechanism(&self) -> Mechanism {
        self.params.mechanism()
    }

    /// Discrete Gaussian parameters, if that mechanism is active.
    pub fn derived(&self) -> Option<&DerivedParams> {
        match &self.params {
            MechanismParams::DiscreteGaussian(p) => Some(p),
            _ => None,
        }
    }

    /// Gaussian parameters, if that mechanism is active.
    pub fn gaussian(&self) -> Option<&GaussianParams> {
        match &self.params {
            MechanismParams::Gaussian(p) => Some(p),
            _ => None,
        }
    }

    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| DpError::numerical(format!("cannot serialize params: {e}")))
    }
}

/// Derive mechanism parameters.
///
/// All inputs are validated before the accountant is consulted.
pub fn derive_params<A: PrivacyAccountant + ?Sized>(
    budget: &PrivacyBudget,
    compression: &CompressionParams,
    schedule: &Schedule,
    template: &ClientTemplate,
    accountant: &A,
) -> Result<ParamsRecord> {
    schedule.validate()?;
    let mechanism = budget.effective_mechanism()?;
    let dim = template.total_dim();
    let sampling_rate = schedule.sampling_rate();

    let (delta, params) = match mechanism {
        Mechanism::None => {
            let clip = budget.optional_clip()?;
            info!(?clip, dim, "using plain aggregation");
            (None, MechanismParams::None { clip })
        }
        Mechanism::Gaussian => {
            let (epsilon, delta, clip) = dp_inputs(budget, schedule, dim, mechanism)?;
            let noise_multiplier = accountant.gaussian_noise_multiplier(
                epsilon,
                delta,
                sampling_rate,
                schedule.num_rounds,
            )?;
            let params = GaussianParams {
                noise_multiplier,
                server_stddev: noise_multiplier * clip,
            };
            info!(noise_multiplier, server_stddev = params.server_stddev, "gaussian parameters");
            (Some(delta), MechanismParams::Gaussian(params))
        }
        Mechanism::DiscreteGaussian => {
            let (epsilon, delta, clip) = dp_inputs(budget, schedule, dim, mechanism)?;
            compression.validate()?;
            let derived = derive_ddgauss(
                epsilon,
                delta,
                clip,
                dim,
                sampling_rate,
                compression,
                schedule,
                accountant,
            )?;
            (Some(delta), MechanismParams::DiscreteGaussian(derived))
        }
    };

    Ok(ParamsRecord {
        epsilon: budget.epsilon,
        delta,
        clip: budget.clip,
        dim,
        sampling_rate,
        requested_mechanism: budget.mechanism,
        schedule: *schedule,
        params,
    })
}

/// Validated `(epsilon, delta, clip)` shared by the noise mechanisms.
fn dp_inputs(
    budget: &PrivacyBudget,
    schedule: &Schedule,
    dim: usize,
    mechanism: Mechanism,
) -> Result<(f64, f64, f64)> {
    let epsilon = budget.epsilon.unwrap_or_default();
    let clip = budget.required_clip()?;
    let delta = budget.resolved_delta(schedule.num_clients)?;
    info!(
        epsilon,
        delta,
        clip,
        dim,
        sampling_rate = schedule.sampling_rate(),
        mechanism = %mechanism,
        num_clients = schedule.num_clients,
        num_clients_per_round = schedule.num_clients_per_round,
        num_rounds = schedule.num_rounds,
        "shared DP parameters"
    );
    Ok((epsilon, delta, clip))
}

#[allow(clippy::too_many_arguments)]
fn derive_ddgauss<A: PrivacyAccountant + ?Sized>(
    epsilon: f64,
    delta: f64,
    clip: f64,
    dim: usize,
    sampling_rate: f64,
    compression: &CompressionParams,
    schedule: &Schedule,
    accountant: &A,
) -> Result<DerivedParams> {
    let padded_dim = pad_dim(dim);
    let range = ModularRange::from_bits(compression.bits)?;

    let (gamma, local_stddev) = accountant.discrete_gaussian_params(&DiscreteGaussianTarget {
        epsilon,
        delta,
        sampling_rate,
        steps: schedule.num_rounds,
        l2_clip_norm: clip,
        bits: compression.bits,
        num_clients: schedule.num_clients_per_round,
        dim: padded_dim,
        beta: compression.beta,
        k_stddevs: compression.k_stddevs,
    })?;
    if !gamma.is_finite() || gamma <= 0.0 {
        return Err(DpError::accounting(format!("accountant returned gamma {gamma}")));
    }
    if !local_stddev.is_finite() || local_stddev < 0.0 {
        return Err(DpError::accounting(format!(
            "accountant returned local stddev {local_stddev}"
        )));
    }

    let scale = 1.0 / gamma;
    let central_stddev = local_stddev * (schedule.num_clients_per_round as f64).sqrt();
    let inflated_l2 =
        accountant.rounded_l2_inflation(clip * scale, compression.beta, padded_dim)? / scale;

    let params = DerivedParams {
        bits: compression.bits,
        modulus: range.modulus(),
        mod_clip_lo: range.lower(),
        mod_clip_hi: range.upper(),
        beta: compression.beta,
        k_stddevs: compression.k_stddevs,
        padded_dim,
        gamma,
        scale,
        local_stddev,
        central_stddev,
        noise_mult_clip: central_stddev / clip,
        inflated_l2,
        noise_mult_inflated: central_stddev / inflated_l2,
        rotation: compression.rotation,
        rounding: compression.rounding,
    };
    info!(
        bits = params.bits,
        padded_dim,
        gamma,
        scale,
        local_stddev,
        central_stddev,
        inflated_l2,
        noise_mult_clip = params.noise_mult_clip,
        noise_mult_inflated = params.noise_mult_inflated,
        "ddgauss parameters"
    );
    Ok(params)
}
