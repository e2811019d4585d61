//! Distributed discrete Gaussian query.
//!
//! Each client pads its clipped record to a power of two, rotates it with a
//! rotation shared by every participant of the round, scales and rounds it
//! onto the integer grid and adds its share of discrete Gaussian noise. The
//! server undoes the scaling and the rotation on the sum and strips the
//! padding.

use std::sync::Arc;


use crate::error::{DpError, Result};
use crate::noise::add_discrete_gaussian_noise;
use crate::quantize::{dequantize, rounded_l2_norm_bound, scale_and_round, Rounding};
use crate::rng::{shared_rng, StageRng};
use crate::rotation::{RandomizedHadamard, Rotation};
use crate::tensor::Vector;
use crate::transform::{AggregationStage, ClientReport, Record, RoundContext, RoundMetrics};

/// Parameters of a [`DiscreteGaussianQuery`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueryParams {
    /// Per-client noise standard deviation in real units.
    pub local_stddev: f64,
    /// L2 norm bound of incoming records.
    pub l2_norm_bound: f64,
    /// Failure probability for conditional randomized rounding.
    pub beta: f64,
    /// Unpadded record length.
    pub dim: usize,
    /// Padded record length, a power of two.
    pub padded_dim: usize,
    /// Grid scale; one grid step is `1 / scale` in real units.
    pub scale: f64,
    /// Rotation applied before quantization.
    pub rotation: Rotation,
    /// Rounding mode.
    pub rounding: Rounding,
}

/// Stage quantizing real records and adding distributed discrete Gaussian noise.
#[derive(Clone, Debug, PartialEq)]
pub struct DiscreteGaussianQuery {
    params: QueryParams,
    noise_stddev: f64,
    norm_bound: f64,
}

impl DiscreteGaussianQuery {
    /// Validate `params` and build the stage.
    pub fn new(params: QueryParams) -> Result<Self> {
        if params.dim == 0 || params.padded_dim < params.dim {
            return Err(DpError::input(format!(
                "padded dimension {} cannot hold dimension {}",
                params.padded_dim, params.dim
            )));
        }
        if !params.padded_dim.is_power_of_two() {
            return Err(DpError::input(format!(
                "padded dimension {} is not a power of two",
                params.padded_dim
            )));
        }
        if !params.scale.is_finite() || params.scale <= 0.0 {
            return Err(DpError::numerical(format!("invalid scale {}", params.scale)));
        }
        if !params.local_stddev.is_finite() || params.local_stddev < 0.0 {
            return Err(DpError::numerical(format!(
                "invalid local stddev {}",
                params.local_stddev
            )));
        }
        let norm_bound =
            rounded_l2_norm_bound(params.l2_norm_bound * params.scale, params.beta, params.padded_dim)?;
        Ok(Self {
            params,
            noise_stddev: params.local_stddev * params.scale,
            norm_bound,
        })
    }

    /// The stage parameters.
    pub fn params(&self) -> &QueryParams {
        &self.params
    }

    /// Per-client noise standard deviation in grid units.
    pub fn noise_stddev(&self) -> f64 {
        self.noise_stddev
    }

    /// The round's rotation; drawn here only when the context carries none
    /// of the right dimension.
    fn rotation(&self, ctx: &RoundContext) -> Result<Option<Arc<RandomizedHadamard>>> {
        match self.params.rotation {
            Rotation::Identity => Ok(None),
            Rotation::Hadamard => match &ctx.rotation {
                Some(rotation) if rotation.dim() == self.params.padded_dim => {
                    Ok(Some(Arc::clone(rotation)))
                }
                _ => {
                    let mut rng = shared_rng(ctx.seed, ctx.round);
                    let rotation = RandomizedHadamard::new(self.params.padded_dim, &mut rng)?;
                    Ok(Some(Arc::new(rotation)))
                }
            },
        }
    }
}

impl AggregationStage for DiscreteGaussianQuery {
    fn name(&self) -> &'static str {
        "ddgauss_query"
    }

    fn client_transform(
        &self,
        record: Record,
        ctx: &RoundContext,
        rng: &mut StageRng,
        _report: &mut ClientReport,
    ) -> Result<Record> {
        let v = record.into_real(self.name())?;
        if v.len() != self.params.dim {
            return Err(DpError::input(format!(
                "{} expects length {}, got {}",
                self.name(),
                self.params.dim,
                v.len()
            )));
        }

        let mut padded: Vector = v
            .iter()
            .copied()
            .chain(std::iter::repeat(0.0))
            .take(self.params.padded_dim)
            .collect();
        if let Some(rotation) = self.rotation(ctx)? {
            rotation.rotate(&mut padded)?;
        }

        let mut grid = scale_and_round(
            &padded,
            self.params.scale,
            self.params.rounding,
            self.norm_bound,
            rng,
        )?;
        add_discrete_gaussian_noise(&mut grid, self.noise_stddev, rng);
        Ok(Record::Quantized(grid))
    }

    fn server_transform(
        &self,
        aggregate: Record,
        ctx: &RoundContext,
        _rng: &mut StageRng,
        _metrics: &mut RoundMetrics,
    ) -> Result<Record> {
        let grid = aggregate.into_quantized(self.name())?;
        if grid.len() != self.params.padded_dim {
            return Err(DpError::input(format!(
                "{} expects aggregate length {}, got {}",
                self.name(),
                self.params.padded_dim,
                grid.len()
            )));
        }

        let mut real = dequantize(&grid, self.params.scale);
        if let Some(rotation) = self.rotation(ctx)? {
            rotation.inverse(&mut real)?;
        }
        Ok(Record::Real(
            real.iter().take(self.params.dim).copied().collect(),
        ))
    }
}
