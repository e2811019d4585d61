//! Pipeline composition and round execution.

use std::fmt;

use distributed_dp_accounting::{PrivacyAccountant, RdpPrivacyAccountant};
use distributed_dp_core::{
    AggregationStage, ClientReport, ClientTemplate, ClipStage, DiscreteGaussianQuery, DpError,
    MeanStage, ModularClipStage, NoiseSource, PlainSum, QueryParams, Record, Result,
    RoundContext, RoundMetrics, Rotation, ServerGaussianNoiseStage, SumTransport, Tensor, Vector,
};
use tracing::{debug, info, warn};

use crate::budget::{CompressionParams, PrivacyBudget, Schedule};
use crate::params::{derive_params, MechanismParams, ParamsRecord};

/// Inputs needed to build an [`Aggregator`].
#[derive(Clone, Debug, PartialEq)]
pub struct AggregatorConfig {
    /// Privacy budget.
    pub budget: PrivacyBudget,
    /// Quantization settings, used by the discrete mechanism.
    pub compression: CompressionParams,
    /// Population and rounds.
    pub schedule: Schedule,
    /// Shapes of a client update.
    pub template: ClientTemplate,
    /// Public seed of the rotation shared by a round's participants.
    pub seed: u64,
}

impl AggregatorConfig {
    /// Build with the default RDP accountant.
    pub fn build(&self) -> Result<(Aggregator, ParamsRecord)> {
        self.build_with_accountant(&RdpPrivacyAccountant::default())
    }

    /// Derive parameters through `accountant` and compose the pipeline.
    pub fn build_with_accountant<A: PrivacyAccountant + ?Sized>(
        &self,
        accountant: &A,
    ) -> Result<(Aggregator, ParamsRecord)> {
        let params = derive_params(
            &self.budget,
            &self.compression,
            &self.schedule,
            &self.template,
            accountant,
        )?;
        let stages = compose_stages(&params)?;
        info!(
            mechanism = %params.mechanism(),
            stages = ?stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            "aggregator composed"
        );
        let aggregator = Aggregator {
            stages,
            transport: Box::new(PlainSum),
            template: self.template.clone(),
            params: params.clone(),
            seed: self.seed,
            noise: NoiseSource::default(),
        };
        Ok((aggregator, params))
    }
}

/// Stage list for `params`, outermost first.
pub fn compose_stages(params: &ParamsRecord) -> Result<Vec<Box<dyn AggregationStage>>> {
    let mut stages: Vec<Box<dyn AggregationStage>> = vec![Box::new(MeanStage)];
    match &params.params {
        MechanismParams::None { clip } => {
            if let Some(clip) = clip {
                stages.push(Box::new(ClipStage::new(*clip)?));
            }
        }
        MechanismParams::Gaussian(g) => {
            let clip = params
                .clip
                .ok_or_else(|| DpError::invalid_budget("clip", "missing"))?;
            stages.push(Box::new(ClipStage::new(clip)?));
            stages.push(Box::new(ServerGaussianNoiseStage::new(g.server_stddev)?));
        }
        MechanismParams::DiscreteGaussian(d) => {
            let clip = params
                .clip
                .ok_or_else(|| DpError::invalid_budget("clip", "missing"))?;
            stages.push(Box::new(ClipStage::new(clip)?));
            stages.push(Box::new(DiscreteGaussianQuery::new(QueryParams {
                local_stddev: d.local_stddev,
                l2_norm_bound: clip,
                beta: d.beta,
                dim: params.dim,
                padded_dim: d.padded_dim,
                scale: d.scale,
                rotation: d.rotation,
                rounding: d.rounding,
            })?));
            stages.push(Box::new(ModularClipStage::new(d.modular_range()?)));
        }
    }
    Ok(stages)
}

/// Client updates of one round.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoundInputs {
    /// Round number.
    pub round: u64,
    /// One template-shaped update per client.
    pub updates: Vec<Vec<Tensor>>,
}

/// A composed aggregation pipeline, reused every round.
pub struct Aggregator {
    stages: Vec<Box<dyn AggregationStage>>,
    transport: Box<dyn SumTransport>,
    template: ClientTemplate,
    params: ParamsRecord,
    seed: u64,
    noise: NoiseSource,
}

impl fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Aggregator")
            .field("stages", &self.stage_names())
            .field("transport", &self.transport)
            .field("mechanism", &self.params.mechanism())
            .field("seed", &self.seed)
            .field("noise", &self.noise)
            .finish()
    }
}

impl Aggregator {
    /// Replace the summation transport.
    pub fn with_transport<T: SumTransport + 'static>(mut self, transport: T) -> Self {
        self.transport = Box::new(transport);
        self
    }

    /// Draw noise from streams keyed by a private `seed` instead of fresh
    /// entropy, making rounds reproducible.
    ///
    /// Anyone holding `seed` can regenerate and subtract the noise, so this is
    /// for tests and replays only.
    pub fn with_noise_seed(mut self, seed: u64) -> Self {
        warn!("noise streams are seeded and reproducible");
        self.noise = NoiseSource::Seeded(seed);
        self
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// The audit record.
    pub fn params(&self) -> &ParamsRecord {
        &self.params
    }

    /// Template client updates must match.
    pub fn template(&self) -> &ClientTemplate {
        &self.template
    }

    /// Aggregate template-shaped updates.
    pub fn aggregate(&self, inputs: &RoundInputs) -> Result<(Vec<Tensor>, RoundMetrics)> {
        let flat = inputs
            .updates
            .iter()
            .map(|update| self.template.flatten(update))
            .collect::<Result<Vec<_>>>()?;
        let (mean, metrics) = self.aggregate_vectors(inputs.round, &flat)?;
        Ok((self.template.unflatten(&mean)?, metrics))
    }

    /// Aggregate flat updates of length `dim`.
    pub fn aggregate_vectors(&self, round: u64, updates: &[Vector]) -> Result<(Vector, RoundMetrics)> {
        if updates.is_empty() {
            return Err(DpError::input("a round needs at least one client update"));
        }
        let dim = self.template.total_dim();
        if let Some(bad) = updates.iter().find(|u| u.len() != dim) {
            return Err(DpError::input(format!(
                "client update has length {}, expected {dim}",
                bad.len()
            )));
        }

        let mut ctx = RoundContext::new(round, self.seed, updates.len());
        if let Some(derived) = self.params.derived() {
            if derived.rotation == Rotation::Hadamard {
                ctx = ctx.with_shared_rotation(derived.padded_dim)?;
            }
        }

        let mut reports = vec![ClientReport::default(); updates.len()];
        let records = updates
            .iter()
            .zip(reports.iter_mut())
            .enumerate()
            .map(|(client, (update, report))| {
                let mut rng = self.noise.client_rng(round, client);
                self.stages
                    .iter()
                    .try_fold(Record::Real(update.clone()), |record, stage| {
                        stage.client_transform(record, &ctx, &mut rng, report)
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let sum = self.transport.sum(records)?;

        let mut metrics = RoundMetrics::from_reports(round, &reports);
        let mut rng = self.noise.server_rng(round);
        let aggregate = self
            .stages
            .iter()
            .rev()
            .try_fold(sum, |aggregate, stage| {
                stage.server_transform(aggregate, &ctx, &mut rng, &mut metrics)
            })?;

        debug!(
            round,
            num_clients = metrics.num_clients,
            num_clipped = metrics.num_clipped,
            client_wraps = metrics.client_wraps,
            aggregate_wraps = metrics.aggregate_wraps,
            "round aggregated"
        );
        Ok((aggregate.into_real("aggregator")?, metrics))
    }
}
