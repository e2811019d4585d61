//! Aggregation stage interface, the sum transport and the mean stage.
//!
//! A pipeline is an ordered list of stages around a sum transport. Each
//! client record runs through every stage's client transform from the
//! outermost stage inward; the transport sums the records; the sum then runs
//! through every stage's server transform from the innermost stage outward.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{DpError, Result};
use crate::rng::{shared_rng, StageRng};
use crate::rotation::RandomizedHadamard;
use crate::tensor::{IntVector, Vector};

/// A client record or an aggregate moving through the pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    /// Real-valued vector.
    Real(Vector),
    /// Integer vector on the quantization grid.
    Quantized(IntVector),
}

impl Record {
    /// Number of coordinates.
    pub fn len(&self) -> usize {
        match self {
            Record::Real(v) => v.len(),
            Record::Quantized(v) => v.len(),
        }
    }

    /// Whether the record has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Short name of the representation, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Real(_) => "real",
            Record::Quantized(_) => "quantized",
        }
    }

    /// Unwrap a real record, or fail naming the stage that expected one.
    pub fn into_real(self, stage: &str) -> Result<Vector> {
        match self {
            Record::Real(v) => Ok(v),
            other => Err(DpError::input(format!(
                "{stage} expects a real record, got {}",
                other.kind()
            ))),
        }
    }

    /// Unwrap a quantized record, or fail naming the stage that expected one.
    pub fn into_quantized(self, stage: &str) -> Result<IntVector> {
        match self {
            Record::Quantized(v) => Ok(v),
            other => Err(DpError::input(format!(
                "{stage} expects a quantized record, got {}",
                other.kind()
            ))),
        }
    }
}

/// Public per-round values every participant agrees on.
#[derive(Clone, Debug, PartialEq)]
pub struct RoundContext {
    /// Round number.
    pub round: u64,
    /// Public pipeline seed from which shared randomness is derived.
    pub seed: u64,
    /// Number of client records aggregated this round.
    pub num_records: usize,
    /// Rotation shared by the round's participants, drawn once per round.
    pub rotation: Option<Arc<RandomizedHadamard>>,
}

impl RoundContext {
    /// Context without a precomputed rotation.
    pub fn new(round: u64, seed: u64, num_records: usize) -> Self {
        Self {
            round,
            seed,
            num_records,
            rotation: None,
        }
    }

    /// Draw the round's shared `dim`-dimensional rotation from the shared
    /// stream.
    pub fn with_shared_rotation(mut self, dim: usize) -> Result<Self> {
        let mut rng = shared_rng(self.seed, self.round);
        self.rotation = Some(Arc::new(RandomizedHadamard::new(dim, &mut rng)?));
        Ok(self)
    }
}

/// Observations about a single client's record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClientReport {
    /// L2 norm before clipping, when a clipping stage ran.
    pub norm: Option<f64>,
    /// Whether the record was clipped.
    pub clipped: bool,
    /// Coordinates that wrapped during modular reduction.
    pub wrapped: usize,
}

/// Metrics for one aggregation round.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct RoundMetrics {
    /// Round number.
    pub round: u64,
    /// Number of client records aggregated.
    pub num_clients: usize,
    /// Number of records scaled down by clipping.
    pub num_clipped: usize,
    /// Mean pre-clipping L2 norm.
    pub mean_norm: Option<f64>,
    /// Largest pre-clipping L2 norm.
    pub max_norm: Option<f64>,
    /// Client coordinates that wrapped during modular reduction.
    pub client_wraps: usize,
    /// Aggregate coordinates that wrapped during modular reduction.
    pub aggregate_wraps: usize,
}

impl RoundMetrics {
    /// Fold client reports into round metrics.
    pub fn from_reports(round: u64, reports: &[ClientReport]) -> Self {
        let norms: Vec<f64> = reports.iter().filter_map(|r| r.norm).collect();
        let (mean_norm, max_norm) = if norms.is_empty() {
            (None, None)
        } else {
            let mean = norms.iter().sum::<f64>() / norms.len() as f64;
            let max = norms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            (Some(mean), Some(max))
        };
        Self {
            round,
            num_clients: reports.len(),
            num_clipped: reports.iter().filter(|r| r.clipped).count(),
            mean_norm,
            max_norm,
            client_wraps: reports.iter().map(|r| r.wrapped).sum(),
            aggregate_wraps: 0,
        }
    }
}

/// One reversible step of an aggregation pipeline.
pub trait AggregationStage: fmt::Debug + Send + Sync {
    /// Stage name for logs and errors.
    fn name(&self) -> &'static str;

    /// Transform one client's record before summation.
    fn client_transform(
        &self,
        record: Record,
        _ctx: &RoundContext,
        _rng: &mut StageRng,
        _report: &mut ClientReport,
    ) -> Result<Record> {
        Ok(record)
    }

    /// Transform the summed record on the server.
    fn server_transform(
        &self,
        aggregate: Record,
        _ctx: &RoundContext,
        _rng: &mut StageRng,
        _metrics: &mut RoundMetrics,
    ) -> Result<Record> {
        Ok(aggregate)
    }
}

/// Associative, commutative summation of client records.
///
/// Stands in for the transport that moves records to the server, which may be
/// a secure aggregation protocol.
pub trait SumTransport: fmt::Debug + Send + Sync {
    /// Sum all records into one.
    fn sum(&self, records: Vec<Record>) -> Result<Record>;
}

/// In-process elementwise sum.
///
/// Integer sums use checked addition; overflow is reported rather than
/// silently wrapped.
#[derive(Clone, Copy, Debug, Default)]
pub struct PlainSum;

impl SumTransport for PlainSum {
    fn sum(&self, records: Vec<Record>) -> Result<Record> {
        let mut iter = records.into_iter();
        let mut acc = iter
            .next()
            .ok_or_else(|| DpError::input("cannot sum an empty set of records"))?;
        for record in iter {
            if record.len() != acc.len() {
                return Err(DpError::input(format!(
                    "record length {} does not match {}",
                    record.len(),
                    acc.len()
                )));
            }
            acc = match (acc, record) {
                (Record::Real(mut a), Record::Real(b)) => {
                    a += &b;
                    Record::Real(a)
                }
                (Record::Quantized(mut a), Record::Quantized(b)) => {
                    for (x, y) in a.iter_mut().zip(b.iter()) {
                        *x = x
                            .checked_add(*y)
                            .ok_or_else(|| DpError::input("integer sum overflowed i64"))?;
                    }
                    Record::Quantized(a)
                }
                (a, b) => {
                    return Err(DpError::input(format!(
                        "cannot sum {} and {} records",
                        a.kind(),
                        b.kind()
                    )))
                }
            };
        }
        Ok(acc)
    }
}

/// Unweighted mean over the round's client records.
///
/// Must sit outside any quantizing stage: dividing grid values would break
/// dequantization.
#[derive(Clone, Copy, Debug, Default)]
pub struct MeanStage;

impl AggregationStage for MeanStage {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn server_transform(
        &self,
        aggregate: Record,
        ctx: &RoundContext,
        _rng: &mut StageRng,
        _metrics: &mut RoundMetrics,
    ) -> Result<Record> {
        if ctx.num_records == 0 {
            return Err(DpError::input("mean over zero records"));
        }
        let sum = aggregate.into_real(self.name())?;
        Ok(Record::Real(sum / ctx.num_records as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::server_rng;
    use ndarray::array;

    fn ctx(num_records: usize) -> RoundContext {
        RoundContext::new(0, 0, num_records)
    }

    #[test]
    fn plain_sum_adds_real_records() {
        let sum = PlainSum
            .sum(vec![
                Record::Real(array![1.0, 2.0]),
                Record::Real(array![3.0, -1.0]),
            ])
            .expect("sum");
        assert_eq!(sum, Record::Real(array![4.0, 1.0]));
    }

    #[test]
    fn plain_sum_rejects_mixed_and_mismatched_records() {
        assert!(PlainSum
            .sum(vec![Record::Real(array![1.0]), Record::Quantized(array![1])])
            .is_err());
        assert!(PlainSum
            .sum(vec![Record::Quantized(array![1]), Record::Quantized(array![1, 2])])
            .is_err());
        assert!(PlainSum.sum(vec![]).is_err());
    }

    #[test]
    fn plain_sum_reports_integer_overflow() {
        let result = PlainSum.sum(vec![
            Record::Quantized(array![i64::MAX]),
            Record::Quantized(array![1]),
        ]);
        assert!(matches!(result, Err(DpError::InvalidInput { .. })));
    }

    #[test]
    fn mean_stage_divides_by_record_count() {
        let mut metrics = RoundMetrics::default();
        let mut rng = server_rng(0, 0);
        let out = MeanStage
            .server_transform(Record::Real(array![3.0, 6.0]), &ctx(3), &mut rng, &mut metrics)
            .expect("mean");
        assert_eq!(out, Record::Real(array![1.0, 2.0]));
    }

    #[test]
    fn mean_stage_rejects_quantized_records() {
        let mut metrics = RoundMetrics::default();
        let mut rng = server_rng(0, 0);
        assert!(MeanStage
            .server_transform(Record::Quantized(array![3]), &ctx(1), &mut rng, &mut metrics)
            .is_err());
    }

    #[test]
    fn metrics_fold_reports() {
        let reports = vec![
            ClientReport {
                norm: Some(1.0),
                clipped: false,
                wrapped: 0,
            },
            ClientReport {
                norm: Some(3.0),
                clipped: true,
                wrapped: 2,
            },
        ];
        let metrics = RoundMetrics::from_reports(4, &reports);
        assert_eq!(metrics.round, 4);
        assert_eq!(metrics.num_clients, 2);
        assert_eq!(metrics.num_clipped, 1);
        assert_eq!(metrics.mean_norm, Some(2.0));
        assert_eq!(metrics.max_norm, Some(3.0));
        assert_eq!(metrics.client_wraps, 2);
    }
}
