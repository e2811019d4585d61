//! Modular clipping into a symmetric integer range.
//!
//! Values are reduced with floored arithmetic so that negative inputs wrap to
//! the top of the range instead of being truncated toward zero. Summing
//! reduced records and reducing again recovers the true sum whenever it lies
//! inside the range.

use serde::{Deserialize, Serialize};

use crate::error::{DpError, Result};
use crate::rng::StageRng;
use crate::tensor::IntVector;
use crate::transform::{AggregationStage, ClientReport, Record, RoundContext, RoundMetrics};

/// Half-open integer range `[lower, upper)` used for modular reduction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModularRange {
    lower: i64,
    upper: i64,
}

impl ModularRange {
    /// Create a range; requires `lower < upper`.
    pub fn new(lower: i64, upper: i64) -> Result<Self> {
        if lower >= upper {
            return Err(DpError::input(format!(
                "modular range requires lower < upper, got [{lower}, {upper})"
            )));
        }
        // The width must itself be representable.
        upper
            .checked_sub(lower)
            .ok_or_else(|| DpError::input("modular range width overflows i64"))?;
        Ok(Self { lower, upper })
    }

    /// Signed range `[-2^(bits-1), 2^(bits-1))` for a `bits`-wide modulus.
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits == 0 || bits > 62 {
            return Err(DpError::invalid_budget("bits", bits));
        }
        let half = 1i64 << (bits - 1);
        Self::new(-half, half)
    }

    /// Inclusive lower bound.
    pub fn lower(&self) -> i64 {
        self.lower
    }

    /// Exclusive upper bound.
    pub fn upper(&self) -> i64 {
        self.upper
    }

    /// Width of the range, i.e. the modulus.
    pub fn modulus(&self) -> i64 {
        self.upper - self.lower
    }

    /// Whether `v` already lies inside the range.
    pub fn contains(&self, v: i64) -> bool {
        self.lower <= v && v < self.upper
    }

    /// Reduce `v` into `[lower, upper)`.
    pub fn reduce(&self, v: i64) -> i64 {
        let m = self.modulus() as i128;
        let shifted = (v as i128 - self.lower as i128).rem_euclid(m);
        (shifted + self.lower as i128) as i64
    }

    /// Reduce every coordinate in-place; returns how many coordinates wrapped.
    pub fn reduce_vector(&self, v: &mut IntVector) -> usize {
        let mut wrapped = 0;
        v.mapv_inplace(|x| {
            if self.contains(x) {
                x
            } else {
                wrapped += 1;
                self.reduce(x)
            }
        });
        wrapped
    }
}

/// Stage reducing quantized records, and their sum, into a modular range.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModularClipStage {
    range: ModularRange,
}

impl ModularClipStage {
    /// Create a stage for `range`.
    pub fn new(range: ModularRange) -> Self {
        Self { range }
    }

    /// The active range.
    pub fn range(&self) -> ModularRange {
        self.range
    }
}

impl AggregationStage for ModularClipStage {
    fn name(&self) -> &'static str {
        "modular_clip"
    }

    fn client_transform(
        &self,
        record: Record,
        _ctx: &RoundContext,
        _rng: &mut StageRng,
        report: &mut ClientReport,
    ) -> Result<Record> {
        let mut v = record.into_quantized(self.name())?;
        report.wrapped += self.range.reduce_vector(&mut v);
        Ok(Record::Quantized(v))
    }

    fn server_transform(
        &self,
        aggregate: Record,
        _ctx: &RoundContext,
        _rng: &mut StageRng,
        metrics: &mut RoundMetrics,
    ) -> Result<Record> {
        let mut v = aggregate.into_quantized(self.name())?;
        metrics.aggregate_wraps += self.range.reduce_vector(&mut v);
        Ok(Record::Quantized(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use proptest::prelude::*;

    #[test]
    fn from_bits_is_symmetric() {
        let range = ModularRange::from_bits(16).expect("range");
        assert_eq!(range.lower(), -32_768);
        assert_eq!(range.upper(), 32_768);
        assert_eq!(range.modulus(), 65_536);
    }

    #[test]
    fn rejects_empty_range() {
        assert!(ModularRange::new(4, 4).is_err());
        assert!(ModularRange::new(5, 4).is_err());
        assert!(ModularRange::from_bits(0).is_err());
    }

    #[test]
    fn negative_values_wrap_floored() {
        let range = ModularRange::new(-4, 4).expect("range");
        assert_eq!(range.reduce(-5), 3);
        assert_eq!(range.reduce(-13), 3);
        assert_eq!(range.reduce(4), -4);
        assert_eq!(range.reduce(11), 3);
        assert_eq!(range.reduce(-4), -4);
    }

    #[test]
    fn reduce_vector_counts_wraps() {
        let range = ModularRange::new(-4, 4).expect("range");
        let mut v = array![0, 3, 4, -5, -4];
        let wrapped = range.reduce_vector(&mut v);
        assert_eq!(v, array![0, 3, -4, 3, -4]);
        assert_eq!(wrapped, 2);
    }

    #[test]
    fn modular_sum_recovers_true_sum_in_range() {
        let range = ModularRange::from_bits(8).expect("range");
        let records = [100i64, 90, -70, 5];
        let true_sum: i64 = records.iter().sum();
        let reduced_sum: i64 = records.iter().map(|&x| range.reduce(x)).sum();
        assert_eq!(range.reduce(reduced_sum), true_sum);
    }

    #[test]
    fn stage_wraps_inputs_and_sum() {
        use crate::transform::{PlainSum, SumTransport};

        let stage = ModularClipStage::new(ModularRange::from_bits(4).expect("range"));
        let ctx = RoundContext::new(0, 0, 2);
        let mut rng = crate::rng::client_rng(0, 0, 0);
        let mut reports = vec![ClientReport::default(), ClientReport::default()];
        let inputs = [array![9, -3], array![5, -6]];
        let records = inputs
            .iter()
            .zip(reports.iter_mut())
            .map(|(v, report)| {
                stage.client_transform(Record::Quantized(v.clone()), &ctx, &mut rng, report)
            })
            .collect::<Result<Vec<_>>>()
            .expect("client transforms");
        assert_eq!(reports[0].wrapped, 1);

        let sum = PlainSum.sum(records).expect("sum");
        let mut metrics = RoundMetrics::default();
        let out = stage
            .server_transform(sum, &ctx, &mut rng, &mut metrics)
            .expect("server transform");
        // 9 + 5 = 14 and -3 - 6 = -9 both wrap modulo 16.
        assert_eq!(out, Record::Quantized(array![-2, 7]));
    }

    proptest! {
        #[test]
        fn prop_reduce_is_idempotent_and_periodic(
            lower in -1_000i64..1_000,
            width in 1i64..5_000,
            value in -1_000_000i64..1_000_000,
            k in -50i64..50,
        ) {
            let range = ModularRange::new(lower, lower + width).expect("range");
            let reduced = range.reduce(value);
            prop_assert!(range.contains(reduced));
            prop_assert_eq!(range.reduce(reduced), reduced);
            prop_assert_eq!(range.reduce(value + k * width), reduced);
        }
    }
}
