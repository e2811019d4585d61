//! L2 clipping for bounded client sensitivity.

use crate::error::{DpError, Result};
use crate::rng::StageRng;
use crate::tensor::{l2_norm, sanitize, Vector};
use crate::transform::{AggregationStage, ClientReport, Record, RoundContext};

/// Result of a clipping operation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipReport {
    /// Original L2 norm before clipping.
    pub original_norm: f64,
    /// Whether clipping was applied.
    pub clipped: bool,
    /// Scale factor applied (1.0 if not clipped).
    pub scale: f64,
}

/// Clip a vector to a maximum L2 norm in-place.
///
/// Non-finite coordinates are zeroed first. A vector whose norm is not finite
/// after sanitizing, or a non-positive `max_norm`, yields the zero vector.
pub fn clip_vector(v: &mut Vector, max_norm: f64) -> ClipReport {
    sanitize(v, 0.0, 0.0);
    let norm = l2_norm(v);

    if !max_norm.is_finite() || max_norm <= 0.0 || !norm.is_finite() {
        v.fill(0.0);
        return ClipReport {
            original_norm: norm,
            clipped: true,
            scale: 0.0,
        };
    }

    if norm <= max_norm {
        return ClipReport {
            original_norm: norm,
            clipped: false,
            scale: 1.0,
        };
    }

    let scale = max_norm / norm;
    v.mapv_inplace(|x| x * scale);
    ClipReport {
        original_norm: norm,
        clipped: true,
        scale,
    }
}

/// Stage clipping each client's real record to an L2 norm bound.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipStage {
    clip: f64,
}

impl ClipStage {
    /// Create a clipping stage; `clip` must be positive and finite.
    pub fn new(clip: f64) -> Result<Self> {
        if !clip.is_finite() || clip <= 0.0 {
            return Err(DpError::invalid_budget("clip", clip));
        }
        Ok(Self { clip })
    }

    /// The L2 norm bound.
    pub fn clip(&self) -> f64 {
        self.clip
    }
}

impl AggregationStage for ClipStage {
    fn name(&self) -> &'static str {
        "l2_clip"
    }

    fn client_transform(
        &self,
        record: Record,
        _ctx: &RoundContext,
        _rng: &mut StageRng,
        report: &mut ClientReport,
    ) -> Result<Record> {
        let mut v = record.into_real(self.name())?;
        let clip = clip_vector(&mut v, self.clip);
        report.norm = Some(clip.original_norm);
        report.clipped = clip.clipped;
        Ok(Record::Real(v))
    }
}
