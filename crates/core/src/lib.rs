//! Building blocks for distributed differentially private aggregation.
//!
//! Client records are clipped, optionally rotated and quantized onto an
//! integer grid, perturbed with discrete Gaussian noise and reduced into a
//! modular range so that a secure sum can combine them. The pieces here are
//! independent of how the mechanism parameters are chosen.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod clipping;
pub mod error;
pub mod modular;
pub mod noise;
pub mod quantize;
pub mod query;
pub mod rng;
pub mod rotation;
pub mod template;
pub mod tensor;
pub mod transform;

pub use clipping::{clip_vector, ClipReport, ClipStage};
pub use error::{DpError, Result};
pub use modular::{ModularClipStage, ModularRange};
pub use noise::{
    add_discrete_gaussian_noise, add_gaussian_noise, DiscreteGaussian, ServerGaussianNoiseStage,
};
pub use quantize::{dequantize, rounded_l2_norm_bound, scale_and_round, Rounding};
pub use query::{DiscreteGaussianQuery, QueryParams};
pub use rng::{client_rng, server_rng, shared_rng, NoiseSource, StageRng};
pub use rotation::{RandomizedHadamard, Rotation};
pub use template::{pad_dim, ClientTemplate};
pub use tensor::{l2_norm, IntVector, Tensor, Vector};
pub use transform::{
    AggregationStage, ClientReport, MeanStage, PlainSum, Record, RoundContext, RoundMetrics,
    SumTransport,
};

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        clip_vector, pad_dim, rounded_l2_norm_bound, AggregationStage, ClientTemplate, ClipStage,
        DiscreteGaussianQuery, DpError, MeanStage, ModularClipStage, ModularRange, NoiseSource,
        PlainSum, QueryParams, Record, Result, Rotation, Rounding, RoundContext, RoundMetrics,
        ServerGaussianNoiseStage, SumTransport, Tensor, Vector,
    };
}
