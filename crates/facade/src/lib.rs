//! Parameter derivation and pipeline composition for distributed DP
//! aggregation.
//!
//! Given a privacy budget, the shape of a client update and a client/round
//! schedule, [`AggregatorConfig::build`] derives the noise, quantization and
//! modular parameters of the chosen mechanism and composes the ordered stage
//! pipeline every participant runs. The derived values are returned as a
//! serializable [`ParamsRecord`].
//!
//! ```no_run
//! use distributed_dp::prelude::*;
//!
//! let config = AggregatorConfig {
//!     budget: PrivacyBudget::new(Mechanism::DiscreteGaussian, 2.0, None, 1.0),
//!     compression: CompressionParams::default(),
//!     schedule: Schedule {
//!         num_clients: 1_000,
//!         num_clients_per_round: 100,
//!         num_rounds: 10,
//!     },
//!     template: ClientTemplate::flat(1_000).expect("template"),
//!     seed: 0,
//! };
//! let (aggregator, params) = config.build().expect("build");
//! println!("{}", params.to_json().expect("json"));
//! # let _ = aggregator;
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod budget;
pub mod logging;
pub mod params;
pub mod pipeline;
pub mod settings;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use distributed_dp_accounting as accounting;
pub use distributed_dp_core as core;

pub use accounting::{DiscreteGaussianTarget, PrivacyAccountant, RdpPrivacyAccountant};
pub use budget::{CompressionParams, Mechanism, PrivacyBudget, Schedule, NO_DP_EPSILON};
pub use core::{ClientTemplate, DpError, Result, RoundMetrics, Rotation, Rounding};
pub use logging::init_logging;
pub use params::{derive_params, DerivedParams, GaussianParams, MechanismParams, ParamsRecord};
pub use pipeline::{compose_stages, Aggregator, AggregatorConfig, RoundInputs};
pub use settings::{LoggingSettings, Settings};

/// Convenience prelude for building and running aggregators.
pub mod prelude {
    pub use crate::{
        derive_params, init_logging, Aggregator, AggregatorConfig, CompressionParams,
        DerivedParams, Mechanism, ParamsRecord, PrivacyAccountant, PrivacyBudget,
        RdpPrivacyAccountant, RoundInputs, Schedule, Settings, NO_DP_EPSILON,
    };
    pub use distributed_dp_core::prelude::*;
}
