//! Privacy accounting for distributed differentially private aggregation.
//!
//! Provides an RDP accountant for the subsampled Gaussian, noise-multiplier
//! calibration, the grid-step and local-noise search for the distributed
//! discrete Gaussian, and the [`PrivacyAccountant`] seam tying them together.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod accountant;
pub mod ddgauss;
pub mod gaussian;
pub mod rdp;

pub use accountant::{PrivacyAccountant, RdpPrivacyAccountant};
pub use ddgauss::{
    ddgauss_epsilon, ddgauss_params, ddgauss_zcdp_epsilon, local_stddev_for_gamma,
    DiscreteGaussianTarget,
};
pub use gaussian::{calibrate_noise_multiplier, gaussian_epsilon};
pub use rdp::{default_orders, RdpAccountant};

/// Common imports for privacy accounting.
pub mod prelude {
    pub use crate::{
        calibrate_noise_multiplier, ddgauss_params, default_orders, DiscreteGaussianTarget,
        PrivacyAccountant, RdpAccountant, RdpPrivacyAccountant,
    };
}
