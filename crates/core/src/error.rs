//! Error types for distributed DP aggregation.

/// Errors raised while deriving parameters or running an aggregation pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DpError {
    /// A privacy budget, compression or schedule field is out of range.
    #[error("invalid budget: {field} = {value}")]
    InvalidBudget {
        /// Name of the offending field.
        field: &'static str,
        /// The rejected value, rendered for diagnostics.
        value: String,
    },

    /// The requested mechanism is not one of `none`, `gaussian`, `ddgauss`.
    #[error("unsupported mechanism: {mechanism}")]
    UnsupportedMechanism {
        /// The mechanism string exactly as supplied.
        mechanism: String,
    },

    /// The privacy accountant could not meet the target guarantee.
    #[error("accounting error: {msg}")]
    Accounting {
        /// Human-readable error description.
        msg: String,
    },

    /// The client template is malformed.
    #[error("invalid client template: {msg}")]
    InvalidTemplate {
        /// Human-readable error description.
        msg: String,
    },

    /// A client record or aggregate does not fit the pipeline.
    #[error("invalid input: {msg}")]
    InvalidInput {
        /// Human-readable error description.
        msg: String,
    },

    /// Numerical computation error.
    #[error("numerical error: {msg}")]
    NumericalError {
        /// Human-readable error description.
        msg: String,
    },

    /// Settings could not be loaded.
    #[error("configuration error: {msg}")]
    ConfigError {
        /// Human-readable error description.
        msg: String,
    },
}

/// Result type for DP aggregation operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl DpError {
    /// Create an invalid budget error for `field`.
    pub fn invalid_budget(field: &'static str, value: impl std::fmt::Display) -> Self {
        Self::InvalidBudget {
            field,
            value: value.to_string(),
        }
    }

    /// Create an unsupported mechanism error echoing `mechanism` verbatim.
    pub fn unsupported<S: Into<String>>(mechanism: S) -> Self {
        Self::UnsupportedMechanism {
            mechanism: mechanism.into(),
        }
    }

    /// Create an accounting error.
    pub fn accounting<S: Into<String>>(msg: S) -> Self {
        Self::Accounting { msg: msg.into() }
    }

    /// Create an invalid template error.
    pub fn template<S: Into<String>>(msg: S) -> Self {
        Self::InvalidTemplate { msg: msg.into() }
    }

    /// Create an invalid input error.
    pub fn input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput { msg: msg.into() }
    }

    /// Create a numerical error.
    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        Self::NumericalError { msg: msg.into() }
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError { msg: msg.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_mechanism_echoes_value() {
        let err = DpError::unsupported("DDGaussian2");
        assert_eq!(err.to_string(), "unsupported mechanism: DDGaussian2");
    }

    #[test]
    fn invalid_budget_names_field_and_value() {
        let err = DpError::invalid_budget("epsilon", 0.0);
        assert_eq!(err.to_string(), "invalid budget: epsilon = 0");
    }
}
