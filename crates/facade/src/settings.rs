//! Loading of settings.
//!
//! Values defined in the configuration file can be overridden by environment
//! variables prefixed with `DDP_`, with `__` separating nested keys, e.g.
//! `DDP_DP__EPSILON=4.0` or `DDP_COMPRESSION__NUM_BITS=18`.

use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use distributed_dp_core::{ClientTemplate, DpError, Result, Rotation, Rounding};
use serde::Deserialize;
use tracing::warn;

use crate::budget::{CompressionParams, Mechanism, PrivacyBudget, Schedule, NO_DP_EPSILON};
use crate::pipeline::AggregatorConfig;

const ENV_PREFIX: &str = "DDP";

/// The combined settings.
///
/// Each section of the configuration file corresponds to the identically
/// named field.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Settings {
    /// Privacy budget.
    #[serde(default)]
    pub dp: DpSettings,
    /// Quantization and modular summation.
    #[serde(default)]
    pub compression: CompressionSettings,
    /// Population and rounds.
    pub schedule: ScheduleSettings,
    /// Logging.
    #[serde(default)]
    pub log: LoggingSettings,
    /// Public seed of the rotation shared by a round's participants.
    #[serde(default)]
    pub seed: u64,
}

/// The `[dp]` section.
///
/// ```text
/// [dp]
/// epsilon = 2.0
/// delta = 1e-5
/// l2_norm_clip = 0.3
/// mechanism = "ddgauss"
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct DpSettings {
    /// Target epsilon; absent or `-1` disables DP.
    pub epsilon: Option<f64>,
    /// Target delta; defaults to `1 / num_clients`.
    pub delta: Option<f64>,
    /// Per-client L2 clipping norm.
    pub l2_norm_clip: Option<f64>,
    /// One of `none`, `gaussian`, `ddgauss`, in any case.
    #[serde(default = "default_mechanism")]
    pub mechanism: String,
}

fn default_mechanism() -> String {
    Mechanism::None.as_str().to_string()
}

impl Default for DpSettings {
    fn default() -> Self {
        Self {
            epsilon: None,
            delta: None,
            l2_norm_clip: None,
            mechanism: default_mechanism(),
        }
    }
}

/// The `[compression]` section.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct CompressionSettings {
    /// Bit width of the modular range.
    #[serde(default = "default_num_bits")]
    pub num_bits: u32,
    /// Conditional rounding failure probability.
    #[serde(default = "default_beta")]
    pub beta: f64,
    /// Aggregate standard deviations fitted into the modulus; 4 when absent.
    pub k_stddevs: Option<f64>,
    /// `hadamard` or `identity`.
    #[serde(default)]
    pub rotation: Rotation,
    /// `nearest` or `conditional_randomized`.
    #[serde(default)]
    pub rounding: Rounding,
}

fn default_num_bits() -> u32 {
    CompressionParams::default().bits
}

fn default_beta() -> f64 {
    CompressionParams::default().beta
}

impl Default for CompressionSettings {
    fn default() -> Self {
        let defaults = CompressionParams::default();
        Self {
            num_bits: defaults.bits,
            beta: defaults.beta,
            k_stddevs: None,
            rotation: defaults.rotation,
            rounding: defaults.rounding,
        }
    }
}

impl From<&CompressionSettings> for CompressionParams {
    fn from(settings: &CompressionSettings) -> Self {
        Self {
            bits: settings.num_bits,
            beta: settings.beta,
            k_stddevs: settings
                .k_stddevs
                .unwrap_or(CompressionParams::default().k_stddevs),
            rotation: settings.rotation,
            rounding: settings.rounding,
        }
    }
}

/// The `[schedule]` section.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub struct ScheduleSettings {
    /// Total client population.
    pub num_clients: usize,
    /// Clients aggregated per round.
    pub num_clients_per_round: usize,
    /// Number of rounds.
    pub num_rounds: usize,
}

/// The `[log]` section.
///
/// ```text
/// [log]
/// filter = "distributed_dp=debug,info"
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct LoggingSettings {
    /// Comma-separated `tracing` filter directives.
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "info".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file, applying `DDP_` environment overrides.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::load(
            File::from(path.as_ref()).format(FileFormat::Toml),
            environment(),
        )
    }

    /// Load settings from TOML text without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::load(
            File::from_str(toml, FileFormat::Toml),
            Environment::with_prefix(ENV_PREFIX).source(Some(config::Map::new())),
        )
    }

    fn load<S>(file: S, env: Environment) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        Config::builder()
            .add_source(file)
            .add_source(env)
            .build()
            .and_then(|config| config.try_deserialize())
            .map_err(config_error)
    }

    /// Mechanism named in the `[dp]` section.
    ///
    /// An unknown name is an error unless epsilon is the no-DP sentinel, in
    /// which case it is ignored like any other requested mechanism.
    pub fn mechanism(&self) -> Result<Mechanism> {
        match self.dp.mechanism.parse() {
            Ok(mechanism) => Ok(mechanism),
            Err(err) if self.dp.epsilon == Some(NO_DP_EPSILON) => {
                warn!(%err, "epsilon disables DP; ignoring requested mechanism");
                Ok(Mechanism::None)
            }
            Err(err) => Err(err),
        }
    }

    /// The privacy budget.
    pub fn budget(&self) -> Result<PrivacyBudget> {
        Ok(PrivacyBudget {
            epsilon: self.dp.epsilon,
            delta: self.dp.delta,
            clip: self.dp.l2_norm_clip,
            mechanism: self.mechanism()?,
        })
    }

    /// The client schedule.
    pub fn schedule(&self) -> Schedule {
        Schedule {
            num_clients: self.schedule.num_clients,
            num_clients_per_round: self.schedule.num_clients_per_round,
            num_rounds: self.schedule.num_rounds,
        }
    }

    /// Aggregator configuration for clients sending `template`-shaped updates.
    pub fn aggregator_config(&self, template: ClientTemplate) -> Result<AggregatorConfig> {
        Ok(AggregatorConfig {
            budget: self.budget()?,
            compression: CompressionParams::from(&self.compression),
            schedule: self.schedule(),
            template,
            seed: self.seed,
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

fn config_error(err: ConfigError) -> DpError {
    DpError::config(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DDGAUSS: &str = r#"
        seed = 42

        [dp]
        epsilon = 2.0
        delta = 1e-5
        l2_norm_clip = 0.3
        mechanism = "DDGauss"

        [compression]
        num_bits = 18
        beta = 0.5
        rotation = "identity"
        rounding = "conditional_randomized"

        [schedule]
        num_clients = 1000
        num_clients_per_round = 100
        num_rounds = 10

        [log]
        filter = "debug"
    "#;

    #[test]
    fn loads_every_section() {
        let settings = Settings::from_toml_str(DDGAUSS).expect("settings");
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.dp.epsilon, Some(2.0));
        assert_eq!(settings.log.filter, "debug");
        let config = settings
            .aggregator_config(ClientTemplate::flat(8).expect("template"))
            .expect("config");
        assert_eq!(config.budget.mechanism, Mechanism::DiscreteGaussian);
        assert_eq!(config.compression.bits, 18);
        assert_eq!(config.compression.k_stddevs, 4.0);
        assert_eq!(config.compression.rotation, Rotation::Identity);
        assert_eq!(config.compression.rounding, Rounding::ConditionalRandomized);
        assert_eq!(config.schedule.num_clients_per_round, 100);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn optional_sections_default() {
        let settings = Settings::from_toml_str(
            r#"
            [dp]
            [schedule]
            num_clients = 10
            num_clients_per_round = 10
            num_rounds = 1
            "#,
        )
        .expect("settings");
        assert_eq!(settings.dp.epsilon, None);
        assert_eq!(settings.dp.mechanism, "none");
        assert_eq!(settings.compression, CompressionSettings::default());
        assert_eq!(settings.log, LoggingSettings::default());
        assert_eq!(settings.seed, 0);
    }

    #[test]
    fn sentinel_ignores_unknown_mechanism() {
        let settings = Settings::from_toml_str(
            r#"
            [dp]
            epsilon = -1
            mechanism = "laplace"
            [schedule]
            num_clients = 10
            num_clients_per_round = 5
            num_rounds = 1
            "#,
        )
        .expect("settings");
        assert_eq!(settings.mechanism(), Ok(Mechanism::None));
    }

    #[test]
    fn unknown_mechanism_is_echoed() {
        let toml = DDGAUSS.replace("\"DDGauss\"", "\"Laplace\"");
        let settings = Settings::from_toml_str(&toml).expect("settings");
        assert_eq!(
            settings.budget(),
            Err(DpError::UnsupportedMechanism {
                mechanism: "Laplace".to_string()
            })
        );
    }

    #[test]
    fn environment_overrides_file() {
        let mut vars = config::Map::new();
        vars.insert("DDP_DP__EPSILON".to_string(), "4.5".to_string());
        vars.insert("DDP_COMPRESSION__NUM_BITS".to_string(), "20".to_string());
        let settings = Settings::load(
            File::from_str(DDGAUSS, FileFormat::Toml),
            environment().source(Some(vars)),
        )
        .expect("settings");
        assert_eq!(settings.dp.epsilon, Some(4.5));
        assert_eq!(settings.compression.num_bits, 20);
        assert_eq!(settings.schedule.num_rounds, 10);
    }

    #[test]
    fn malformed_input_is_a_config_error() {
        let err = Settings::from_toml_str("[dp]\nepsilon = \"lots\"").expect_err("invalid");
        assert!(matches!(err, DpError::ConfigError { .. }));
    }
}
