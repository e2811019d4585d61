//! Logging bootstrap.

use distributed_dp_core::{DpError, Result};
use tracing_subscriber::filter::EnvFilter;

use crate::settings::LoggingSettings;

/// Install a formatted `tracing` subscriber filtered by `settings.filter`.
///
/// Returns `false` when a global subscriber was already installed; that one
/// stays in place.
pub fn init_logging(settings: &LoggingSettings) -> Result<bool> {
    let filter = EnvFilter::try_new(&settings.filter).map_err(|e| {
        DpError::config(format!("invalid log filter {:?}: {e}", settings.filter))
    })?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .try_init()
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        let settings = LoggingSettings::default();
        init_logging(&settings).expect("init");
        assert!(!init_logging(&settings).expect("init again"));
    }

    #[test]
    fn rejects_bad_filter() {
        let settings = LoggingSettings {
            filter: "distributed_dp=loud".to_string(),
        };
        assert!(matches!(
            init_logging(&settings),
            Err(DpError::ConfigError { .. })
        ));
    }
}
