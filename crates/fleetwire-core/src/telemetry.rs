//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::error::{Error, Result};

/// Environment variable that switches log output to JSON.
pub const LOG_JSON_ENV: &str = "FLEETWIRE_LOG_JSON";

/// Install the global tracing subscriber.
///
/// Honors `RUST_LOG` (defaults to `info`) and emits JSON lines when
/// `FLEETWIRE_LOG_JSON` is set. Fails if a subscriber is already installed.
pub fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var(LOG_JSON_ENV).is_ok();

    let result = if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .try_init()
    };

    result.map_err(|e| Error::Configuration(format!("Failed to install tracing subscriber: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_rejected() {
        let _ = init_tracing();
        let err = init_tracing().unwrap_err();
        assert!(err.is_configuration());
    }
}
