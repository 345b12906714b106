//! Saga runtime configuration loaded from environment variables.

use std::time::Duration;

use event_store::ServiceIdentity;

const DEFAULT_STEP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SOURCE: &str = "saga-runtime";

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `SAGA_STEP_TIMEOUT_SECS` — per-step timeout in seconds (default: `30`)
/// - `SAGA_SERVICE_VERSION` — version stamped on stored events (default: crate version)
/// - `SAGA_SOURCE` — origin stamped on stored events (default: `"saga-runtime"`)
/// - `RUST_LOG` — tracing filter directive (default: `"info"`)
#[derive(Debug, Clone)]
pub struct SagaConfig {
    pub step_timeout: Duration,
    pub service_version: String,
    pub source: String,
    pub log_level: String,
}

impl SagaConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// missing or unparsable values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            step_timeout: lookup("SAGA_STEP_TIMEOUT_SECS")
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.step_timeout),
            service_version: lookup("SAGA_SERVICE_VERSION").unwrap_or(defaults.service_version),
            source: lookup("SAGA_SOURCE").unwrap_or(defaults.source),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
        }
    }

    /// Sets the per-step timeout.
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Identity stamped on every event this runtime appends.
    pub fn identity(&self) -> ServiceIdentity {
        ServiceIdentity::new(self.service_version.clone(), self.source.clone())
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(DEFAULT_STEP_TIMEOUT_SECS),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            source: DEFAULT_SOURCE.to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_values() {
        let config = SagaConfig::default();
        assert_eq!(config.step_timeout, Duration::from_secs(30));
        assert_eq!(config.service_version, env!("CARGO_PKG_VERSION"));
        assert_eq!(config.source, "saga-runtime");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_lookup_overrides() {
        let env: HashMap<&str, &str> = [
            ("SAGA_STEP_TIMEOUT_SECS", "5"),
            ("SAGA_SERVICE_VERSION", "2.4.1"),
            ("SAGA_SOURCE", "clouddriver"),
            ("RUST_LOG", "debug"),
        ]
        .into_iter()
        .collect();

        let config = SagaConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.step_timeout, Duration::from_secs(5));
        assert_eq!(config.service_version, "2.4.1");
        assert_eq!(config.source, "clouddriver");
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_invalid_timeout_falls_back_to_default() {
        let config = SagaConfig::from_lookup(|key| match key {
            "SAGA_STEP_TIMEOUT_SECS" => Some("soon".to_string()),
            _ => None,
        });
        assert_eq!(config.step_timeout, Duration::from_secs(30));

        let config = SagaConfig::from_lookup(|key| match key {
            "SAGA_STEP_TIMEOUT_SECS" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.step_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_identity() {
        let config = SagaConfig::default();
        let identity = config.identity();
        assert_eq!(identity.source, "saga-runtime");
    }
}
