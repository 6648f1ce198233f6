//! Engine configuration.
//!
//! Values come from environment variables (optionally seeded from a `.env`
//! file) or from `Default` plus the `with_*` builders.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::contract::SpecificationVersion;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Duration that must be positive was zero
    #[error("Invalid duration for {field}: must be greater than 0")]
    ZeroDuration {
        /// Offending field
        field: &'static str,
    },

    /// Only one of the TLS certificate/key pair was supplied
    #[error("TLS requires both a certificate and a key")]
    IncompleteTls,

    /// TLS was requested but no certificate material is configured
    #[error("TLS requested but no certificate is configured")]
    TlsNotConfigured,

    /// TLS was requested from a build without the `tls` feature
    #[error("TLS support is not compiled in (enable the `tls` feature)")]
    TlsUnsupported,

    /// Environment variable parse error
    #[error("Failed to parse environment variable {name}: {reason}")]
    ParseError {
        /// Variable name
        name: String,
        /// Parser message
        reason: String,
    },
}

/// How a request picks among several interactions with the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CandidatePolicy {
    /// Prefer the interaction whose provider states appear in the
    /// `x-pact-provider-state` request header, then insertion order
    #[default]
    ProviderState,
    /// Always take the first registered candidate
    InsertionOrder,
}

impl FromStr for CandidatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "provider-state" | "provider_state" => Ok(Self::ProviderState),
            "insertion-order" | "insertion_order" => Ok(Self::InsertionOrder),
            other => Err(format!("unknown candidate policy '{other}'")),
        }
    }
}

/// PEM material for TLS mock servers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Certificate chain file
    pub cert_path: PathBuf,
    /// Private key file
    pub key_path: PathBuf,
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Directory holding `<name>-<version>/pact-plugin.json` installs
    pub plugin_dir: PathBuf,
    /// Deadline for a plugin process to announce its port and answer `InitPlugin`
    pub plugin_startup_timeout: Duration,
    /// Deadline for every other plugin RPC
    pub plugin_rpc_timeout: Duration,
    /// How long cleanup waits for in-flight requests
    pub shutdown_grace: Duration,
    /// Pact specification version written to contracts
    pub specification: SpecificationVersion,
    /// Tie-break policy for ambiguous requests
    pub candidate_policy: CandidatePolicy,
    /// Optional TLS material
    pub tls: Option<TlsConfig>,
    /// Fallback log level for hosts that install tracing from this config
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            plugin_dir: default_plugin_dir(),
            plugin_startup_timeout: Duration::from_secs(10),
            plugin_rpc_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(3),
            specification: SpecificationVersion::V4,
            candidate_policy: CandidatePolicy::ProviderState,
            tls: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables with validation.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result fails
    /// [`validate`](Self::validate).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        let tls = match (env::var("PACT_TLS_CERT").ok(), env::var("PACT_TLS_KEY").ok()) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => return Err(ConfigError::IncompleteTls),
        };

        let config = Self {
            plugin_dir: env::var("PACT_PLUGIN_DIR").map_or(defaults.plugin_dir, PathBuf::from),
            plugin_startup_timeout: parse_millis_env(
                "PACT_PLUGIN_STARTUP_TIMEOUT_MS",
                defaults.plugin_startup_timeout,
            )?,
            plugin_rpc_timeout: parse_millis_env(
                "PACT_PLUGIN_RPC_TIMEOUT_MS",
                defaults.plugin_rpc_timeout,
            )?,
            shutdown_grace: parse_millis_env("PACT_SHUTDOWN_GRACE_MS", defaults.shutdown_grace)?,
            specification: parse_env("PACT_SPECIFICATION_VERSION", defaults.specification)?,
            candidate_policy: parse_env("PACT_CANDIDATE_POLICY", defaults.candidate_policy)?,
            tls,
            log_level: env::var("PACT_LOG_LEVEL").unwrap_or(defaults.log_level),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for zero timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.plugin_startup_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "plugin_startup_timeout",
            });
        }
        if self.plugin_rpc_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "plugin_rpc_timeout",
            });
        }
        if self.shutdown_grace.is_zero() {
            return Err(ConfigError::ZeroDuration {
                field: "shutdown_grace",
            });
        }
        Ok(())
    }

    /// Set the plugin install directory.
    #[must_use]
    pub fn with_plugin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plugin_dir = dir.into();
        self
    }

    /// Set the plugin RPC deadline.
    #[must_use]
    pub fn with_plugin_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_rpc_timeout = timeout;
        self
    }

    /// Set the plugin startup deadline.
    #[must_use]
    pub fn with_plugin_startup_timeout(mut self, timeout: Duration) -> Self {
        self.plugin_startup_timeout = timeout;
        self
    }

    /// Set the cleanup grace period.
    #[must_use]
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Set the specification version written to contracts.
    #[must_use]
    pub fn with_specification(mut self, version: SpecificationVersion) -> Self {
        self.specification = version;
        self
    }

    /// Set the candidate tie-break policy.
    #[must_use]
    pub fn with_candidate_policy(mut self, policy: CandidatePolicy) -> Self {
        self.candidate_policy = policy;
        self
    }

    /// Enable TLS with the given PEM files.
    #[must_use]
    pub fn with_tls(mut self, cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        self.tls = Some(TlsConfig {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        });
        self
    }
}

fn default_plugin_dir() -> PathBuf {
    env::var("HOME")
        .map(|home| PathBuf::from(home).join(".pact").join("plugins"))
        .unwrap_or_else(|_| PathBuf::from(".pact/plugins"))
}

/// Parse an environment variable with a default value.
fn parse_env<T: FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::ParseError {
            name: name.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

/// Parse a millisecond count environment variable into a duration.
fn parse_millis_env(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_env(name, default_ms).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.specification, SpecificationVersion::V4);
        assert_eq!(config.candidate_policy, CandidatePolicy::ProviderState);
        assert!(config.plugin_dir.ends_with("plugins"));
    }

    #[test]
    fn test_config_validation_zero_rpc_timeout() {
        let config = EngineConfig::default().with_plugin_rpc_timeout(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "plugin_rpc_timeout"
            })
        ));
    }

    #[test]
    fn test_config_validation_zero_grace() {
        let config = EngineConfig::default().with_shutdown_grace(Duration::ZERO);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration { .. })
        ));
    }

    #[test]
    fn test_candidate_policy_parse() {
        assert_eq!(
            "insertion-order".parse::<CandidatePolicy>(),
            Ok(CandidatePolicy::InsertionOrder)
        );
        assert_eq!(
            "Provider_State".parse::<CandidatePolicy>(),
            Ok(CandidatePolicy::ProviderState)
        );
        assert!("random".parse::<CandidatePolicy>().is_err());
    }

    #[test]
    fn test_parse_env_missing_uses_default() {
        let value = parse_millis_env("PACT_MOCK_TEST_UNSET_VARIABLE", Duration::from_millis(42));
        assert_eq!(value.unwrap(), Duration::from_millis(42));
    }

    #[test]
    fn test_builder_sets_tls() {
        let config = EngineConfig::default().with_tls("cert.pem", "key.pem");
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert_path, PathBuf::from("cert.pem"));
        assert_eq!(tls.key_path, PathBuf::from("key.pem"));
    }
}
