//! Tracing subscriber setup.
//!
//! The engine only emits `tracing` events; installing a subscriber is left
//! to the embedding process or to tests through this module.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Service name attached to the startup event
    pub service_name: String,
    /// Log level filter used when `RUST_LOG` is unset
    pub log_level: String,
    /// Whether to output JSON format
    pub json_output: bool,
    /// Whether to route output through the libtest capture writer
    pub test_writer: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "pact-mock".to_string(),
            log_level: "info".to_string(),
            json_output: false,
            test_writer: false,
        }
    }
}

impl TracingConfig {
    /// Set the service name.
    #[must_use]
    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    /// Set the fallback log level.
    #[must_use]
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Enable JSON output.
    #[must_use]
    pub const fn with_json_output(mut self) -> Self {
        self.json_output = true;
        self
    }

    /// Write through the test harness so output is captured per test.
    #[must_use]
    pub const fn for_tests(mut self) -> Self {
        self.test_writer = true;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

/// Install the global subscriber.
///
/// Returns `false` when a global subscriber was already installed, which
/// makes the call safe to repeat from every test.
pub fn try_init_tracing(config: &TracingConfig) -> bool {
    let registry = tracing_subscriber::registry().with(config.filter());

    let installed = match (config.json_output, config.test_writer) {
        (true, true) => registry
            .with(tracing_subscriber::fmt::layer().json().with_test_writer())
            .try_init()
            .is_ok(),
        (true, false) => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        (false, true) => registry
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init()
            .is_ok(),
        (false, false) => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::debug!(
            service = %config.service_name,
            level = %config.log_level,
            "tracing initialised"
        );
    }
    installed
}

/// Install the global subscriber, ignoring an already-installed one.
pub fn init_tracing(config: &TracingConfig) {
    let _ = try_init_tracing(config);
}
