//! Serving implementations bound to a session.

use serde_json::Value;
use tracing::{info, warn};

use super::http::HttpServer;
use crate::model::{Mismatch, RuleKind};
use crate::plugin::{PluginBridge, PluginRef};
use crate::plugin::proto::MockServerResult;

/// Description attached to mismatches the session cannot tie to one
/// interaction of a plugin transport.
pub const PLUGIN_TRANSPORT: &str = "plugin transport";

/// What is serving the session's interactions.
pub(crate) enum TransportHandle {
    /// Built-in HTTP listener
    Http(HttpServer),
    /// Mock server run by a plugin
    Plugin {
        plugin: PluginRef,
        transport: String,
        server_key: String,
        port: u16,
    },
}

impl TransportHandle {
    pub(crate) const fn port(&self) -> u16 {
        match self {
            Self::Http(server) => server.port(),
            Self::Plugin { port, .. } => *port,
        }
    }

    pub(crate) const fn is_plugin(&self) -> bool {
        matches!(self, Self::Plugin { .. })
    }

    /// Mismatches reported so far by a plugin transport. A failed poll is
    /// itself reported as a mismatch.
    pub(crate) async fn plugin_mismatches(&self) -> Vec<Mismatch> {
        let Self::Plugin {
            plugin, server_key, ..
        } = self
        else {
            return Vec::new();
        };
        match plugin.handle().mock_server_results(server_key).await {
            Ok(results) => results_to_mismatches(results),
            Err(e) => {
                warn!(plugin = %plugin.name(), error = %e, "polling plugin mock server failed");
                vec![Mismatch::plugin_failure(PLUGIN_TRANSPORT, "plugin results", e)]
            }
        }
    }

    /// Stop serving. Returns the final mismatches of a plugin transport.
    pub(crate) async fn shutdown(
        self,
        bridge: &PluginBridge,
        grace: std::time::Duration,
    ) -> Vec<Mismatch> {
        match self {
            Self::Http(server) => {
                server.shutdown(grace).await;
                Vec::new()
            }
            Self::Plugin {
                plugin,
                transport,
                server_key,
                port,
            } => {
                let mismatches = match plugin.handle().shutdown_mock_server(&server_key).await {
                    Ok(results) => results_to_mismatches(results),
                    Err(e) => {
                        warn!(
                            plugin = %plugin.name(),
                            error = %e,
                            "plugin mock server did not shut down cleanly"
                        );
                        vec![Mismatch::plugin_failure(PLUGIN_TRANSPORT, "plugin results", e)]
                    }
                };
                bridge.release(&plugin).await;
                info!(plugin = %plugin.name(), %transport, port, "plugin transport stopped");
                mismatches
            }
        }
    }
}

/// Convert plugin mock server results into mismatches.
pub(crate) fn results_to_mismatches(results: Vec<MockServerResult>) -> Vec<Mismatch> {
    let mut mismatches = Vec::new();
    for result in results {
        let description = if result.path.is_empty() {
            PLUGIN_TRANSPORT.to_string()
        } else {
            result.path
        };
        if !result.error.is_empty() {
            mismatches.push(Mismatch::plugin_failure(
                description.clone(),
                "request to match",
                result.error,
            ));
        }
        for mismatch in result.mismatches {
            let text = |bytes: Option<Vec<u8>>| {
                bytes.map_or(Value::Null, |b| {
                    Value::String(String::from_utf8_lossy(&b).into_owned())
                })
            };
            let actual = match text(mismatch.actual) {
                Value::Null => Value::String(mismatch.mismatch),
                actual => actual,
            };
            mismatches.push(Mismatch::new(
                description.clone(),
                if mismatch.path.is_empty() {
                    "$".to_string()
                } else {
                    mismatch.path
                },
                text(mismatch.expected),
                actual,
                Some(RuleKind::Plugin),
            ));
        }
    }
    mismatches
}
