//! Recorded discrepancies between expected and actual traffic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::matching::RuleKind;

/// Description used for requests that matched no interaction.
pub const UNEXPECTED_REQUEST: &str = "unexpected request";

/// A discrepancy at one selector. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mismatch {
    /// Interaction the mismatch belongs to
    pub interaction_description: String,
    /// Where the values diverged
    pub selector: String,
    /// Declared value
    pub expected: Value,
    /// Observed value
    pub actual: Value,
    /// Rule that produced the mismatch, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_kind: Option<RuleKind>,
}

impl Mismatch {
    /// Mismatch produced by a rule evaluation.
    #[must_use]
    pub fn new(
        interaction_description: impl Into<String>,
        selector: impl Into<String>,
        expected: Value,
        actual: Value,
        rule_kind: Option<RuleKind>,
    ) -> Self {
        Self {
            interaction_description: interaction_description.into(),
            selector: selector.into(),
            expected,
            actual,
            rule_kind,
        }
    }

    /// Request that no registered interaction accepts.
    #[must_use]
    pub fn unexpected_request(method: &str, path: &str) -> Self {
        Self::new(
            UNEXPECTED_REQUEST,
            "$",
            Value::String("no matching interaction".to_string()),
            Value::String(format!("{method} {path}")),
            None,
        )
    }

    /// Interaction that never received a request.
    #[must_use]
    pub fn missing_request(interaction_description: impl Into<String>) -> Self {
        Self::new(
            interaction_description,
            "$",
            Value::String("request to be received".to_string()),
            Value::String("no request received".to_string()),
            None,
        )
    }

    /// Plugin call that failed while verifying an interaction.
    #[must_use]
    pub fn plugin_failure(
        interaction_description: impl Into<String>,
        expected: &str,
        reason: impl ToString,
    ) -> Self {
        Self::new(
            interaction_description,
            "$",
            Value::String(expected.to_string()),
            Value::String(reason.to_string()),
            Some(RuleKind::Plugin),
        )
    }
}
