//! Matching rules keyed by selector.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Kind of comparison a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleKind {
    /// Literal equality
    Equality,
    /// Actual value rendered as a string must match a regex
    Regex,
    /// Actual value must have the same JSON type as the example
    Type,
    /// Actual string must contain a substring
    #[serde(alias = "includes")]
    Include,
    /// Comparison delegated to a content-matcher plugin
    Plugin,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Equality => "equality",
            Self::Regex => "regex",
            Self::Type => "type",
            Self::Include => "include",
            Self::Plugin => "plugin",
        };
        f.write_str(name)
    }
}

/// A per-field comparison policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchingRule {
    /// Path expression, e.g. `$.body.user.name` or `$.header.Accept`
    pub selector: String,
    /// Comparison kind
    pub kind: RuleKind,
    /// Kind specific data (`regex`, `value`, `contentType`)
    pub parameters: Map<String, Value>,
}

impl MatchingRule {
    /// Create a rule without parameters.
    #[must_use]
    pub fn new(selector: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            selector: selector.into(),
            kind,
            parameters: Map::new(),
        }
    }

    /// Literal equality at `selector`.
    #[must_use]
    pub fn equality(selector: impl Into<String>) -> Self {
        Self::new(selector, RuleKind::Equality)
    }

    /// Same JSON type as the example at `selector`.
    #[must_use]
    pub fn type_of(selector: impl Into<String>) -> Self {
        Self::new(selector, RuleKind::Type)
    }

    /// Regex match at `selector`.
    #[must_use]
    pub fn regex(selector: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::new(selector, RuleKind::Regex).with_parameter("regex", Value::String(pattern.into()))
    }

    /// Substring match at `selector`.
    #[must_use]
    pub fn include(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(selector, RuleKind::Include).with_parameter("value", Value::String(value.into()))
    }

    /// Plugin evaluated comparison for the given content type.
    #[must_use]
    pub fn plugin(selector: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::new(selector, RuleKind::Plugin)
            .with_parameter("contentType", Value::String(content_type.into()))
    }

    /// Attach a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Regex pattern parameter.
    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.parameters.get("regex").and_then(Value::as_str)
    }

    /// Substring parameter of an include rule.
    #[must_use]
    pub fn include_value(&self) -> Option<&str> {
        self.parameters.get("value").and_then(Value::as_str)
    }

    /// Content type parameter of a plugin rule.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.parameters.get("contentType").and_then(Value::as_str)
    }
}

/// Whether `selector` is a well formed path expression.
#[must_use]
pub fn is_valid_selector(selector: &str) -> bool {
    selector == "$"
        || (selector.starts_with("$.") || selector.starts_with("$["))
            && !selector.ends_with('.')
            && !selector.contains("..")
}

/// Rules of one request, response or message part. At most one rule per selector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingRules {
    rules: BTreeMap<String, MatchingRule>,
}

impl MatchingRules {
    /// Empty rule set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule, replacing any rule already registered for its selector.
    ///
    /// The replaced rule is returned and a warning is logged.
    pub fn add(&mut self, rule: MatchingRule) -> Option<MatchingRule> {
        let previous = self.rules.insert(rule.selector.clone(), rule);
        if let Some(previous) = &previous {
            warn!(
                selector = %previous.selector,
                replaced = %previous.kind,
                "matching rule replaced by a later registration"
            );
        }
        previous
    }

    /// Rule registered for `selector`.
    #[must_use]
    pub fn get(&self, selector: &str) -> Option<&MatchingRule> {
        self.rules.get(selector)
    }

    /// Whether any rule is registered at or below `prefix`.
    #[must_use]
    pub fn covers_prefix(&self, prefix: &str) -> bool {
        self.rules.keys().any(|selector| {
            selector == prefix
                || selector
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
        })
    }

    /// Rules in selector order.
    pub fn iter(&self) -> impl Iterator<Item = &MatchingRule> {
        self.rules.values()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether no rules are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Merge `other` into this set, later rules winning.
    pub fn extend(&mut self, other: Self) {
        for rule in other.rules.into_values() {
            self.add(rule);
        }
    }
}

impl FromIterator<MatchingRule> for MatchingRules {
    fn from_iter<I: IntoIterator<Item = MatchingRule>>(iter: I) -> Self {
        let mut rules = Self::new();
        for rule in iter {
            rules.add(rule);
        }
        rules
    }
}

/// Pact file form of one rule: `{"match": "regex", "regex": "\\d+"}`.
#[derive(Serialize, Deserialize)]
struct RuleEntry {
    #[serde(rename = "match")]
    kind: RuleKind,
    #[serde(flatten)]
    parameters: Map<String, Value>,
}

impl Serialize for MatchingRules {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.rules.len()))?;
        for (selector, rule) in &self.rules {
            map.serialize_entry(
                selector,
                &RuleEntry {
                    kind: rule.kind,
                    parameters: rule.parameters.clone(),
                },
            )?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MatchingRules {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let entries = BTreeMap::<String, RuleEntry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|(selector, entry)| MatchingRule {
                selector,
                kind: entry.kind,
                parameters: entry.parameters,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_registration_wins() {
        let mut rules = MatchingRules::new();
        assert!(rules.add(MatchingRule::type_of("$.body.id")).is_none());

        let replaced = rules.add(MatchingRule::regex("$.body.id", "\\d+"));
        assert_eq!(replaced.map(|r| r.kind), Some(RuleKind::Type));
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.get("$.body.id").map(|r| r.kind), Some(RuleKind::Regex));
    }

    #[test]
    fn test_covers_prefix() {
        let rules: MatchingRules = [
            MatchingRule::type_of("$.body.user.name"),
            MatchingRule::equality("$.body.items[0]"),
        ]
        .into_iter()
        .collect();

        assert!(rules.covers_prefix("$.body"));
        assert!(rules.covers_prefix("$.body.user"));
        assert!(rules.covers_prefix("$.body.items"));
        assert!(!rules.covers_prefix("$.body.use"));
        assert!(!rules.covers_prefix("$.header"));
    }

    #[test]
    fn test_selector_validation() {
        assert!(is_valid_selector("$"));
        assert!(is_valid_selector("$.body.a"));
        assert!(is_valid_selector("$.body.items[1]"));
        assert!(!is_valid_selector("body.a"));
        assert!(!is_valid_selector("$.body."));
        assert!(!is_valid_selector("$..a"));
        assert!(!is_valid_selector(""));
    }

    #[test]
    fn test_pact_file_form() {
        let json = r#"{
            "$.body.pass": {"match": "regex", "regex": "\\d+"},
            "$.body.user.name": {"match": "type"}
        }"#;
        let rules: MatchingRules = serde_json::from_str(json).unwrap();
        assert_eq!(rules.get("$.body.pass").and_then(MatchingRule::pattern), Some("\\d+"));
        assert_eq!(rules.get("$.body.user.name").map(|r| r.kind), Some(RuleKind::Type));

        let written = serde_json::to_value(&rules).unwrap();
        assert_eq!(written["$.body.pass"]["match"], "regex");
        assert_eq!(written["$.body.user.name"], serde_json::json!({"match": "type"}));
    }

    #[test]
    fn test_includes_alias() {
        let kind: RuleKind = serde_json::from_str("\"includes\"").unwrap();
        assert_eq!(kind, RuleKind::Include);
    }
}
