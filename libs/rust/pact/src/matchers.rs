//! Rule evaluation and request comparison.
//!
//! [`MatchRuleEngine`] is the seam for the low-level comparison of one
//! expected value against one actual value. [`RuleMatcher`] is the built-in
//! engine covering equality, regex, type and include rules. Plugin rules are
//! never evaluated here; sessions route them to the plugin bridge.

use std::collections::{BTreeMap, HashSet};

use regex::Regex;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{PactError, Result};
use crate::model::body::{
    PathSegment, child_field, child_index, format_selector, parse_selector, resolve,
};
use crate::model::{HttpRequestSpec, MatchingRule, MatchingRules, Mismatch, RuleKind};

/// Key marking an inline matcher object inside a JSON body.
pub const INLINE_MATCHER_KEY: &str = "pact:matcher:type";

/// Compares one expected value against one actual value under a rule.
pub trait MatchRuleEngine: Send + Sync {
    /// Returns a description of the mismatch, or `None` when the values match.
    fn evaluate(
        &self,
        expected: Option<&Value>,
        actual: Option<&Value>,
        rule: &MatchingRule,
    ) -> Option<String>;
}

/// Built-in rule engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleMatcher;

impl MatchRuleEngine for RuleMatcher {
    fn evaluate(
        &self,
        expected: Option<&Value>,
        actual: Option<&Value>,
        rule: &MatchingRule,
    ) -> Option<String> {
        let Some(actual) = actual else {
            return Some(format!(
                "Expected {} but it was missing",
                expected.map_or_else(|| "a value".to_string(), Value::to_string)
            ));
        };

        match rule.kind {
            RuleKind::Equality => match expected {
                Some(expected) if expected != actual => {
                    Some(format!("Expected {expected} but received {actual}"))
                }
                _ => None,
            },
            RuleKind::Type => expected.and_then(|expected| {
                (json_type(expected) != json_type(actual)).then(|| {
                    format!(
                        "Expected {} ({}) to be the same type as {}",
                        actual,
                        json_type(actual),
                        expected
                    )
                })
            }),
            RuleKind::Regex => {
                let Some(pattern) = rule.pattern() else {
                    return Some(format!("Regex rule at {} has no pattern", rule.selector));
                };
                let regex = match Regex::new(&format!("^(?:{pattern})$")) {
                    Ok(regex) => regex,
                    Err(e) => return Some(format!("Invalid regex '{pattern}': {e}")),
                };
                each_scalar(actual).into_iter().find_map(|value| {
                    (!regex.is_match(&value))
                        .then(|| format!("Expected '{value}' to match '{pattern}'"))
                })
            }
            RuleKind::Include => {
                let needle = rule
                    .include_value()
                    .map(ToString::to_string)
                    .or_else(|| expected.and_then(Value::as_str).map(ToString::to_string))
                    .unwrap_or_default();
                each_scalar(actual).into_iter().find_map(|value| {
                    (!value.contains(&needle))
                        .then(|| format!("Expected '{value}' to include '{needle}'"))
                })
            }
            RuleKind::Plugin => Some(format!(
                "Plugin rule at {} requires a content matcher plugin",
                rule.selector
            )),
        }
    }
}

const fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// String renderings a regex or include rule is applied to.
fn each_scalar(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) => vec![s.clone()],
        Value::Array(items) => items.iter().flat_map(each_scalar).collect(),
        other => vec![other.to_string()],
    }
}

/// Canonical form of a selector: `$.headers.X` and `$.header.X` both become
/// `$.header.x`.
#[must_use]
pub fn normalize_selector(selector: &str) -> String {
    let Some(mut segments) = parse_selector(selector) else {
        return selector.to_string();
    };
    if let [PathSegment::Field(section), PathSegment::Field(name), ..] = segments.as_mut_slice() {
        if section == "headers" || section == "header" {
            *section = "header".to_string();
            *name = name.to_ascii_lowercase();
        }
    }
    format_selector(&segments)
}

/// JSON view of an expected request, shaped like the view of a recorded one.
#[must_use]
pub fn expected_request_view(spec: &HttpRequestSpec) -> Value {
    let header: Map<String, Value> = spec
        .headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), Value::String(value.clone())))
        .collect();
    json!({
        "method": spec.method.to_ascii_uppercase(),
        "path": spec.path,
        "query": spec.query,
        "header": header,
        "body": spec.body,
    })
}

/// Compare a recorded request view against its expected spec.
///
/// Method, path, declared headers and declared query parameters default to
/// equality; body values are compared structurally with extra object keys
/// allowed. A rule at a selector replaces the default comparison for that
/// selector and everything below it. Plugin rules are skipped.
#[must_use]
pub fn compare_request(
    engine: &dyn MatchRuleEngine,
    description: &str,
    expected: &HttpRequestSpec,
    actual: &Value,
) -> Vec<Mismatch> {
    let rules: BTreeMap<String, &MatchingRule> = expected
        .matching_rules
        .iter()
        .filter(|rule| rule.kind != RuleKind::Plugin)
        .map(|rule| (normalize_selector(&rule.selector), rule))
        .collect();
    let expected_view = expected_request_view(expected);

    let mut comparison = Comparison {
        engine,
        description,
        rules: &rules,
        visited: HashSet::new(),
        mismatches: Vec::new(),
    };

    for section in ["method", "path", "query", "header"] {
        if expected_view[section].as_object().is_some_and(Map::is_empty) {
            continue;
        }
        comparison.compare_tree(
            &child_field("$", section),
            &expected_view[section],
            actual.get(section),
        );
    }
    if let Some(body) = &expected.body {
        comparison.compare_tree("$.body", body, actual.get("body"));
    }

    for (selector, rule) in &rules {
        if comparison.visited.contains(selector) {
            continue;
        }
        let Some(segments) = parse_selector(selector) else {
            continue;
        };
        comparison.apply(
            selector,
            rule,
            resolve(&expected_view, &segments),
            resolve(actual, &segments),
        );
    }

    debug!(
        description,
        mismatches = comparison.mismatches.len(),
        "request compared"
    );
    comparison.mismatches
}

struct Comparison<'a> {
    engine: &'a dyn MatchRuleEngine,
    description: &'a str,
    rules: &'a BTreeMap<String, &'a MatchingRule>,
    visited: HashSet<String>,
    mismatches: Vec<Mismatch>,
}

impl Comparison<'_> {
    fn apply(
        &mut self,
        selector: &str,
        rule: &MatchingRule,
        expected: Option<&Value>,
        actual: Option<&Value>,
    ) {
        self.visited.insert(selector.to_string());
        if let Some(reason) = self.engine.evaluate(expected, actual, rule) {
            debug!(selector, %reason, "rule mismatch");
            self.mismatches.push(Mismatch::new(
                self.description,
                selector,
                expected.cloned().unwrap_or(Value::Null),
                actual.cloned().unwrap_or(Value::Null),
                Some(rule.kind),
            ));
        }
    }

    fn record(&mut self, selector: &str, expected: &Value, actual: Option<&Value>) {
        self.mismatches.push(Mismatch::new(
            self.description,
            selector,
            expected.clone(),
            actual.cloned().unwrap_or(Value::Null),
            None,
        ));
    }

    fn compare_tree(&mut self, selector: &str, expected: &Value, actual: Option<&Value>) {
        if let Some(rule) = self.rules.get(selector).copied() {
            self.apply(selector, rule, Some(expected), actual);
            return;
        }

        match (expected, actual) {
            (_, None) => self.record(selector, expected, None),
            (Value::Object(fields), Some(Value::Object(actual_fields))) => {
                for (name, value) in fields {
                    self.compare_tree(&child_field(selector, name), value, actual_fields.get(name));
                }
            }
            (Value::Array(items), Some(Value::Array(actual_items))) => {
                if items.len() != actual_items.len() {
                    self.record(selector, expected, actual);
                    return;
                }
                for (index, (item, actual_item)) in items.iter().zip(actual_items).enumerate() {
                    self.compare_tree(&child_index(selector, index), item, Some(actual_item));
                }
            }
            (Value::String(expected_text), Some(Value::String(actual_text)))
                if selector == "$.method" =>
            {
                if !expected_text.eq_ignore_ascii_case(actual_text) {
                    self.record(selector, expected, actual);
                }
            }
            (_, Some(actual_value)) => {
                if expected != actual_value {
                    self.record(selector, expected, actual);
                }
            }
        }
    }
}

/// Replace inline matcher objects in `body` with their example values,
/// registering a rule for each at its selector below `root`.
///
/// # Errors
///
/// Returns [`PactError::InvalidInteraction`] for an unknown matcher type or a
/// regex matcher without a pattern.
pub fn extract_inline_matchers(
    body: Value,
    root: &str,
    rules: &mut MatchingRules,
) -> Result<Value> {
    match body {
        Value::Object(mut fields) => {
            let Some(kind) = fields.remove(INLINE_MATCHER_KEY) else {
                let mut extracted = Map::with_capacity(fields.len());
                for (name, value) in fields {
                    let selector = child_field(root, &name);
                    extracted.insert(name, extract_inline_matchers(value, &selector, rules)?);
                }
                return Ok(Value::Object(extracted));
            };

            let example = fields.remove("value").unwrap_or(Value::Null);
            let rule = match kind.as_str() {
                Some("type") => MatchingRule::type_of(root),
                Some("equality") => MatchingRule::equality(root),
                Some("regex") => {
                    let pattern = fields.get("regex").and_then(Value::as_str).ok_or_else(|| {
                        PactError::invalid(format!("regex matcher at {root} has no pattern"))
                    })?;
                    MatchingRule::regex(root, pattern)
                }
                Some("include" | "includes") => {
                    let needle = example.as_str().unwrap_or_default();
                    MatchingRule::include(root, needle)
                }
                _ => {
                    return Err(PactError::invalid(format!(
                        "unsupported matcher type {kind} at {root}"
                    )));
                }
            };
            rules.add(rule);
            extract_inline_matchers(example, root, rules)
        }
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| extract_inline_matchers(item, &child_index(root, index), rules))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_view(method: &str, path: &str, body: Value) -> Value {
        json!({
            "method": method,
            "path": path,
            "query": {},
            "header": {"content-type": "application/json"},
            "body": body,
        })
    }

    #[test]
    fn test_equality_rule() {
        let rule = MatchingRule::equality("$.body.a");
        assert!(RuleMatcher.evaluate(Some(&json!(1)), Some(&json!(1)), &rule).is_none());
        assert!(RuleMatcher.evaluate(Some(&json!(1)), Some(&json!(2)), &rule).is_some());
        assert!(RuleMatcher.evaluate(Some(&json!(1)), None, &rule).is_some());
    }

    #[test]
    fn test_type_rule() {
        let rule = MatchingRule::type_of("$.body.name");
        assert!(RuleMatcher.evaluate(Some(&json!("a")), Some(&json!("b")), &rule).is_none());
        assert!(RuleMatcher.evaluate(Some(&json!("a")), Some(&json!(5)), &rule).is_some());
    }

    #[test]
    fn test_regex_rule_is_anchored() {
        let rule = MatchingRule::regex("$.body.pass", "\\d+");
        assert!(RuleMatcher.evaluate(None, Some(&json!("1234")), &rule).is_none());
        assert!(RuleMatcher.evaluate(None, Some(&json!(1234)), &rule).is_none());
        assert!(RuleMatcher.evaluate(None, Some(&json!("12a4")), &rule).is_some());
    }

    #[test]
    fn test_include_rule() {
        let rule = MatchingRule::include("$.body.msg", "world");
        assert!(RuleMatcher.evaluate(None, Some(&json!("hello world")), &rule).is_none());
        assert!(RuleMatcher.evaluate(None, Some(&json!("hello")), &rule).is_some());
    }

    #[test]
    fn test_normalize_header_selector() {
        assert_eq!(normalize_selector("$.headers.Content-Type"), "$.header.content-type");
        assert_eq!(normalize_selector("$.header['X Trace']"), "$.header['x trace']");
        assert_eq!(normalize_selector("$.body.Name"), "$.body.Name");
    }

    #[test]
    fn test_matching_request_has_no_mismatches() {
        let mut spec = HttpRequestSpec::new("POST", "/users");
        spec.body = Some(json!({"name": "x", "tags": ["a"]}));
        let actual = request_view(
            "POST",
            "/users",
            json!({"name": "x", "tags": ["a"], "extra": 1}),
        );

        assert!(compare_request(&RuleMatcher, "create user", &spec, &actual).is_empty());
    }

    #[test]
    fn test_body_difference_is_reported_at_leaf() {
        let mut spec = HttpRequestSpec::new("POST", "/users");
        spec.body = Some(json!({"user": {"name": "x"}}));
        let actual = request_view("POST", "/users", json!({"user": {"name": "y"}}));

        let mismatches = compare_request(&RuleMatcher, "create user", &spec, &actual);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].selector, "$.body.user.name");
        assert_eq!(mismatches[0].expected, json!("x"));
        assert_eq!(mismatches[0].actual, json!("y"));
    }

    #[test]
    fn test_rule_replaces_default_comparison() {
        let mut spec = HttpRequestSpec::new("POST", "/login");
        spec.body = Some(json!({"user": "alice", "pass": "1234"}));
        spec.matching_rules.add(MatchingRule::type_of("$.body.user"));
        spec.matching_rules.add(MatchingRule::regex("$.body.pass", "\\d+"));
        let actual = request_view("POST", "/login", json!({"user": "bob", "pass": "99"}));

        assert!(compare_request(&RuleMatcher, "login", &spec, &actual).is_empty());

        let bad = request_view("POST", "/login", json!({"user": "bob", "pass": "abc"}));
        let mismatches = compare_request(&RuleMatcher, "login", &spec, &bad);
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].rule_kind, Some(RuleKind::Regex));
    }

    #[test]
    fn test_header_rule_uses_either_prefix() {
        let mut spec = HttpRequestSpec::new("GET", "/");
        spec.headers.insert("X-Request-Id".to_string(), "abc".to_string());
        spec.matching_rules.add(MatchingRule::regex("$.headers.X-Request-Id", "[a-z0-9]+"));
        let mut actual = request_view("GET", "/", Value::Null);
        actual["header"]["x-request-id"] = json!("zz9");

        assert!(compare_request(&RuleMatcher, "root", &spec, &actual).is_empty());
    }

    #[test]
    fn test_missing_header_and_query() {
        let mut spec = HttpRequestSpec::new("GET", "/search");
        spec.headers.insert("Accept".to_string(), "text/plain".to_string());
        spec.query.insert("q".to_string(), vec!["rust".to_string()]);
        let actual = request_view("GET", "/search", Value::Null);

        let selectors: Vec<_> = compare_request(&RuleMatcher, "search", &spec, &actual)
            .into_iter()
            .map(|m| m.selector)
            .collect();
        assert_eq!(selectors, vec!["$.query.q", "$.header.accept"]);
    }

    #[test]
    fn test_method_is_case_insensitive() {
        let spec = HttpRequestSpec::new("get", "/");
        let actual = request_view("GET", "/", Value::Null);
        assert!(compare_request(&RuleMatcher, "root", &spec, &actual).is_empty());
    }

    #[test]
    fn test_extract_inline_matchers() {
        let body = json!({
            "name": {"pact:matcher:type": "type", "value": "billy"},
            "pass": {"pact:matcher:type": "regex", "regex": "\\d+", "value": "1234"},
            "items": [{"id": {"pact:matcher:type": "equality", "value": 7}}],
            "plain": true
        });
        let mut rules = MatchingRules::new();
        let example = extract_inline_matchers(body, "$.body", &mut rules).unwrap();

        assert_eq!(
            example,
            json!({"name": "billy", "pass": "1234", "items": [{"id": 7}], "plain": true})
        );
        assert_eq!(rules.len(), 3);
        assert_eq!(rules.get("$.body.name").map(|r| r.kind), Some(RuleKind::Type));
        assert_eq!(rules.get("$.body.pass").and_then(MatchingRule::pattern), Some("\\d+"));
        assert!(rules.get("$.body.items[0].id").is_some());
    }

    #[test]
    fn test_extract_rejects_unknown_matcher() {
        let body = json!({"pact:matcher:type": "eachLikeSomething", "value": 1});
        let mut rules = MatchingRules::new();
        assert!(matches!(
            extract_inline_matchers(body, "$.body", &mut rules),
            Err(PactError::InvalidInteraction { .. })
        ));
    }
}
