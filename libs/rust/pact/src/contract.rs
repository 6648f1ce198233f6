//! Pact contract document and the writer that persists it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::info;

use crate::error::{PactError, Result};
use crate::model::body::child_field;
use crate::model::{
    HttpRequestSpec, HttpResponseSpec, Interaction, InteractionKind, MatchingRules,
    MessageContents, PluginContent, PluginInteraction, ProviderState,
};

/// Pact specification version a contract is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SpecificationVersion {
    /// Pact specification 2
    V2,
    /// Pact specification 3
    V3,
    /// Pact specification 4
    #[default]
    V4,
}

impl SpecificationVersion {
    /// Version string written to `metadata.pactSpecification.version`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::V2 => "2.0.0",
            Self::V3 => "3.0.0",
            Self::V4 => "4.0",
        }
    }
}

impl fmt::Display for SpecificationVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SpecificationVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().trim_start_matches(['v', 'V']);
        match normalized.split('.').next() {
            Some("2") => Ok(Self::V2),
            Some("3") => Ok(Self::V3),
            Some("4") => Ok(Self::V4),
            _ => Err(format!("unsupported pact specification version '{s}'")),
        }
    }
}

/// A participant in a contract (consumer or provider).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    /// Participant name
    pub name: String,
}

impl Participant {
    /// Create a new participant.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Pact specification version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PactSpecification {
    /// Version string
    pub version: String,
}

/// Plugin used to produce a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginRecord {
    /// Plugin name
    pub name: String,
    /// Plugin version
    pub version: String,
}

/// Contract metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ContractMetadata {
    /// Pact specification version
    pub pact_specification: PactSpecification,
    /// Plugins the interactions depend on
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub plugins: Vec<PluginRecord>,
}

impl ContractMetadata {
    /// Metadata for the given specification version.
    #[must_use]
    pub fn new(specification: SpecificationVersion) -> Self {
        Self {
            pact_specification: PactSpecification {
                version: specification.as_str().to_string(),
            },
            plugins: Vec::new(),
        }
    }
}

impl Default for ContractMetadata {
    fn default() -> Self {
        Self::new(SpecificationVersion::default())
    }
}

/// HTTP request/response interaction as written to a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HttpInteraction {
    /// Interaction description
    pub description: String,
    /// Provider states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_states: Vec<ProviderState>,
    /// Expected request
    pub request: HttpRequestSpec,
    /// Expected response
    pub response: HttpResponseSpec,
}

/// Asynchronous message interaction as written to a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageInteraction {
    /// Interaction description
    pub description: String,
    /// Provider states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_states: Vec<ProviderState>,
    /// Native message contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Value>,
    /// Plugin generated message contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pact_content: Option<PluginContent>,
    /// Message metadata
    #[serde(default, alias = "metaData", skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Matching rules for the contents
    #[serde(default, skip_serializing_if = "MatchingRules::is_empty")]
    pub matching_rules: MatchingRules,
}

/// Plugin-defined exchange as written to a contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PluginExchange {
    /// Interaction description
    pub description: String,
    /// Provider states
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_states: Vec<ProviderState>,
    /// Plugin content and configuration
    pub pact_content: PluginInteraction,
}

/// One interaction of a contract document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContractInteraction {
    /// HTTP request/response
    #[serde(rename = "Synchronous/HTTP")]
    Http(HttpInteraction),
    /// Asynchronous message
    #[serde(rename = "Asynchronous/Messages")]
    Message(MessageInteraction),
    /// Plugin-defined exchange
    #[serde(rename = "Synchronous/Messages")]
    Plugin(PluginExchange),
}

impl ContractInteraction {
    /// Interaction description.
    #[must_use]
    pub fn description(&self) -> &str {
        match self {
            Self::Http(i) => &i.description,
            Self::Message(i) => &i.description,
            Self::Plugin(i) => &i.description,
        }
    }
}

impl From<&Interaction> for ContractInteraction {
    fn from(interaction: &Interaction) -> Self {
        let description = interaction.description.clone();
        let provider_states = interaction.provider_states.clone();
        match &interaction.kind {
            InteractionKind::Http { request, response } => Self::Http(HttpInteraction {
                description,
                provider_states,
                request: request.clone(),
                response: response.clone(),
            }),
            InteractionKind::Message(message) => Self::Message(MessageInteraction {
                description,
                provider_states,
                contents: message.contents.clone(),
                pact_content: message.plugin_content.clone(),
                metadata: message.metadata.clone(),
                matching_rules: message.matching_rules.clone(),
            }),
            InteractionKind::Plugin(plugin) => Self::Plugin(PluginExchange {
                description,
                provider_states,
                pact_content: plugin.clone(),
            }),
        }
    }
}

impl From<ContractInteraction> for Interaction {
    fn from(interaction: ContractInteraction) -> Self {
        match interaction {
            ContractInteraction::Http(http) => Self {
                description: http.description,
                provider_states: http.provider_states,
                kind: InteractionKind::Http {
                    request: http.request,
                    response: http.response,
                },
            },
            ContractInteraction::Message(message) => Self {
                description: message.description,
                provider_states: message.provider_states,
                kind: InteractionKind::Message(MessageContents {
                    contents: message.contents,
                    plugin_content: message.pact_content,
                    metadata: message.metadata,
                    matching_rules: message.matching_rules,
                }),
            },
            ContractInteraction::Plugin(plugin) => Self {
                description: plugin.description,
                provider_states: plugin.provider_states,
                kind: InteractionKind::Plugin(plugin.pact_content),
            },
        }
    }
}

/// A Pact contract between consumer and provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contract {
    /// Consumer participant
    pub consumer: Participant,
    /// Provider participant
    pub provider: Participant,
    /// Contract interactions
    #[serde(default)]
    pub interactions: Vec<ContractInteraction>,
    /// Contract metadata
    #[serde(default)]
    pub metadata: ContractMetadata,
}

impl Contract {
    /// Build a contract from registered interactions.
    #[must_use]
    pub fn new(
        consumer: impl Into<String>,
        provider: impl Into<String>,
        interactions: &[Interaction],
        specification: SpecificationVersion,
    ) -> Self {
        Self {
            consumer: Participant::new(consumer),
            provider: Participant::new(provider),
            interactions: interactions.iter().map(ContractInteraction::from).collect(),
            metadata: ContractMetadata::new(specification),
        }
    }

    /// Record a plugin the interactions depend on. Duplicates are ignored.
    #[must_use]
    pub fn with_plugin(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        let record = PluginRecord {
            name: name.into(),
            version: version.into(),
        };
        if !self.metadata.plugins.contains(&record) {
            self.metadata.plugins.push(record);
        }
        self
    }

    /// Parse a contract document.
    ///
    /// Accepts documents written by [`ContractWriter`] as well as older
    /// layouts: untyped interactions, `providerState`/`provider_state`
    /// strings, interaction-level or categorised matching rules, query
    /// strings and multi-valued headers.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::Serialization`] if the document is not valid JSON
    /// or does not describe a contract.
    pub fn from_json(document: &str) -> Result<Self> {
        let mut value: Value = serde_json::from_str(document)?;
        if let Some(interactions) = value.get_mut("interactions").and_then(Value::as_array_mut) {
            for interaction in interactions {
                normalize_interaction(interaction);
            }
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Interactions in document order.
    #[must_use]
    pub fn into_interactions(self) -> Vec<Interaction> {
        self.interactions.into_iter().map(Interaction::from).collect()
    }

    /// Deterministic file name for the consumer/provider pair.
    #[must_use]
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            sanitize_file_component(&self.consumer.name),
            sanitize_file_component(&self.provider.name)
        )
    }
}

fn sanitize_file_component(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Rewrite older interaction layouts into the current one.
fn normalize_interaction(interaction: &mut Value) {
    let Some(fields) = interaction.as_object_mut() else {
        return;
    };

    if !fields.contains_key("type") {
        let kind = if fields.contains_key("request") {
            "Synchronous/HTTP"
        } else if fields.contains_key("pactContent") {
            "Synchronous/Messages"
        } else {
            "Asynchronous/Messages"
        };
        fields.insert("type".to_string(), Value::String(kind.to_string()));
    }

    if !fields.contains_key("providerStates") {
        let legacy = fields
            .remove("providerState")
            .or_else(|| fields.remove("provider_state"));
        if let Some(Value::String(name)) = legacy {
            fields.insert(
                "providerStates".to_string(),
                Value::Array(vec![serde_json::json!({ "name": name })]),
            );
        }
    }

    let interaction_rules = fields.remove("matchingRules").map(flatten_rules);
    let is_http = fields.get("type").and_then(Value::as_str) == Some("Synchronous/HTTP");

    if is_http {
        if let Some(request) = fields.get_mut("request").and_then(Value::as_object_mut) {
            normalize_part(request);
            if let Some(Value::Object(rules)) = interaction_rules {
                let merged = request
                    .entry("matchingRules")
                    .or_insert_with(|| Value::Object(Map::new()));
                if let Some(merged) = merged.as_object_mut() {
                    merged.extend(rules);
                }
            }
        }
        if let Some(response) = fields.get_mut("response").and_then(Value::as_object_mut) {
            normalize_part(response);
        }
    } else if let Some(rules) = interaction_rules {
        fields.insert("matchingRules".to_string(), rules);
    }
}

fn normalize_part(part: &mut Map<String, Value>) {
    if let Some(Value::String(query)) = part.get("query").cloned() {
        part.insert("query".to_string(), parse_query_string(&query));
    }
    if let Some(Value::Object(query)) = part.get_mut("query") {
        for value in query.values_mut() {
            if let Value::String(single) = value {
                *value = Value::Array(vec![Value::String(single.clone())]);
            }
        }
    }
    if let Some(Value::Object(headers)) = part.get_mut("headers") {
        for value in headers.values_mut() {
            if let Value::Array(values) = value {
                let joined: Vec<&str> = values.iter().filter_map(Value::as_str).collect();
                *value = Value::String(joined.join(", "));
            }
        }
    }
    if let Some(rules) = part.remove("matchingRules") {
        part.insert("matchingRules".to_string(), flatten_rules(rules));
    }
}

/// Decode a V2 query string the way inbound requests are decoded.
fn parse_query_string(query: &str) -> Value {
    let mut parsed: Map<String, Value> = Map::new();
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let entry = parsed
            .entry(name.into_owned())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(values) = entry {
            values.push(Value::String(value.into_owned()));
        }
    }
    Value::Object(parsed)
}

/// Convert categorised rules (`{"body": {"$.a": {"matchers": [..]}}}`) into
/// the flat selector form (`{"$.body.a": {..}}`). Flat input is returned as is.
fn flatten_rules(rules: Value) -> Value {
    let Value::Object(categories) = rules else {
        return rules;
    };
    if categories.keys().all(|key| key.starts_with('$')) {
        return Value::Object(categories);
    }

    let mut flat = Map::new();
    for (category, entries) in categories {
        match category.as_str() {
            "body" => {
                if let Value::Object(entries) = entries {
                    for (path, definition) in entries {
                        let selector = format!("$.body{}", path.trim_start_matches('$'));
                        flat.insert(selector, first_matcher(definition));
                    }
                }
            }
            "header" | "headers" | "query" => {
                let root = if category == "query" { "$.query" } else { "$.header" };
                if let Value::Object(entries) = entries {
                    for (name, definition) in entries {
                        flat.insert(child_field(root, &name), first_matcher(definition));
                    }
                }
            }
            other => {
                flat.insert(child_field("$", other), first_matcher(entries));
            }
        }
    }
    Value::Object(flat)
}

fn first_matcher(definition: Value) -> Value {
    match definition {
        Value::Object(mut fields) => match fields.remove("matchers") {
            Some(Value::Array(mut matchers)) if !matchers.is_empty() => matchers.swap_remove(0),
            _ => Value::Object(fields),
        },
        other => other,
    }
}

/// Persists contracts as pretty-printed JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractWriter;

impl ContractWriter {
    /// Write `contract` to `<directory>/<consumer>-<provider>.json`,
    /// creating the directory and replacing an existing file.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::EmptyContract`] if the contract has no
    /// interactions and [`PactError::Io`] if the file cannot be written.
    pub async fn write(&self, contract: &Contract, directory: &Path) -> Result<PathBuf> {
        if contract.interactions.is_empty() {
            return Err(PactError::EmptyContract);
        }

        tokio::fs::create_dir_all(directory).await?;
        let path = directory.join(contract.file_name());
        let mut document = serde_json::to_vec_pretty(contract)?;
        document.push(b'\n');
        tokio::fs::write(&path, document).await?;

        info!(
            path = %path.display(),
            consumer = %contract.consumer.name,
            provider = %contract.provider.name,
            interactions = contract.interactions.len(),
            "pact file written"
        );
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MatchingRule, RuleKind};
    use serde_json::json;

    fn get_foobar() -> Interaction {
        let mut interaction = Interaction::http(
            "get foobar",
            HttpRequestSpec::new("GET", "/foobar"),
            HttpResponseSpec::default(),
        );
        interaction.provider_states.push(ProviderState::new("foo exists"));
        interaction
    }

    #[test]
    fn test_contract_serialization() {
        let contract =
            Contract::new("consumer", "provider", &[get_foobar()], SpecificationVersion::V4)
                .with_plugin("protobuf", "0.3.0")
                .with_plugin("protobuf", "0.3.0");

        let json = serde_json::to_value(&contract).unwrap();
        assert_eq!(json["consumer"]["name"], "consumer");
        assert_eq!(json["interactions"][0]["type"], "Synchronous/HTTP");
        assert_eq!(json["interactions"][0]["providerStates"][0]["name"], "foo exists");
        assert_eq!(json["interactions"][0]["request"]["path"], "/foobar");
        assert_eq!(json["metadata"]["pactSpecification"]["version"], "4.0");
        assert_eq!(json["metadata"]["plugins"].as_array().map(Vec::len), Some(1));

        let restored = Contract::from_json(&json.to_string()).unwrap();
        assert_eq!(contract, restored);
    }

    #[test]
    fn test_specification_version_parse() {
        assert_eq!("V3".parse::<SpecificationVersion>(), Ok(SpecificationVersion::V3));
        assert_eq!("4.0".parse::<SpecificationVersion>(), Ok(SpecificationVersion::V4));
        assert_eq!("2.0.0".parse::<SpecificationVersion>(), Ok(SpecificationVersion::V2));
        assert!("5".parse::<SpecificationVersion>().is_err());
    }

    #[test]
    fn test_legacy_document() {
        let document = r#"{
          "consumer": {"name": "consumer"},
          "provider": {"name": "provider"},
          "interactions": [{
            "description": "Some name for the test",
            "provider_state": "Some state",
            "request": {"method": "GET", "path": "/foobar", "query": "a=1&a=2&b=x",
                        "headers": {"Accept": ["text/plain", "application/json"]}},
            "response": {"status": 200},
            "matchingRules": {"$.body.pass": {"match": "regex", "regex": "\\d+"}}
          }]
        }"#;

        let interactions = Contract::from_json(document).unwrap().into_interactions();
        assert_eq!(interactions.len(), 1);
        assert_eq!(interactions[0].provider_states, vec![ProviderState::new("Some state")]);
        let InteractionKind::Http { request, response } = &interactions[0].kind else {
            panic!("expected an http interaction");
        };
        assert_eq!(request.query["a"], vec!["1".to_string(), "2".to_string()]);
        assert_eq!(request.headers["Accept"], "text/plain, application/json");
        assert_eq!(
            request.matching_rules.get("$.body.pass").map(|r| r.kind),
            Some(RuleKind::Regex)
        );
        assert_eq!(response.status, 200);
    }

    #[test]
    fn test_query_string_is_percent_decoded() {
        let query = parse_query_string("q=a%20b&name=J%C3%BCrgen&tag=x+y&flag");
        assert_eq!(query["q"], json!(["a b"]));
        assert_eq!(query["name"], json!(["Jürgen"]));
        assert_eq!(query["tag"], json!(["x y"]));
        assert_eq!(query["flag"], json!([""]));
    }

    #[test]
    fn test_categorised_rules_are_flattened() {
        let rules = flatten_rules(json!({
            "body": {"$.id": {"matchers": [{"match": "type"}], "combine": "AND"}},
            "header": {"Content-Type": {"matchers": [{"match": "regex", "regex": "json"}]}},
            "path": {"matchers": [{"match": "regex", "regex": "/\\w+"}]}
        }));
        let rules: MatchingRules = serde_json::from_value(rules).unwrap();
        assert_eq!(rules.get("$.body.id").map(|r| r.kind), Some(RuleKind::Type));
        assert_eq!(
            rules.get("$.header.Content-Type").and_then(MatchingRule::pattern),
            Some("json")
        );
        assert!(rules.get("$.path").is_some());
    }

    #[test]
    fn test_legacy_message() {
        let document = r#"{
          "consumer": {"name": "c"}, "provider": {"name": "p"},
          "messages": [],
          "interactions": [{
            "description": "an event",
            "providerStates": [{"name": "ready", "params": {"id": 1}}],
            "contents": {"id": 1},
            "metaData": {"topic": "users"}
          }]
        }"#;
        let interactions = Contract::from_json(document).unwrap().into_interactions();
        let InteractionKind::Message(message) = &interactions[0].kind else {
            panic!("expected a message interaction");
        };
        assert_eq!(message.contents, Some(json!({"id": 1})));
        assert_eq!(message.metadata["topic"], "users");
        assert_eq!(interactions[0].provider_states[0].params["id"], 1);
    }

    #[tokio::test]
    async fn test_writer_rejects_empty_contract() {
        let dir = tempfile::tempdir().unwrap();
        let contract = Contract::new("c", "p", &[], SpecificationVersion::V4);
        let result = ContractWriter.write(&contract, dir.path()).await;
        assert!(matches!(result, Err(PactError::EmptyContract)));
    }

    #[tokio::test]
    async fn test_writer_overwrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("pacts");
        let contract = Contract::new("web app", "api", &[get_foobar()], SpecificationVersion::V3);

        let first = ContractWriter.write(&contract, &target).await.unwrap();
        let second = ContractWriter.write(&contract, &target).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.file_name().and_then(|n| n.to_str()), Some("web_app-api.json"));

        let written = std::fs::read_to_string(&first).unwrap();
        let restored = Contract::from_json(&written).unwrap();
        assert_eq!(restored.metadata.pact_specification.version, "3.0.0");
        assert_eq!(restored.interactions.len(), 1);
    }
}
