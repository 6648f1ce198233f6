//! Interactions: the unit of a contract.

use std::collections::BTreeMap;
use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::matching::{MatchingRules, is_valid_selector};
use crate::error::{PactError, Result};

/// Default content type for native bodies.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A named precondition the provider must be in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderState {
    /// State name
    pub name: String,
    /// State parameters
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: Map<String, Value>,
}

impl ProviderState {
    /// State without parameters.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Map::new(),
        }
    }
}

/// Opaque bytes produced by a plugin in place of a native body.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginContent {
    /// Declared content type, e.g. `application/protobuf`
    pub content_type: String,
    /// Raw bytes, base64 in pact files
    #[serde(with = "base64_bytes")]
    pub content: Vec<u8>,
}

impl PluginContent {
    /// Wrap plugin generated bytes.
    #[must_use]
    pub fn new(content_type: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            content,
        }
    }
}

impl fmt::Debug for PluginContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContent")
            .field("content_type", &self.content_type)
            .field("len", &self.content.len())
            .finish()
    }
}

mod base64_bytes {
    use super::BASE64;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Expected HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequestSpec {
    /// HTTP method, upper case
    pub method: String,
    /// Request path
    pub path: String,
    /// Query parameters
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub query: BTreeMap<String, Vec<String>>,
    /// Request headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Native body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Plugin generated body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_content: Option<PluginContent>,
    /// Rules scoped to this request
    #[serde(default, skip_serializing_if = "MatchingRules::is_empty")]
    pub matching_rules: MatchingRules,
}

impl HttpRequestSpec {
    /// Request with method and path only.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into().to_ascii_uppercase(),
            path: path.into(),
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            plugin_content: None,
            matching_rules: MatchingRules::new(),
        }
    }
}

/// Expected HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponseSpec {
    /// Status code
    pub status: u16,
    /// Response headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Native body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Plugin generated body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_content: Option<PluginContent>,
    /// Rules scoped to this response
    #[serde(default, skip_serializing_if = "MatchingRules::is_empty")]
    pub matching_rules: MatchingRules,
}

impl Default for HttpResponseSpec {
    fn default() -> Self {
        Self {
            status: 200,
            headers: BTreeMap::new(),
            body: None,
            plugin_content: None,
            matching_rules: MatchingRules::new(),
        }
    }
}

/// Message contents, or one side of a plugin-defined exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContents {
    /// Native contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<Value>,
    /// Plugin generated contents
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin_content: Option<PluginContent>,
    /// Message metadata
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Rules scoped to these contents
    #[serde(default, skip_serializing_if = "MatchingRules::is_empty")]
    pub matching_rules: MatchingRules,
}

impl MessageContents {
    /// Whether neither native nor plugin contents are present.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.contents.is_none() && self.plugin_content.is_none()
    }
}

/// Exchange whose contents and transport are defined by a plugin (e.g. gRPC).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInteraction {
    /// Content type handled by the plugin
    pub content_type: String,
    /// Plugin-level service/method key, e.g. `PactPlugin/InitPlugin`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    /// Request side
    #[serde(default)]
    pub request: MessageContents,
    /// Response side
    #[serde(default)]
    pub response: MessageContents,
    /// Opaque configuration the plugin attached to the interaction
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub plugin_configuration: Map<String, Value>,
}

/// Discriminant of [`InteractionKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpecKind {
    /// Request/response over HTTP
    Http,
    /// Asynchronous message
    Message,
    /// Plugin-defined exchange
    Plugin,
}

/// Side of an interaction that content can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionPart {
    /// Request (or the message itself)
    Request,
    /// Response
    Response,
}

impl fmt::Display for InteractionPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request => f.write_str("request"),
            Self::Response => f.write_str("response"),
        }
    }
}

/// Interaction payload, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InteractionKind {
    /// HTTP request/response pair
    Http {
        /// Expected request
        request: HttpRequestSpec,
        /// Response to replay
        response: HttpResponseSpec,
    },
    /// Asynchronous message
    Message(MessageContents),
    /// Plugin-defined exchange
    Plugin(PluginInteraction),
}

/// Reply a mock server sends for a matched interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Status code
    pub status: u16,
    /// Headers other than `content-type`
    pub headers: Vec<(String, String)>,
    /// Body content type
    pub content_type: Option<String>,
    /// Encoded body
    pub body: Vec<u8>,
}

/// One declared unit of expected exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interaction {
    /// Human readable key
    pub description: String,
    /// Preconditions, in declaration order
    pub provider_states: Vec<ProviderState>,
    /// Payload
    pub kind: InteractionKind,
}

impl Interaction {
    /// HTTP interaction.
    #[must_use]
    pub fn http(
        description: impl Into<String>,
        request: HttpRequestSpec,
        response: HttpResponseSpec,
    ) -> Self {
        Self {
            description: description.into(),
            provider_states: Vec::new(),
            kind: InteractionKind::Http { request, response },
        }
    }

    /// Message interaction.
    #[must_use]
    pub fn message(description: impl Into<String>, contents: MessageContents) -> Self {
        Self {
            description: description.into(),
            provider_states: Vec::new(),
            kind: InteractionKind::Message(contents),
        }
    }

    /// Plugin-defined interaction.
    #[must_use]
    pub fn plugin(description: impl Into<String>, interaction: PluginInteraction) -> Self {
        Self {
            description: description.into(),
            provider_states: Vec::new(),
            kind: InteractionKind::Plugin(interaction),
        }
    }

    /// Kind discriminant.
    #[must_use]
    pub const fn spec_kind(&self) -> SpecKind {
        match self.kind {
            InteractionKind::Http { .. } => SpecKind::Http,
            InteractionKind::Message(_) => SpecKind::Message,
            InteractionKind::Plugin(_) => SpecKind::Plugin,
        }
    }

    /// Names of the provider states.
    pub fn state_names(&self) -> impl Iterator<Item = &str> {
        self.provider_states.iter().map(|s| s.name.as_str())
    }

    /// Rule sets per part.
    #[must_use]
    pub fn matching_rules(&self) -> Vec<(InteractionPart, &MatchingRules)> {
        match &self.kind {
            InteractionKind::Http { request, response } => vec![
                (InteractionPart::Request, &request.matching_rules),
                (InteractionPart::Response, &response.matching_rules),
            ],
            InteractionKind::Message(contents) => {
                vec![(InteractionPart::Request, &contents.matching_rules)]
            }
            InteractionKind::Plugin(plugin) => vec![
                (InteractionPart::Request, &plugin.request.matching_rules),
                (InteractionPart::Response, &plugin.response.matching_rules),
            ],
        }
    }

    /// Reply a mock server sends when this interaction is matched.
    #[must_use]
    pub fn synthesize_reply(&self) -> Reply {
        match &self.kind {
            InteractionKind::Http { response, .. } => {
                let explicit_type = response
                    .headers
                    .iter()
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
                    .map(|(_, value)| value.clone());
                let headers = response
                    .headers
                    .iter()
                    .filter(|(name, _)| !name.eq_ignore_ascii_case("content-type"))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                let (content_type, body) = encode_body(
                    response.body.as_ref(),
                    response.plugin_content.as_ref(),
                    explicit_type,
                );
                Reply {
                    status: response.status,
                    headers,
                    content_type,
                    body,
                }
            }
            InteractionKind::Message(contents) => {
                let (content_type, body) =
                    encode_body(contents.contents.as_ref(), contents.plugin_content.as_ref(), None);
                Reply {
                    status: 200,
                    headers: Vec::new(),
                    content_type,
                    body,
                }
            }
            InteractionKind::Plugin(plugin) => {
                let (content_type, body) = encode_body(
                    plugin.response.contents.as_ref(),
                    plugin.response.plugin_content.as_ref(),
                    Some(plugin.content_type.clone()),
                );
                Reply {
                    status: 200,
                    headers: Vec::new(),
                    content_type,
                    body,
                }
            }
        }
    }

    /// Build-time validation.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::InvalidInteraction`] when the description is empty,
    /// a part carries both a native body and plugin content, a selector is
    /// malformed, or the interaction has no content at all.
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(PactError::invalid("description must not be empty"));
        }
        if self.provider_states.iter().any(|s| s.name.trim().is_empty()) {
            return Err(PactError::invalid(format!(
                "'{}': provider state names must not be empty",
                self.description
            )));
        }

        match &self.kind {
            InteractionKind::Http { request, response } => {
                if request.method.is_empty() || !request.path.starts_with('/') {
                    return Err(PactError::invalid(format!(
                        "'{}': request needs a method and an absolute path",
                        self.description
                    )));
                }
                if !(100..=599).contains(&response.status) {
                    return Err(PactError::invalid(format!(
                        "'{}': status {} is not a valid HTTP status",
                        self.description, response.status
                    )));
                }
                check_exclusive(
                    &self.description,
                    "request",
                    request.body.as_ref(),
                    request.plugin_content.as_ref(),
                )?;
                check_exclusive(
                    &self.description,
                    "response",
                    response.body.as_ref(),
                    response.plugin_content.as_ref(),
                )?;
            }
            InteractionKind::Message(contents) => {
                check_exclusive(
                    &self.description,
                    "message",
                    contents.contents.as_ref(),
                    contents.plugin_content.as_ref(),
                )?;
                if contents.is_empty() {
                    return Err(PactError::invalid(format!(
                        "'{}': message has no contents",
                        self.description
                    )));
                }
            }
            InteractionKind::Plugin(plugin) => {
                check_exclusive(
                    &self.description,
                    "request",
                    plugin.request.contents.as_ref(),
                    plugin.request.plugin_content.as_ref(),
                )?;
                check_exclusive(
                    &self.description,
                    "response",
                    plugin.response.contents.as_ref(),
                    plugin.response.plugin_content.as_ref(),
                )?;
                if plugin.request.is_empty() && plugin.response.is_empty() {
                    return Err(PactError::invalid(format!(
                        "'{}': plugin interaction has no request or response contents",
                        self.description
                    )));
                }
            }
        }

        for (part, rules) in self.matching_rules() {
            if let Some(rule) = rules.iter().find(|r| !is_valid_selector(&r.selector)) {
                return Err(PactError::invalid(format!(
                    "'{}': invalid {part} selector '{}'",
                    self.description, rule.selector
                )));
            }
        }
        Ok(())
    }
}

fn check_exclusive(
    description: &str,
    side: &str,
    body: Option<&Value>,
    plugin: Option<&PluginContent>,
) -> Result<()> {
    if body.is_some() && plugin.is_some() {
        return Err(PactError::invalid(format!(
            "'{description}': {side} has both a native body and plugin content"
        )));
    }
    Ok(())
}

/// Encode a body for the wire. Strings sent with a non-JSON content type go out raw.
fn encode_body(
    body: Option<&Value>,
    plugin: Option<&PluginContent>,
    explicit_type: Option<String>,
) -> (Option<String>, Vec<u8>) {
    if let Some(plugin) = plugin {
        return (Some(plugin.content_type.clone()), plugin.content.clone());
    }
    match body {
        None => (explicit_type, Vec::new()),
        Some(Value::String(text))
            if explicit_type.as_deref().is_some_and(|ct| !ct.contains("json")) =>
        {
            (explicit_type, text.clone().into_bytes())
        }
        Some(value) => (
            explicit_type.or_else(|| Some(JSON_CONTENT_TYPE.to_string())),
            value.to_string().into_bytes(),
        ),
    }
}
