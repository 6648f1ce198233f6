//! Interaction registry and builder.
//!
//! The registry owns the declared interactions of one consumer/provider
//! pair. It performs no I/O; plugin generated content is produced by the
//! [`PluginBridge`](crate::plugin::PluginBridge) and attached here.

use std::fmt;

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::contract::Contract;
use crate::error::{PactError, Result};
use crate::matchers::extract_inline_matchers;
use crate::model::{
    HttpRequestSpec, HttpResponseSpec, Interaction, InteractionKind, InteractionPart,
    MatchingRule, MatchingRules, MessageContents, PluginContent, PluginInteraction,
    ProviderState, SpecKind,
};

/// Handle to an interaction inside one registry.
///
/// References are invalidated by [`InteractionRegistry::clear`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InteractionRef {
    registry: Uuid,
    generation: u64,
    index: usize,
}

impl InteractionRef {
    /// Position of the interaction in insertion order.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Display for InteractionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}@{}", self.registry, self.index, self.generation)
    }
}

/// Declared interactions of a consumer/provider pair, in insertion order.
#[derive(Debug, Clone)]
pub struct InteractionRegistry {
    id: Uuid,
    generation: u64,
    consumer: String,
    provider: String,
    interactions: Vec<Interaction>,
}

impl InteractionRegistry {
    /// Empty registry for a consumer/provider pair.
    #[must_use]
    pub fn new(consumer: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            consumer: consumer.into(),
            provider: provider.into(),
            interactions: Vec::new(),
        }
    }

    /// Load every interaction of a pact document.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::Serialization`] for malformed documents and
    /// [`PactError::InvalidInteraction`] if an interaction fails validation.
    pub fn from_pact_json(document: &str) -> Result<Self> {
        let contract = Contract::from_json(document)?;
        let mut registry =
            Self::new(contract.consumer.name.clone(), contract.provider.name.clone());
        for interaction in contract.into_interactions() {
            registry.add_interaction(interaction)?;
        }
        Ok(registry)
    }

    /// Consumer name.
    #[must_use]
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Provider name.
    #[must_use]
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Validate and append an interaction.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::InvalidInteraction`] if the interaction fails
    /// [`Interaction::validate`] or a message interaction reuses a
    /// description.
    pub fn add_interaction(&mut self, interaction: Interaction) -> Result<InteractionRef> {
        interaction.validate()?;

        if interaction.spec_kind() == SpecKind::Message
            && self.interactions.iter().any(|existing| {
                existing.spec_kind() == SpecKind::Message
                    && existing.description == interaction.description
            })
        {
            return Err(PactError::invalid(format!(
                "message description '{}' is already registered",
                interaction.description
            )));
        }

        debug!(
            description = %interaction.description,
            kind = ?interaction.spec_kind(),
            "interaction registered"
        );
        self.interactions.push(interaction);
        Ok(InteractionRef {
            registry: self.id,
            generation: self.generation,
            index: self.interactions.len() - 1,
        })
    }

    /// Build and register an interaction.
    ///
    /// # Errors
    ///
    /// Propagates builder and validation failures.
    pub fn add(&mut self, builder: InteractionBuilder) -> Result<InteractionRef> {
        self.add_interaction(builder.build()?)
    }

    /// Attach plugin generated bytes to the request or response of an
    /// existing interaction. For message interactions the request part is the
    /// message itself.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::UnknownInteraction`] for a stale reference and
    /// [`PactError::InvalidInteraction`] if the part already has a native
    /// body or does not exist for the interaction kind.
    pub fn attach_plugin_content(
        &mut self,
        reference: InteractionRef,
        part: InteractionPart,
        content_type: impl Into<String>,
        raw_bytes: Vec<u8>,
    ) -> Result<()> {
        let interaction = self.get_mut(reference)?;
        let description = interaction.description.clone();
        let content = PluginContent::new(content_type, raw_bytes);

        let (native_present, slot) = match (&mut interaction.kind, part) {
            (InteractionKind::Http { request, .. }, InteractionPart::Request) => {
                (request.body.is_some(), &mut request.plugin_content)
            }
            (InteractionKind::Http { response, .. }, InteractionPart::Response) => {
                (response.body.is_some(), &mut response.plugin_content)
            }
            (InteractionKind::Message(message), InteractionPart::Request) => {
                (message.contents.is_some(), &mut message.plugin_content)
            }
            (InteractionKind::Message(_), InteractionPart::Response) => {
                return Err(PactError::invalid(format!(
                    "'{description}': messages have no response part"
                )));
            }
            (InteractionKind::Plugin(plugin), InteractionPart::Request) => {
                (plugin.request.contents.is_some(), &mut plugin.request.plugin_content)
            }
            (InteractionKind::Plugin(plugin), InteractionPart::Response) => {
                (plugin.response.contents.is_some(), &mut plugin.response.plugin_content)
            }
        };
        if native_present {
            return Err(PactError::invalid(format!(
                "'{description}': {part} already has a native body"
            )));
        }
        *slot = Some(content);
        debug!(description = %description, %part, "plugin content attached");
        Ok(())
    }

    /// Interaction behind `reference`.
    ///
    /// # Errors
    ///
    /// Returns [`PactError::UnknownInteraction`] for a stale reference.
    pub fn get(&self, reference: InteractionRef) -> Result<&Interaction> {
        self.check(reference)?;
        Ok(&self.interactions[reference.index])
    }

    fn get_mut(&mut self, reference: InteractionRef) -> Result<&mut Interaction> {
        self.check(reference)?;
        Ok(&mut self.interactions[reference.index])
    }

    fn check(&self, reference: InteractionRef) -> Result<()> {
        if reference.registry != self.id
            || reference.generation != self.generation
            || reference.index >= self.interactions.len()
        {
            return Err(PactError::UnknownInteraction {
                reference: reference.to_string(),
            });
        }
        Ok(())
    }

    /// Interactions in insertion order.
    #[must_use]
    pub fn interactions(&self) -> &[Interaction] {
        &self.interactions
    }

    /// Message interaction with the given description.
    #[must_use]
    pub fn find_message(&self, description: &str) -> Option<&Interaction> {
        self.interactions.iter().find(|interaction| {
            interaction.spec_kind() == SpecKind::Message && interaction.description == description
        })
    }

    /// Number of interactions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    /// Whether no interactions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    /// Remove every interaction, invalidating outstanding references.
    pub fn clear(&mut self) {
        self.interactions.clear();
        self.generation += 1;
    }
}

/// Fluent construction of interactions.
///
/// JSON bodies may embed inline matchers
/// (`{"pact:matcher:type": "type", "value": ..}`), which are replaced by their
/// example value and registered as matching rules. The first error is kept
/// and reported by [`build`](Self::build).
#[derive(Debug)]
#[must_use]
pub struct InteractionBuilder {
    interaction: Interaction,
    error: Option<PactError>,
}

impl InteractionBuilder {
    /// HTTP interaction, `GET /` returning `200` until configured.
    pub fn http(description: impl Into<String>) -> Self {
        Self::from_interaction(Interaction::http(
            description,
            HttpRequestSpec::new("GET", "/"),
            HttpResponseSpec::default(),
        ))
    }

    /// Message interaction.
    pub fn message(description: impl Into<String>) -> Self {
        Self::from_interaction(Interaction::message(description, MessageContents::default()))
    }

    /// Plugin-defined interaction for `content_type`.
    pub fn plugin(description: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self::from_interaction(Interaction::plugin(
            description,
            PluginInteraction {
                content_type: content_type.into(),
                service: None,
                request: MessageContents::default(),
                response: MessageContents::default(),
                plugin_configuration: Map::new(),
            },
        ))
    }

    const fn from_interaction(interaction: Interaction) -> Self {
        Self {
            interaction,
            error: None,
        }
    }

    /// Add a provider state.
    pub fn given(mut self, state: impl Into<String>) -> Self {
        self.interaction.provider_states.push(ProviderState::new(state));
        self
    }

    /// Add a provider state with parameters.
    pub fn given_with_params(
        mut self,
        state: impl Into<String>,
        params: Map<String, Value>,
    ) -> Self {
        self.interaction.provider_states.push(ProviderState {
            name: state.into(),
            params,
        });
        self
    }

    /// Set the request method and path.
    pub fn with_request(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        if let Some(request) = self.request_mut() {
            let fresh = HttpRequestSpec::new(method, path);
            request.method = fresh.method;
            request.path = fresh.path;
        }
        self
    }

    /// Add a query parameter value.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(request) = self.request_mut() {
            request.query.entry(name.into()).or_default().push(value.into());
        }
        self
    }

    /// Add a request header.
    pub fn with_request_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        if let Some(request) = self.request_mut() {
            request.headers.insert(name.into(), value.into());
        }
        self
    }

    /// Set a JSON request body.
    pub fn with_json_request_body(mut self, body: Value) -> Self {
        let mut rules = MatchingRules::new();
        let body = self.extract(body, &mut rules);
        if let Some(request) = self.request_mut() {
            request
                .headers
                .entry("Content-Type".to_string())
                .or_insert_with(|| "application/json".to_string());
            request.body = body;
            request.matching_rules.extend(rules);
        }
        self
    }

    /// Set the response status.
    pub fn with_status(mut self, status: u16) -> Self {
        if let Some(response) = self.response_mut() {
            response.status = status;
        }
        self
    }

    /// Add a response header.
    pub fn with_response_header(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        if let Some(response) = self.response_mut() {
            response.headers.insert(name.into(), value.into());
        }
        self
    }

    /// Set a JSON response body.
    pub fn with_json_response_body(mut self, body: Value) -> Self {
        let mut rules = MatchingRules::new();
        let body = self.extract(body, &mut rules);
        if let Some(response) = self.response_mut() {
            response.body = body;
            response.matching_rules.extend(rules);
        }
        self
    }

    /// Set JSON message contents.
    pub fn with_json_contents(mut self, contents: Value) -> Self {
        let mut rules = MatchingRules::new();
        let contents = self.extract(contents, &mut rules);
        match &mut self.interaction.kind {
            InteractionKind::Message(message) => {
                message.contents = contents;
                message.matching_rules.extend(rules);
            }
            _ => self.fail("JSON contents apply to message interactions only"),
        }
        self
    }

    /// Add a metadata entry to a message.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        match &mut self.interaction.kind {
            InteractionKind::Message(message) => {
                message.metadata.insert(key.into(), value);
            }
            _ => self.fail("metadata applies to message interactions only"),
        }
        self
    }

    /// Set the plugin service/method key, e.g. `PactPlugin/InitPlugin`.
    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        match &mut self.interaction.kind {
            InteractionKind::Plugin(plugin) => plugin.service = Some(service.into()),
            _ => self.fail("a service applies to plugin interactions only"),
        }
        self
    }

    /// Attach plugin generated content to a part.
    pub fn with_plugin_content(mut self, part: InteractionPart, content: PluginContent) -> Self {
        let slot = match (&mut self.interaction.kind, part) {
            (InteractionKind::Http { request, .. }, InteractionPart::Request) => {
                &mut request.plugin_content
            }
            (InteractionKind::Http { response, .. }, InteractionPart::Response) => {
                &mut response.plugin_content
            }
            (InteractionKind::Message(message), InteractionPart::Request) => {
                &mut message.plugin_content
            }
            (InteractionKind::Plugin(plugin), InteractionPart::Request) => {
                &mut plugin.request.plugin_content
            }
            (InteractionKind::Plugin(plugin), InteractionPart::Response) => {
                &mut plugin.response.plugin_content
            }
            (InteractionKind::Message(_), InteractionPart::Response) => {
                self.fail("messages have no response part");
                return self;
            }
        };
        *slot = Some(content);
        self
    }

    /// Register a matching rule on a part.
    pub fn with_matching_rule(mut self, part: InteractionPart, rule: MatchingRule) -> Self {
        let rules = match (&mut self.interaction.kind, part) {
            (InteractionKind::Http { request, .. }, InteractionPart::Request) => {
                &mut request.matching_rules
            }
            (InteractionKind::Http { response, .. }, InteractionPart::Response) => {
                &mut response.matching_rules
            }
            (InteractionKind::Message(message), _) => &mut message.matching_rules,
            (InteractionKind::Plugin(plugin), InteractionPart::Request) => {
                &mut plugin.request.matching_rules
            }
            (InteractionKind::Plugin(plugin), InteractionPart::Response) => {
                &mut plugin.response.matching_rules
            }
        };
        rules.add(rule);
        self
    }

    /// Finish the interaction and validate it.
    ///
    /// # Errors
    ///
    /// Returns the first builder error, or the validation failure.
    pub fn build(self) -> Result<Interaction> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.interaction.validate()?;
        Ok(self.interaction)
    }

    fn request_mut(&mut self) -> Option<&mut HttpRequestSpec> {
        if self.interaction.spec_kind() != SpecKind::Http {
            self.fail("request settings apply to HTTP interactions only");
            return None;
        }
        match &mut self.interaction.kind {
            InteractionKind::Http { request, .. } => Some(request),
            _ => None,
        }
    }

    fn response_mut(&mut self) -> Option<&mut HttpResponseSpec> {
        if self.interaction.spec_kind() != SpecKind::Http {
            self.fail("response settings apply to HTTP interactions only");
            return None;
        }
        match &mut self.interaction.kind {
            InteractionKind::Http { response, .. } => Some(response),
            _ => None,
        }
    }

    fn extract(&mut self, body: Value, rules: &mut MatchingRules) -> Option<Value> {
        match extract_inline_matchers(body, "$.body", rules) {
            Ok(body) => Some(body),
            Err(error) => {
                self.error.get_or_insert(error);
                None
            }
        }
    }

    fn fail(&mut self, reason: &str) {
        let description = &self.interaction.description;
        self.error
            .get_or_insert_with(|| PactError::invalid(format!("'{description}': {reason}")));
    }
}
