//! Provider-side message handlers, keyed by interaction description.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::model::{InteractionKind, ProviderState};
use crate::registry::InteractionRegistry;

/// Failure reported by a message handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("message handler failed: {0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    /// Handler failure with a reason.
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// A message produced for verification.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedMessage {
    /// Message body, sent as JSON
    pub body: Value,
    /// Message metadata, sent base64 encoded in headers when non-empty
    pub metadata: Map<String, Value>,
}

impl GeneratedMessage {
    /// Message without metadata.
    #[must_use]
    pub fn new(body: Value) -> Self {
        Self {
            body,
            metadata: Map::new(),
        }
    }

    /// Add a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Produces the message for one interaction given the requested provider
/// states.
pub type MessageHandler =
    Arc<dyn Fn(&[ProviderState]) -> Result<GeneratedMessage, HandlerError> + Send + Sync>;

/// Read-only table of handlers, populated at verification setup.
#[derive(Clone, Default)]
pub struct MessageHandlers {
    handlers: HashMap<String, MessageHandler>,
}

impl fmt::Debug for MessageHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut descriptions: Vec<&str> = self.descriptions().collect();
        descriptions.sort_unstable();
        f.debug_struct("MessageHandlers")
            .field("descriptions", &descriptions)
            .finish()
    }
}

impl MessageHandlers {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `description`, replacing any previous one.
    #[must_use]
    pub fn with_handler<F>(mut self, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&[ProviderState]) -> Result<GeneratedMessage, HandlerError> + Send + Sync + 'static,
    {
        self.handlers.insert(description.into(), Arc::new(handler));
        self
    }

    /// Handlers replaying the declared contents and metadata of every
    /// message interaction in `registry`.
    #[must_use]
    pub fn from_registry(registry: &InteractionRegistry) -> Self {
        registry
            .interactions()
            .iter()
            .filter_map(|interaction| match &interaction.kind {
                InteractionKind::Message(contents) => Some((
                    interaction.description.clone(),
                    GeneratedMessage {
                        body: contents.contents.clone().unwrap_or(Value::Null),
                        metadata: contents.metadata.clone(),
                    },
                )),
                _ => None,
            })
            .fold(Self::new(), |handlers, (description, message)| {
                handlers.with_handler(description, move |_| Ok(message.clone()))
            })
    }

    /// Handler registered for `description`. Lookup is exact and
    /// case-sensitive.
    #[must_use]
    pub fn get(&self, description: &str) -> Option<&MessageHandler> {
        self.handlers.get(description)
    }

    /// Registered descriptions, in no particular order.
    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Number of handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
