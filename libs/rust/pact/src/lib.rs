//! Contract-verification mock engine.
//!
//! Consumers declare expected interactions in an [`InteractionRegistry`],
//! serve them from a [`MockServerSession`] and, once every interaction was
//! exercised without mismatches, persist them as a pact file with the
//! [`ContractWriter`]. Providers verify message interactions through the
//! [`MessageDispatchLayer`]. Content types and transports the engine does
//! not know natively are delegated to out-of-process plugins through the
//! [`PluginBridge`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pact_mock::{EngineConfig, InteractionBuilder, InteractionRegistry, MockServerSession, PluginBridge};
//!
//! # async fn run() -> pact_mock::Result<()> {
//! let config = EngineConfig::from_env()?;
//! let mut registry = InteractionRegistry::new("web", "users");
//! registry.add(
//!     InteractionBuilder::http("get user")
//!         .given("user 1 exists")
//!         .with_request("GET", "/users/1")
//!         .with_status(200),
//! )?;
//!
//! let bridge = Arc::new(PluginBridge::from_config(&config));
//! let session = MockServerSession::new(registry, bridge, config);
//! let port = session.start("127.0.0.1:0", false).await?;
//! // ... exercise http://127.0.0.1:{port}/users/1 ...
//! let result = session.verify(std::path::Path::new("pacts")).await;
//! session.cleanup().await?;
//! # let _ = (port, result);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod contract;
pub mod error;
pub mod manager;
pub mod matchers;
pub mod message;
pub mod model;
pub mod plugin;
pub mod registry;
pub mod session;
pub mod verification;

pub use config::{CandidatePolicy, ConfigError, EngineConfig, TlsConfig};
pub use contract::{Contract, ContractInteraction, ContractWriter, SpecificationVersion};
pub use error::{ErrorCode, PactError, Result};
pub use manager::SessionManager;
pub use matchers::{MatchRuleEngine, RuleMatcher};
pub use message::{GeneratedMessage, HandlerError, MessageDispatchLayer, MessageHandlers};
pub use model::{
    Interaction, InteractionKind, InteractionPart, MatchingRule, MatchingRules, Mismatch,
    PluginContent, ProviderState, RuleKind, SpecKind,
};
pub use plugin::{PluginBridge, PluginHandle, PluginRef, TransportFactory};
pub use registry::{InteractionBuilder, InteractionRef, InteractionRegistry};
pub use session::{MockServerSession, SessionState};
pub use session::ledger::RecordedRequest;
pub use verification::VerificationResult;
