//! Interaction and matching-rule data model.

pub mod body;
pub mod interaction;
pub mod matching;
pub mod mismatch;

pub use interaction::{
    HttpRequestSpec, HttpResponseSpec, Interaction, InteractionKind, InteractionPart,
    MessageContents, PluginContent, PluginInteraction, ProviderState, Reply, SpecKind,
};
pub use matching::{MatchingRule, MatchingRules, RuleKind};
pub use mismatch::Mismatch;
