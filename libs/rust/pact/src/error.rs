//! Error taxonomy for the mock engine.
//!
//! Build-time and lifecycle violations are reported synchronously and only
//! fail the operation that caused them. Verification failures are never
//! errors: they are [`Mismatch`](crate::model::Mismatch) values.

use std::time::Duration;

use rust_common::Retryable;
use thiserror::Error;

use crate::config::ConfigError;

/// Engine error.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PactError {
    /// Interaction failed build-time validation
    #[error("Invalid interaction: {reason}")]
    InvalidInteraction {
        /// What was wrong with the interaction
        reason: String,
    },

    /// Interaction reference does not point at a live interaction
    #[error("Unknown interaction: {reference}")]
    UnknownInteraction {
        /// Display form of the stale reference
        reference: String,
    },

    /// Plugin could not be started or did not answer the handshake
    #[error("Plugin {name} unavailable: {reason}")]
    PluginUnavailable {
        /// Plugin name
        name: String,
        /// Underlying cause
        reason: String,
    },

    /// Plugin speaks an incompatible protocol version
    #[error("Plugin {name} protocol version {actual} is not supported (expected {expected})")]
    PluginVersionMismatch {
        /// Plugin name
        name: String,
        /// Supported interface version
        expected: u32,
        /// Reported interface version
        actual: u32,
    },

    /// Plugin call exceeded its deadline
    #[error("Plugin {name} timed out after {timeout:?} during {operation}")]
    PluginTimeout {
        /// Plugin name
        name: String,
        /// RPC that timed out
        operation: &'static str,
        /// Deadline that elapsed
        timeout: Duration,
    },

    /// Plugin reported a failure generating or comparing content
    #[error("Plugin {name} content error: {reason}")]
    PluginContentError {
        /// Plugin name
        name: String,
        /// Reason reported by the plugin
        reason: String,
    },

    /// Transport is neither built in nor advertised by a loaded plugin
    #[error("Unknown transport: {name}")]
    UnknownTransport {
        /// Requested transport name
        name: String,
    },

    /// Session was already started
    #[error("Mock server session already started")]
    SessionAlreadyStarted,

    /// Session was cleaned up
    #[error("Mock server session already stopped")]
    SessionAlreadyStopped,

    /// No session is bound to the port
    #[error("No mock server session running on port {port}")]
    UnknownSession {
        /// Port the caller referred to
        port: u16,
    },

    /// Pact file requested while mismatches are outstanding
    #[error("{count} interaction(s) have not been verified")]
    UnverifiedInteractions {
        /// Number of outstanding mismatches
        count: usize,
    },

    /// Pact file requested for a session without interactions
    #[error("Contract has no interactions")]
    EmptyContract,

    /// Filesystem or socket failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid engine configuration
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Stable error identifiers for callers that branch on the failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// See [`PactError::InvalidInteraction`]
    InvalidInteraction,
    /// See [`PactError::UnknownInteraction`]
    UnknownInteraction,
    /// See [`PactError::PluginUnavailable`]
    PluginUnavailable,
    /// See [`PactError::PluginVersionMismatch`]
    PluginVersionMismatch,
    /// See [`PactError::PluginTimeout`]
    PluginTimeout,
    /// See [`PactError::PluginContentError`]
    PluginContentError,
    /// See [`PactError::UnknownTransport`]
    UnknownTransport,
    /// See [`PactError::SessionAlreadyStarted`]
    SessionAlreadyStarted,
    /// See [`PactError::SessionAlreadyStopped`]
    SessionAlreadyStopped,
    /// See [`PactError::UnknownSession`]
    UnknownSession,
    /// See [`PactError::UnverifiedInteractions`]
    UnverifiedInteractions,
    /// See [`PactError::EmptyContract`]
    EmptyContract,
    /// IO and serialization failures
    IoError,
    /// See [`PactError::Config`]
    Config,
}

impl ErrorCode {
    /// Get the string representation of the error code
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInteraction => "INVALID_INTERACTION",
            Self::UnknownInteraction => "UNKNOWN_INTERACTION",
            Self::PluginUnavailable => "PLUGIN_UNAVAILABLE",
            Self::PluginVersionMismatch => "PLUGIN_VERSION_MISMATCH",
            Self::PluginTimeout => "PLUGIN_TIMEOUT",
            Self::PluginContentError => "PLUGIN_CONTENT_ERROR",
            Self::UnknownTransport => "UNKNOWN_TRANSPORT",
            Self::SessionAlreadyStarted => "SESSION_ALREADY_STARTED",
            Self::SessionAlreadyStopped => "SESSION_ALREADY_STOPPED",
            Self::UnknownSession => "UNKNOWN_SESSION",
            Self::UnverifiedInteractions => "UNVERIFIED_INTERACTIONS",
            Self::EmptyContract => "EMPTY_CONTRACT",
            Self::IoError => "IO_ERROR",
            Self::Config => "CONFIG_ERROR",
        }
    }
}

impl PactError {
    /// Create an invalid interaction error.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidInteraction {
            reason: reason.into(),
        }
    }

    /// Create a plugin unavailable error.
    #[must_use]
    pub fn plugin_unavailable(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::PluginUnavailable {
            name: name.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a plugin content error.
    #[must_use]
    pub fn plugin_content(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PluginContentError {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Get the error code for this error
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInteraction { .. } => ErrorCode::InvalidInteraction,
            Self::UnknownInteraction { .. } => ErrorCode::UnknownInteraction,
            Self::PluginUnavailable { .. } => ErrorCode::PluginUnavailable,
            Self::PluginVersionMismatch { .. } => ErrorCode::PluginVersionMismatch,
            Self::PluginTimeout { .. } => ErrorCode::PluginTimeout,
            Self::PluginContentError { .. } => ErrorCode::PluginContentError,
            Self::UnknownTransport { .. } => ErrorCode::UnknownTransport,
            Self::SessionAlreadyStarted => ErrorCode::SessionAlreadyStarted,
            Self::SessionAlreadyStopped => ErrorCode::SessionAlreadyStopped,
            Self::UnknownSession { .. } => ErrorCode::UnknownSession,
            Self::UnverifiedInteractions { .. } => ErrorCode::UnverifiedInteractions,
            Self::EmptyContract => ErrorCode::EmptyContract,
            Self::Io(_) | Self::Serialization(_) => ErrorCode::IoError,
            Self::Config(_) => ErrorCode::Config,
        }
    }

    /// Whether the failure originated in a plugin call.
    ///
    /// Plugin failures degrade a single interaction to a mismatch instead of
    /// failing the session.
    #[must_use]
    pub const fn is_plugin_error(&self) -> bool {
        matches!(
            self,
            Self::PluginUnavailable { .. }
                | Self::PluginVersionMismatch { .. }
                | Self::PluginTimeout { .. }
                | Self::PluginContentError { .. }
        )
    }
}

impl Retryable for PactError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PluginUnavailable { .. } | Self::PluginTimeout { .. }
        )
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = PactError> = std::result::Result<T, E>;
