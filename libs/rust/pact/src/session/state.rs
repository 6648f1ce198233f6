//! Session lifecycle.

use std::fmt;

use crate::error::{PactError, Result};

/// Lifecycle state of a mock server session.
///
/// `Created -> Starting -> Active -> Stopping -> Stopped`. A failed start
/// returns to `Created`; `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Interactions bound, no listener yet
    Created,
    /// Acquiring a listener
    Starting,
    /// Accepting requests
    Active,
    /// Draining in-flight requests
    Stopping,
    /// Terminal; only read-only queries are valid
    Stopped,
}

impl SessionState {
    /// Check that a start may begin from this state.
    ///
    /// # Errors
    ///
    /// [`PactError::SessionAlreadyStopped`] once stopped or stopping,
    /// [`PactError::SessionAlreadyStarted`] if starting or active.
    pub const fn check_startable(self) -> Result<()> {
        match self {
            Self::Created => Ok(()),
            Self::Starting | Self::Active => Err(PactError::SessionAlreadyStarted),
            Self::Stopping | Self::Stopped => Err(PactError::SessionAlreadyStopped),
        }
    }

    /// Check that a mutating operation other than start is valid.
    ///
    /// # Errors
    ///
    /// [`PactError::SessionAlreadyStopped`] once stopping or stopped.
    pub const fn check_live(self) -> Result<()> {
        match self {
            Self::Stopping | Self::Stopped => Err(PactError::SessionAlreadyStopped),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "CREATED",
            Self::Starting => "STARTING",
            Self::Active => "ACTIVE",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_checks() {
        assert!(SessionState::Created.check_startable().is_ok());
        assert!(matches!(
            SessionState::Active.check_startable(),
            Err(PactError::SessionAlreadyStarted)
        ));
        assert!(matches!(
            SessionState::Stopped.check_startable(),
            Err(PactError::SessionAlreadyStopped)
        ));
    }

    #[test]
    fn test_live_checks() {
        assert!(SessionState::Active.check_live().is_ok());
        assert!(SessionState::Created.check_live().is_ok());
        assert!(SessionState::Stopping.check_live().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(SessionState::Stopping.to_string(), "STOPPING");
    }
}
