//! Outcome of verifying a mock server session.

use std::path::PathBuf;

use serde::Serialize;

use crate::error::PactError;
use crate::model::Mismatch;

/// Result of [`MockServerSession::verify`](crate::session::MockServerSession::verify).
///
/// `success` holds only when no mismatch is outstanding and the pact file
/// was written.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// Whether verification succeeded
    pub success: bool,
    /// Outstanding mismatches
    pub mismatches: Vec<Mismatch>,
    /// Written pact file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pact_file: Option<PathBuf>,
    /// Why the pact file could not be written
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VerificationResult {
    /// Every interaction verified and the pact file written to `pact_file`.
    #[must_use]
    pub const fn passed(pact_file: PathBuf) -> Self {
        Self {
            success: true,
            mismatches: Vec::new(),
            pact_file: Some(pact_file),
            error: None,
        }
    }

    /// Verification failed with outstanding mismatches.
    #[must_use]
    pub const fn failed(mismatches: Vec<Mismatch>) -> Self {
        Self {
            success: false,
            mismatches,
            pact_file: None,
            error: None,
        }
    }

    /// Traffic verified but the pact file could not be written.
    #[must_use]
    pub fn write_failed(error: &PactError) -> Self {
        Self {
            success: false,
            mismatches: Vec::new(),
            pact_file: None,
            error: Some(error.to_string()),
        }
    }

    /// Whether the consumer's expectations were met.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.success
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed() {
        let result = VerificationResult::passed(PathBuf::from("pacts/a-b.json"));
        assert!(result.is_success());
        assert!(result.mismatches.is_empty());
    }

    #[test]
    fn test_failed_keeps_mismatches() {
        let result = VerificationResult::failed(vec![Mismatch::missing_request("get foobar")]);
        assert!(!result.is_success());
        assert_eq!(result.mismatches.len(), 1);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["mismatches"][0]["interactionDescription"], "get foobar");
        assert!(json.get("pactFile").is_none());
    }

    #[test]
    fn test_write_failed() {
        let result = VerificationResult::write_failed(&PactError::EmptyContract);
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("Contract has no interactions"));
    }
}
