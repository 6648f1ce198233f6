//! Per-session record of received traffic and discrepancies.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::model::Mismatch;

/// A request received by a mock server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedRequest {
    /// Correlation id, also attached to the request span
    pub id: Uuid,
    /// HTTP method, upper case
    pub method: String,
    /// Request path
    pub path: String,
    /// Decoded query parameters
    pub query: BTreeMap<String, Vec<String>>,
    /// Headers with lower-cased names; repeated headers are joined with `, `
    pub headers: BTreeMap<String, String>,
    /// Raw body
    #[serde(skip)]
    pub body: Vec<u8>,
    /// `content-type` header, if sent
    pub content_type: Option<String>,
    /// Description of the interaction the request was matched to
    pub matched: Option<String>,
}

impl RecordedRequest {
    /// JSON view compared against [`expected_request_view`](crate::matchers::expected_request_view).
    ///
    /// The body is parsed as JSON when possible, kept as text otherwise and
    /// omitted when empty.
    #[must_use]
    pub fn view(&self) -> Value {
        let header: Map<String, Value> = self
            .headers
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect();
        let mut view = json!({
            "method": self.method,
            "path": self.path,
            "query": self.query,
            "header": header,
        });
        if !self.body.is_empty() {
            let body = serde_json::from_slice(&self.body).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&self.body).into_owned())
            });
            view["body"] = body;
        }
        view
    }
}

/// Append-only log of requests and mismatches, guarded by the session lock.
#[derive(Debug, Default)]
pub struct Ledger {
    actual_log: Vec<RecordedRequest>,
    mismatches: Vec<Mismatch>,
    exercised: HashSet<usize>,
}

impl Ledger {
    /// Record a handled request, the interaction index it matched and the
    /// mismatches it produced.
    pub fn record(
        &mut self,
        request: RecordedRequest,
        matched: Option<usize>,
        mismatches: Vec<Mismatch>,
    ) {
        if let Some(index) = matched {
            self.exercised.insert(index);
        }
        self.actual_log.push(request);
        self.mismatches.extend(mismatches);
    }

    /// Append mismatches not tied to one request.
    pub fn extend_mismatches(&mut self, mismatches: impl IntoIterator<Item = Mismatch>) {
        self.mismatches.extend(mismatches);
    }

    /// Whether the interaction at `index` received a request.
    #[must_use]
    pub fn is_exercised(&self, index: usize) -> bool {
        self.exercised.contains(&index)
    }

    /// Requests in arrival order.
    #[must_use]
    pub fn actual_log(&self) -> &[RecordedRequest] {
        &self.actual_log
    }

    /// Mismatches in the order they were recorded.
    #[must_use]
    pub fn mismatches(&self) -> &[Mismatch] {
        &self.mismatches
    }
}
