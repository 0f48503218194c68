//! SPARQL endpoint access (Wikidata query service).
//!
//! Modules:
//! - query: query string construction for the fixed person schema
//! - client: HTTP transport, failure classification, bounded retry
//! - limiter: the shared outbound request budget

pub mod client;
pub mod limiter;
pub mod query;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Media type requested for tabular JSON results.
pub const SPARQL_JSON: &str = "application/sparql-results+json";

/// One value descriptor inside a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SparqlValue {
    /// `uri`, `literal`, or `bnode`.
    #[serde(rename = "type", default)]
    pub kind: String,
    pub value: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl SparqlValue {
    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            kind: "literal".to_string(),
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }

    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            kind: "uri".to_string(),
            value: value.into(),
            lang: None,
            datatype: None,
        }
    }
}

/// One result row: declared variable name → value.
pub type Binding = HashMap<String, SparqlValue>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResponse {
    #[serde(default)]
    pub results: SparqlResults,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SparqlResults {
    #[serde(default)]
    pub bindings: Vec<Binding>,
}

impl SparqlResponse {
    pub fn into_bindings(self) -> Vec<Binding> {
        self.results.bindings
    }
}

/// Trailing path segment of an entity URI
/// (`http://www.wikidata.org/entity/Q5598` → `Q5598`).
pub fn entity_id_from_uri(uri: &str) -> Option<&str> {
    uri.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
}
