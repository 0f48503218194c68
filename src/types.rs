use serde::{Deserialize, Serialize};

/// One resolved person (or other entity) with the fixed attribute schema.
///
/// Dates stay as the ISO-8601 strings the query service returns. A missing
/// date means either "no such statement" or "not returned"; the two are not
/// distinguished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Canonical label, which may differ from the requested string.
    pub name: String,
    /// Knowledge-graph identifier (`Q` followed by digits).
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub birth_place: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub death_place: Option<String>,
    #[serde(default)]
    pub death_date: Option<String>,
    #[serde(default)]
    pub gender: Option<String>,
    /// First citizenship seen; additional citizenships are not kept.
    #[serde(default)]
    pub citizenship: Option<String>,
    #[serde(default)]
    pub occupation: Vec<String>,
    #[serde(default)]
    pub work_locations: Vec<WorkLocationEntry>,
}

/// A single work-location statement with its temporal qualifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkLocationEntry {
    pub location: String,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub point_in_time: Option<String>,
}

/// A request paired with the record that resolved it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedName {
    /// The request string as the caller spelled it.
    pub requested: String,
    pub record: EntityRecord,
}

/// Outcome of a batch resolution.
///
/// Both lists follow original request order. Every distinct request
/// (case-insensitive) appears in exactly one of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub resolved: Vec<ResolvedName>,
    pub unresolved: Vec<String>,
}

impl ResolutionResult {
    /// Look up the record for a request, ignoring case.
    pub fn record_for(&self, requested: &str) -> Option<&EntityRecord> {
        let key = name_key(requested);
        self.resolved
            .iter()
            .find(|r| name_key(&r.requested) == key)
            .map(|r| &r.record)
    }

    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Which round moved a name out of PENDING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Batch,
    Single,
    /// Index into the fallback language list.
    Fallback(usize),
    ById,
}

/// Per-name resolution state tracked across rounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameState {
    Pending,
    Resolved {
        record: EntityRecord,
        strategy: Strategy,
    },
    Unresolved,
}

impl NameState {
    pub fn is_pending(&self) -> bool {
        matches!(self, NameState::Pending)
    }
}

/// Case-insensitive identity used for request matching and deduplication.
pub fn name_key(name: &str) -> String {
    name.trim().to_lowercase()
}
