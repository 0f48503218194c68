//! Row aggregation: flat result rows → one record per entity.
//!
//! The query service fans out one row per combination of multi-valued
//! attributes (occupation × work-location statement), so a person with three
//! occupations and two work locations arrives as six rows. Rows are first
//! validated into a typed `PersonRow`, then grouped by entity identity.

use std::collections::HashMap;

use crate::sparql::query::is_entity_id;
use crate::sparql::{entity_id_from_uri, Binding};
use crate::types::{EntityRecord, WorkLocationEntry};

/// One result row with every schema variable resolved to a value or `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonRow {
    pub id: Option<String>,
    pub label: Option<String>,
    pub birth_place: Option<String>,
    pub birth_date: Option<String>,
    pub death_place: Option<String>,
    pub death_date: Option<String>,
    pub gender: Option<String>,
    pub citizenship: Option<String>,
    pub occupation: Option<String>,
    pub work_location: Option<WorkLocationEntry>,
}

fn value(binding: &Binding, var: &str) -> Option<String> {
    binding
        .get(var)
        .map(|v| v.value.trim())
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string())
}

/// The label service falls back to the bare identifier (`Q123`) when an
/// entity has no label in any requested language. That is not a label.
fn label_value(binding: &Binding, var: &str) -> Option<String> {
    value(binding, var).filter(|v| !is_entity_id(v))
}

impl PersonRow {
    pub fn from_binding(binding: &Binding) -> Self {
        let id = binding
            .get("person")
            .and_then(|v| entity_id_from_uri(&v.value))
            .filter(|id| is_entity_id(id))
            .map(|id| id.to_string());

        let work_location = label_value(binding, "workLocationLabel").map(|location| {
            WorkLocationEntry {
                location,
                start_time: value(binding, "startTime"),
                end_time: value(binding, "endTime"),
                point_in_time: value(binding, "pointInTime"),
            }
        });

        Self {
            id,
            label: label_value(binding, "personLabel"),
            birth_place: label_value(binding, "placeOfBirthLabel"),
            birth_date: value(binding, "dateOfBirth"),
            death_place: label_value(binding, "placeOfDeathLabel"),
            death_date: value(binding, "dateOfDeath"),
            gender: label_value(binding, "genderLabel"),
            citizenship: label_value(binding, "citizenshipLabel"),
            occupation: label_value(binding, "occupationLabel"),
            work_location,
        }
    }

    /// Grouping key: identifier when present, else label.
    fn identity(&self) -> Option<String> {
        self.id
            .as_ref()
            .map(|id| format!("id:{}", id))
            .or_else(|| self.label.as_ref().map(|l| format!("label:{}", l)))
    }
}

/// An aggregated entity plus how many rows it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub record: EntityRecord,
    pub rows: usize,
}

fn fill(slot: &mut Option<String>, value: &Option<String>) {
    if slot.is_none() {
        slot.clone_from(value);
    }
}

fn merge_row(candidate: &mut Candidate, row: PersonRow) {
    let record = &mut candidate.record;
    candidate.rows += 1;

    if record.name.is_empty() {
        if let Some(label) = &row.label {
            record.name = label.clone();
        }
    }
    fill(&mut record.id, &row.id);
    fill(&mut record.birth_place, &row.birth_place);
    fill(&mut record.birth_date, &row.birth_date);
    fill(&mut record.death_place, &row.death_place);
    fill(&mut record.death_date, &row.death_date);
    fill(&mut record.gender, &row.gender);
    fill(&mut record.citizenship, &row.citizenship);

    if let Some(occupation) = row.occupation {
        if !record.occupation.contains(&occupation) {
            record.occupation.push(occupation);
        }
    }

    // Identical entries are one statement repeated by the occupation fan-out.
    // Same location with different qualifiers is a separate stay.
    if let Some(entry) = row.work_location {
        if !record.work_locations.contains(&entry) {
            record.work_locations.push(entry);
        }
    }
}

/// Group typed rows into entities, in first-seen order.
pub fn aggregate_rows(rows: impl IntoIterator<Item = PersonRow>) -> Vec<Candidate> {
    let mut order: Vec<Candidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        let Some(identity) = row.identity() else {
            log::debug!("aggregate: dropping row with neither id nor label");
            continue;
        };
        let slot = *index.entry(identity).or_insert_with(|| {
            order.push(Candidate {
                record: EntityRecord::default(),
                rows: 0,
            });
            order.len() - 1
        });
        merge_row(&mut order[slot], row);
    }

    for candidate in &mut order {
        if candidate.record.name.is_empty() {
            if let Some(id) = &candidate.record.id {
                candidate.record.name = id.clone();
            }
        }
    }
    order
}

/// Validate and group raw bindings.
pub fn aggregate(bindings: &[Binding]) -> Vec<Candidate> {
    aggregate_rows(bindings.iter().map(PersonRow::from_binding))
}

/// Pick the entity with the most rows; earliest wins ties.
pub fn dominant(candidates: Vec<Candidate>) -> Option<Candidate> {
    let mut best: Option<Candidate> = None;
    for candidate in candidates {
        let better = best
            .as_ref()
            .map_or(true, |current| candidate.rows > current.rows);
        if better {
            best = Some(candidate);
        }
    }
    best
}
