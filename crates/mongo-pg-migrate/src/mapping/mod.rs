//! Source field to destination column mapping.
//!
//! An advisor may propose a mapping; when it does not, [`fallback_mapping`]
//! derives one by name matching so a run never depends on the advisor being
//! available.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::core::{canonicalize, ColumnDescriptor, ColumnMapping};

/// Source field holding the document identifier.
pub const ID_FIELD: &str = "_id";

/// Transformation tag applied to the identifier when it lands in a column.
pub const STRINGIFY_ID: &str = "stringify_id";

/// Pick the mapping for a collection.
///
/// A non-empty advisor hint is used unchanged. Otherwise the deterministic
/// fallback is applied.
pub fn resolve_mapping(
    source_fields: &[String],
    columns: &[ColumnDescriptor],
    advisor_hint: Option<Vec<ColumnMapping>>,
) -> Vec<ColumnMapping> {
    match advisor_hint {
        Some(hint) if !hint.is_empty() => {
            debug!("Using advisor mapping with {} entries", hint.len());
            hint
        }
        _ => fallback_mapping(source_fields, columns),
    }
}

/// The column that should receive the document identifier.
///
/// First column, in declaration order, whose canonical name contains `id`
/// and that is unique or part of the primary key.
pub fn identifier_column(columns: &[ColumnDescriptor]) -> Option<&ColumnDescriptor> {
    columns
        .iter()
        .find(|c| (c.primary_key || c.unique) && canonicalize(&c.name).contains("id"))
}

/// Deterministic name-based mapping.
///
/// `_id` goes to the identifier column when there is one and is dropped
/// otherwise. Every other field is canonicalized and matched against the
/// canonical column names: exact match first, then substring containment in
/// either direction, taking the first unclaimed column in declaration order.
/// Each column receives at most one field. Fields that match nothing are
/// dropped.
pub fn fallback_mapping(source_fields: &[String], columns: &[ColumnDescriptor]) -> Vec<ColumnMapping> {
    let canonical: Vec<String> = columns.iter().map(|c| canonicalize(&c.name)).collect();
    let mut claimed: HashSet<usize> = HashSet::new();
    let mut mappings = Vec::new();

    let id_column = identifier_column(columns)
        .and_then(|id| columns.iter().position(|c| std::ptr::eq(c, id)));

    for field in source_fields {
        if field == ID_FIELD {
            // Never name-matched: `_id` is a substring of every `*_id` column.
            match id_column {
                Some(idx) if claimed.insert(idx) => mappings.push(
                    ColumnMapping::new(field.clone(), columns[idx].name.clone())
                        .with_transformation(STRINGIFY_ID),
                ),
                _ => debug!("No identifier column for {}", ID_FIELD),
            }
            continue;
        }

        let wanted = canonicalize(field);
        if wanted.is_empty() {
            continue;
        }

        let free = |i: &usize| !claimed.contains(i) && Some(*i) != id_column && !canonical[*i].is_empty();

        let exact = (0..columns.len()).filter(free).find(|&i| canonical[i] == wanted);
        let found = exact.or_else(|| {
            (0..columns.len())
                .filter(free)
                .find(|&i| canonical[i].contains(&wanted) || wanted.contains(&canonical[i]))
        });

        match found {
            Some(idx) => {
                claimed.insert(idx);
                mappings.push(ColumnMapping::new(field.clone(), columns[idx].name.clone()));
            }
            None => debug!("No destination column for field {}", field),
        }
    }

    mappings
}

/// Drop mappings whose destination column does not exist.
///
/// Column names compare case-sensitively. A column targeted by more than one
/// mapping keeps only the first.
pub fn validate_mappings(
    mappings: Vec<ColumnMapping>,
    columns: &[ColumnDescriptor],
) -> Vec<ColumnMapping> {
    let mut seen: HashSet<String> = HashSet::new();
    mappings
        .into_iter()
        .filter(|m| {
            if !columns.iter().any(|c| c.name == m.destination_column) {
                warn!(
                    "Dropping mapping {} -> {}: column does not exist",
                    m.source_field, m.destination_column
                );
                return false;
            }
            if !seen.insert(m.destination_column.clone()) {
                warn!(
                    "Dropping mapping {} -> {}: column already mapped",
                    m.source_field, m.destination_column
                );
                return false;
            }
            true
        })
        .collect()
}
