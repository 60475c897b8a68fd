//! Value-set helpers used by the reconciler.
//!
//! Comparison is order-independent and treats empty strings as absent.

use std::collections::HashMap;

use idsync_connector::AttributeValue;

/// Drop empty values and duplicates, keeping first occurrences in order.
pub fn normalize(values: Vec<AttributeValue>) -> Vec<AttributeValue> {
    let mut seen = std::collections::HashSet::new();
    values
        .into_iter()
        .filter(|v| !v.is_empty())
        .filter(|v| seen.insert(v.canonical()))
        .collect()
}

fn counts(values: &[AttributeValue]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for value in values.iter().filter(|v| !v.is_empty()) {
        *counts.entry(value.canonical()).or_insert(0) += 1;
    }
    counts
}

/// Compare two value lists as unordered multisets.
pub fn same_values(left: &[AttributeValue], right: &[AttributeValue]) -> bool {
    counts(left) == counts(right)
}

/// Values of `candidates` not present in `existing`.
pub fn missing_from(candidates: &[AttributeValue], existing: &[AttributeValue]) -> Vec<AttributeValue> {
    let present = counts(existing);
    normalize(
        candidates
            .iter()
            .filter(|v| !present.contains_key(&v.canonical()))
            .cloned()
            .collect(),
    )
}

/// Canonical strings of non-empty values, for expression bindings.
pub fn to_strings(values: &[AttributeValue]) -> Vec<String> {
    values
        .iter()
        .filter(|v| !v.is_empty())
        .map(AttributeValue::canonical)
        .collect()
}
