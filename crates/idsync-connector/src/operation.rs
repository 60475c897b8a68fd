//! Change model and search filters.
//!
//! A [`Change`] is a computed, not-yet-applied description of how to mutate
//! one destination entity. [`Filter`] is the vocabulary used to ask a store
//! for entries changed since a point in time.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::{eq_folded, AttributeValue, Entity};

/// LDAP generalized time, UTC, second precision.
pub const GENERALIZED_TIME_FORMAT: &str = "%Y%m%d%H%M%SZ";

/// Render a timestamp in generalized time.
#[must_use]
pub fn format_generalized_time(at: DateTime<Utc>) -> String {
    at.format(GENERALIZED_TIME_FORMAT).to_string()
}

/// Kind of mutation a [`Change`] performs on the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationType {
    Create,
    Update,
    Delete,
    Rename,
}

impl ModificationType {
    /// All modification types, in reporting order.
    pub const ALL: [ModificationType; 4] = [
        ModificationType::Create,
        ModificationType::Update,
        ModificationType::Delete,
        ModificationType::Rename,
    ];

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModificationType::Create => "create",
            ModificationType::Update => "update",
            ModificationType::Delete => "delete",
            ModificationType::Rename => "rename",
        }
    }
}

impl fmt::Display for ModificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ModificationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" | "add" => Ok(ModificationType::Create),
            "update" | "modify" => Ok(ModificationType::Update),
            "delete" => Ok(ModificationType::Delete),
            "rename" | "modrdn" => Ok(ModificationType::Rename),
            _ => Err(format!("Unknown modification type: {s}")),
        }
    }
}

/// Attribute-level operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    AddValues,
    ReplaceValues,
    DeleteValues,
}

impl OperationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::AddValues => "add_values",
            OperationKind::ReplaceValues => "replace_values",
            OperationKind::DeleteValues => "delete_values",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attribute operation inside a [`Change`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeOperation {
    pub kind: OperationKind,
    pub attribute: String,
    pub values: Vec<AttributeValue>,
}

impl AttributeOperation {
    pub fn add(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            kind: OperationKind::AddValues,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn replace(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            kind: OperationKind::ReplaceValues,
            attribute: attribute.into(),
            values,
        }
    }

    pub fn delete(attribute: impl Into<String>, values: Vec<AttributeValue>) -> Self {
        Self {
            kind: OperationKind::DeleteValues,
            attribute: attribute.into(),
            values,
        }
    }

    /// Canonical string values carried by the operation.
    pub fn string_values(&self) -> Vec<String> {
        self.values.iter().map(AttributeValue::canonical).collect()
    }

    /// Apply this operation to an in-memory entity.
    ///
    /// `DeleteValues` with no values removes the whole attribute.
    pub fn apply_to(&self, entity: &mut Entity) {
        match self.kind {
            OperationKind::AddValues => {
                let attribute = entity.attribute_entry(&self.attribute);
                for value in &self.values {
                    attribute.add_value(value.clone());
                }
            }
            OperationKind::ReplaceValues => {
                entity.remove_attribute(&self.attribute);
                if !self.values.is_empty() {
                    entity.put(&self.attribute, self.values.iter().cloned());
                }
            }
            OperationKind::DeleteValues => {
                if self.values.is_empty() {
                    entity.remove_attribute(&self.attribute);
                    return;
                }
                let now_empty = match entity.attribute_mut(&self.attribute) {
                    Some(attribute) => {
                        for value in &self.values {
                            attribute.remove_value(value);
                        }
                        attribute.values().is_empty()
                    }
                    None => false,
                };
                if now_empty {
                    entity.remove_attribute(&self.attribute);
                }
            }
        }
    }
}

/// A computed mutation of one destination entity.
///
/// An `Update` always carries at least one operation and a `Rename` never
/// carries any; the reconciler upholds both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub modification: ModificationType,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<AttributeOperation>,
}

impl Change {
    pub fn create(identifier: impl Into<String>, operations: Vec<AttributeOperation>) -> Self {
        Self {
            modification: ModificationType::Create,
            identifier: identifier.into(),
            new_identifier: None,
            operations,
        }
    }

    pub fn update(identifier: impl Into<String>, operations: Vec<AttributeOperation>) -> Self {
        Self {
            modification: ModificationType::Update,
            identifier: identifier.into(),
            new_identifier: None,
            operations,
        }
    }

    pub fn delete(identifier: impl Into<String>) -> Self {
        Self {
            modification: ModificationType::Delete,
            identifier: identifier.into(),
            new_identifier: None,
            operations: Vec::new(),
        }
    }

    pub fn rename(identifier: impl Into<String>, new_identifier: impl Into<String>) -> Self {
        Self {
            modification: ModificationType::Rename,
            identifier: identifier.into(),
            new_identifier: Some(new_identifier.into()),
            operations: Vec::new(),
        }
    }

    /// Find the operation touching `attribute`, if any.
    pub fn operation_for(&self, attribute: &str) -> Option<&AttributeOperation> {
        self.operations
            .iter()
            .find(|op| eq_folded(&op.attribute, attribute))
    }

    /// Apply all attribute operations, in order, to an entity.
    pub fn apply_operations(&self, entity: &mut Entity) {
        for operation in &self.operations {
            operation.apply_to(entity);
        }
    }
}

/// Filter for changed-since queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// Match entries where attribute equals value.
    Equals { attribute: String, value: String },

    /// Match entries where attribute is greater than or equal to value.
    GreaterThanOrEquals { attribute: String, value: String },

    /// Match entries where attribute exists (has any value).
    Present { attribute: String },

    /// Logical AND of multiple filters.
    And { filters: Vec<Filter> },

    /// Logical OR of multiple filters.
    Or { filters: Vec<Filter> },

    /// Logical NOT of a filter.
    Not { filter: Box<Filter> },
}

impl Filter {
    /// Create an equals filter.
    pub fn eq(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equals filter.
    pub fn gte(attribute: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::GreaterThanOrEquals {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Create a present (attribute exists) filter.
    pub fn present(attribute: impl Into<String>) -> Self {
        Filter::Present {
            attribute: attribute.into(),
        }
    }

    /// Create an AND filter.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And { filters }
    }

    /// Create an OR filter.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or { filters }
    }

    /// Create a NOT filter (negation).
    pub fn negate(filter: Filter) -> Self {
        Filter::Not {
            filter: Box::new(filter),
        }
    }

    /// Entries whose timestamp attribute is at or after `since`.
    pub fn changed_since(timestamp_attribute: impl Into<String>, since: DateTime<Utc>) -> Self {
        Filter::gte(timestamp_attribute, format_generalized_time(since))
    }

    /// Evaluate the filter against an attribute lookup.
    ///
    /// Ordering comparisons are lexicographic, which is correct for
    /// generalized time and fixed-width values.
    pub fn matches<F>(&self, lookup: &F) -> bool
    where
        F: Fn(&str) -> Vec<String>,
    {
        match self {
            Filter::Equals { attribute, value } => lookup(attribute)
                .iter()
                .any(|v| eq_folded(v, value)),
            Filter::GreaterThanOrEquals { attribute, value } => {
                lookup(attribute).iter().any(|v| v.as_str() >= value.as_str())
            }
            Filter::Present { attribute } => lookup(attribute).iter().any(|v| !v.is_empty()),
            Filter::And { filters } => filters.iter().all(|f| f.matches(lookup)),
            Filter::Or { filters } => filters.iter().any(|f| f.matches(lookup)),
            Filter::Not { filter } => !filter.matches(lookup),
        }
    }
}

impl fmt::Display for Filter {
    /// LDAP-style string form, used in logs.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equals { attribute, value } => write!(f, "({attribute}={value})"),
            Filter::GreaterThanOrEquals { attribute, value } => {
                write!(f, "({attribute}>={value})")
            }
            Filter::Present { attribute } => write!(f, "({attribute}=*)"),
            Filter::And { filters } => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Or { filters } => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            }
            Filter::Not { filter } => write!(f, "(!{filter})"),
        }
    }
}
