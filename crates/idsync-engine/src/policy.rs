//! Task-level synchronization policy.
//!
//! A [`Policy`] carries the per-attribute merge status and value
//! expressions, the gating condition for each modification type, and the
//! rule used to build destination identifiers on create.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use idsync_connector::{eq_folded, Entity, ModificationType};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::expression::Condition;

/// How an attribute converges on update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeStatus {
    /// Replace the destination values whenever they differ from the source.
    #[default]
    #[serde(alias = "replace")]
    Force,
    /// Add missing source values, never remove destination values.
    Merge,
    /// Never touch the attribute on update.
    Keep,
}

impl AttributeStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeStatus::Force => "force",
            AttributeStatus::Merge => "merge",
            AttributeStatus::Keep => "keep",
        }
    }
}

impl fmt::Display for AttributeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AttributeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "force" | "replace" => Ok(AttributeStatus::Force),
            "merge" => Ok(AttributeStatus::Merge),
            "keep" => Ok(AttributeStatus::Keep),
            _ => Err(format!("Unknown attribute status: {s}")),
        }
    }
}

/// Per-attribute policy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributePolicy {
    /// Falls back to the policy-wide default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<AttributeStatus>,

    /// Expressions appended when merging or when the source is empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_values: Vec<String>,

    /// Expressions whose results replace the source values outright.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub force_values: Vec<String>,

    /// Expressions only used when creating an entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_values: Vec<String>,
}

impl AttributePolicy {
    #[must_use]
    pub fn with_status(status: AttributeStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn default_value(mut self, expression: impl Into<String>) -> Self {
        self.default_values.push(expression.into());
        self
    }

    #[must_use]
    pub fn force_value(mut self, expression: impl Into<String>) -> Self {
        self.force_values.push(expression.into());
        self
    }

    #[must_use]
    pub fn create_value(mut self, expression: impl Into<String>) -> Self {
        self.create_values.push(expression.into());
        self
    }
}

/// Gating condition per modification type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conditions {
    pub create: Condition,
    pub update: Condition,
    pub delete: Condition,
    pub rename: Condition,
}

impl Conditions {
    pub fn for_modification(&self, modification: ModificationType) -> &Condition {
        match modification {
            ModificationType::Create => &self.create,
            ModificationType::Update => &self.update,
            ModificationType::Delete => &self.delete,
            ModificationType::Rename => &self.rename,
        }
    }
}

/// How a destination identifier is built for a source entry that has none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentifierRule {
    /// Expression evaluated against `source`, e.g. `"uid=" + source.uid`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,

    /// Fallback: build `<attribute>=<first value>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_attribute: Option<String>,

    /// Suffix appended as `,<base>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

impl IdentifierRule {
    pub fn is_configured(&self) -> bool {
        self.expression.is_some() || self.unique_attribute.is_some()
    }

    /// Append the configured base to a relative identifier.
    pub fn qualify(&self, relative: &str) -> String {
        match self.base.as_deref().filter(|b| !b.is_empty()) {
            Some(base) => format!("{relative},{base}"),
            None => relative.to_string(),
        }
    }
}

/// Synchronization policy of one task.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Status for attributes without their own.
    pub default_status: AttributeStatus,

    /// Attribute policies, looked up case-insensitively.
    pub attributes: BTreeMap<String, AttributePolicy>,

    pub conditions: Conditions,

    pub identifier: IdentifierRule,

    /// When set, only these attributes are ever written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_attributes: Option<Vec<String>>,
}

impl Policy {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, policy: AttributePolicy) -> Self {
        self.attributes.insert(name.into(), policy);
        self
    }

    #[must_use]
    pub fn with_conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }

    #[must_use]
    pub fn with_identifier(mut self, rule: IdentifierRule) -> Self {
        self.identifier = rule;
        self
    }

    #[must_use]
    pub fn with_write_attributes<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.write_attributes = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributePolicy> {
        self.attributes
            .iter()
            .find(|(key, _)| eq_folded(key, name))
            .map(|(_, policy)| policy)
    }

    pub fn status_of(&self, name: &str) -> AttributeStatus {
        self.attribute(name)
            .and_then(|p| p.status)
            .unwrap_or(self.default_status)
    }

    /// Attributes a change may touch.
    ///
    /// The allow-list when configured, otherwise every source attribute plus
    /// every attribute the policy declares.
    pub fn write_scope(&self, source: Option<&Entity>) -> Vec<String> {
        if let Some(allowed) = &self.write_attributes {
            return dedup_names(allowed.iter().cloned());
        }
        let from_source = source
            .into_iter()
            .flat_map(|entity| entity.attribute_names().map(str::to_string));
        dedup_names(from_source.chain(self.attributes.keys().cloned()))
    }

    /// Every expression the policy evaluates: conditions, attribute values
    /// and the identifier expression.
    pub fn expressions(&self) -> Vec<&str> {
        let conditions = [
            &self.conditions.create,
            &self.conditions.update,
            &self.conditions.delete,
            &self.conditions.rename,
        ];
        let mut expressions: Vec<&str> = conditions
            .into_iter()
            .filter_map(|condition| match condition {
                Condition::Expression(text) => Some(text.as_str()),
                Condition::Always | Condition::Never => None,
            })
            .collect();
        for attribute in self.attributes.values() {
            expressions.extend(
                attribute
                    .default_values
                    .iter()
                    .chain(&attribute.force_values)
                    .chain(&attribute.create_values)
                    .map(String::as_str),
            );
        }
        expressions.extend(self.identifier.expression.as_deref());
        expressions
    }

    pub fn validate(&self) -> SyncResult<()> {
        if let Some(allowed) = &self.write_attributes {
            if allowed.iter().any(|name| name.trim().is_empty()) {
                return Err(SyncError::configuration(
                    "write_attributes entries must not be empty",
                ));
            }
        }
        for (name, attribute) in &self.attributes {
            if name.trim().is_empty() {
                return Err(SyncError::configuration("attribute policy with empty name"));
            }
            let mut expressions = attribute
                .default_values
                .iter()
                .chain(&attribute.force_values)
                .chain(&attribute.create_values);
            if expressions.any(|e| e.trim().is_empty()) {
                return Err(SyncError::configuration(format!(
                    "attribute '{name}' has an empty value expression"
                )));
            }
        }
        if let Some(base) = &self.identifier.base {
            if base.starts_with(',') || base.ends_with(',') {
                return Err(SyncError::configuration(format!(
                    "identifier base '{base}' must not start or end with a comma"
                )));
            }
        }
        if let Some(attr) = &self.identifier.unique_attribute {
            if attr.trim().is_empty() {
                return Err(SyncError::configuration("identifier unique_attribute is empty"));
            }
        }
        Ok(())
    }
}

fn dedup_names<I>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|n| eq_folded(n, &name)) {
            out.push(name);
        }
    }
    out
}
