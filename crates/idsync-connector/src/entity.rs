//! In-memory record representation shared by both sides of a synchronization.
//!
//! An [`Entity`] is one record of one store. Attribute names are matched
//! case-insensitively, and an attribute never holds the same value twice.

use std::collections::BTreeMap;
use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Case-folded form of an attribute name or identifier.
///
/// Uses Unicode lowercase mapping, so `ÉLODIE` and `élodie` fold alike.
#[must_use]
pub fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Compare two names or identifiers ignoring case.
#[must_use]
pub fn eq_folded(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// Stable cross-side identifier correlating a source entity with its
/// destination counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PivotId(String);

impl PivotId {
    /// Create a pivot identifier from any string-like value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Get the raw pivot value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PivotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PivotId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PivotId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Ancillary attributes a store returns with each pivot to disambiguate a fetch.
pub type PivotAttributes = BTreeMap<String, String>;

/// A pivot as listed by a store: the identifier plus its ancillary bag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pivot {
    pub id: PivotId,
    #[serde(default)]
    pub attributes: PivotAttributes,
}

impl Pivot {
    /// Create a pivot without ancillary attributes.
    pub fn new(id: impl Into<PivotId>) -> Self {
        Self {
            id: id.into(),
            attributes: PivotAttributes::new(),
        }
    }

    /// Attach an ancillary attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Look up an ancillary attribute, ignoring case of the name.
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| eq_folded(key, name))
            .map(|(_, value)| value.as_str())
    }
}

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    String(String),
    Integer(i64),
    Boolean(bool),
    Binary(Vec<u8>),
}

impl AttributeValue {
    /// Canonical string form used for value comparison.
    ///
    /// Binary values are rendered as standard base64.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.to_string()
    }

    /// Get the string value, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// An empty string or empty byte sequence counts as no value.
    pub fn is_empty(&self) -> bool {
        match self {
            AttributeValue::String(s) => s.is_empty(),
            AttributeValue::Binary(b) => b.is_empty(),
            AttributeValue::Integer(_) | AttributeValue::Boolean(_) => false,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Boolean(b) => write!(f, "{b}"),
            AttributeValue::Binary(bytes) => f.write_str(&BASE64.encode(bytes)),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<i64> for AttributeValue {
    fn from(i: i64) -> Self {
        AttributeValue::Integer(i)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Boolean(b)
    }
}

impl From<Vec<u8>> for AttributeValue {
    fn from(bytes: Vec<u8>) -> Self {
        AttributeValue::Binary(bytes)
    }
}

/// A named, deduplicated set of values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    name: String,
    values: Vec<AttributeValue>,
}

impl Attribute {
    /// Create an attribute with no values.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            values: Vec::new(),
        }
    }

    /// Create an attribute from a list of values, dropping duplicates.
    pub fn with_values<V, I>(name: impl Into<String>, values: I) -> Self
    where
        V: Into<AttributeValue>,
        I: IntoIterator<Item = V>,
    {
        let mut attribute = Self::new(name);
        for value in values {
            attribute.add_value(value);
        }
        attribute
    }

    /// Display name of the attribute.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Case-insensitive name comparison.
    pub fn has_name(&self, name: &str) -> bool {
        eq_folded(&self.name, name)
    }

    pub fn values(&self) -> &[AttributeValue] {
        &self.values
    }

    /// Canonical strings of all values, in insertion order.
    pub fn string_values(&self) -> Vec<String> {
        self.values.iter().map(AttributeValue::canonical).collect()
    }

    /// First value in canonical form.
    pub fn first_value(&self) -> Option<String> {
        self.values.first().map(AttributeValue::canonical)
    }

    /// Add a value unless an equal one is already present.
    ///
    /// Returns `true` if the value was added.
    pub fn add_value(&mut self, value: impl Into<AttributeValue>) -> bool {
        let value = value.into();
        let canonical = value.canonical();
        if self.values.iter().any(|v| v.canonical() == canonical) {
            return false;
        }
        self.values.push(value);
        true
    }

    /// Remove every value equal to `value`.
    pub fn remove_value(&mut self, value: &AttributeValue) -> bool {
        let canonical = value.canonical();
        let before = self.values.len();
        self.values.retain(|v| v.canonical() != canonical);
        before != self.values.len()
    }

    /// True when the attribute carries no non-empty value.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(AttributeValue::is_empty)
    }
}

/// One record on one side of a synchronization.
///
/// Attributes are keyed by lower-cased name; the original casing is kept in
/// each [`Attribute`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_identifier: Option<String>,
    #[serde(default)]
    attributes: BTreeMap<String, Attribute>,
}

impl Entity {
    /// Create an entity with a known identifier.
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: Some(identifier.into()),
            ..Self::default()
        }
    }

    /// Create an entity without identifier (e.g. a database row).
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn set_identifier(&mut self, identifier: impl Into<String>) {
        self.identifier = Some(identifier.into());
    }

    pub fn new_identifier(&self) -> Option<&str> {
        self.new_identifier.as_deref()
    }

    pub fn set_new_identifier(&mut self, identifier: Option<String>) {
        self.new_identifier = identifier;
    }

    /// Builder-style attribute setter, mostly for tests and fixtures.
    #[must_use]
    pub fn with<V, I>(mut self, name: &str, values: I) -> Self
    where
        V: Into<AttributeValue>,
        I: IntoIterator<Item = V>,
    {
        self.put(name, values);
        self
    }

    /// Replace all values of an attribute.
    pub fn put<V, I>(&mut self, name: &str, values: I)
    where
        V: Into<AttributeValue>,
        I: IntoIterator<Item = V>,
    {
        self.set_attribute(Attribute::with_values(name, values));
    }

    /// Insert or replace an attribute.
    pub fn set_attribute(&mut self, attribute: Attribute) {
        self.attributes
            .insert(fold_case(attribute.name()), attribute);
    }

    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(&fold_case(name))
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut Attribute> {
        self.attributes.get_mut(&fold_case(name))
    }

    /// Get or create an attribute for in-place mutation.
    pub fn attribute_entry(&mut self, name: &str) -> &mut Attribute {
        self.attributes
            .entry(fold_case(name))
            .or_insert_with(|| Attribute::new(name))
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(&fold_case(name))
    }

    /// Canonical string values of an attribute; empty when absent.
    pub fn values(&self, name: &str) -> Vec<String> {
        self.attribute(name)
            .map(Attribute::string_values)
            .unwrap_or_default()
    }

    /// First canonical value of an attribute.
    pub fn first_value(&self, name: &str) -> Option<String> {
        self.attribute(name).and_then(Attribute::first_value)
    }

    /// Display names of all attributes.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.values().map(Attribute::name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.values()
    }
}
