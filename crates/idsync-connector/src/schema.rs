//! Static entity schemas.
//!
//! Each entity kind declares a fixed list of `(attribute name, data type)`
//! pairs. Raw records are mapped into [`Entity`] values by an explicit
//! function that coerces every declared field and rejects the rest.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::{eq_folded, Attribute, AttributeValue, Entity};
use crate::error::{ConnectorError, ConnectorResult};

/// Data type of a schema attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeDataType {
    /// String/text value.
    #[default]
    String,
    /// Integer value.
    Integer,
    /// Boolean value.
    Boolean,
    /// Binary data, base64 in raw records.
    Binary,
}

impl AttributeDataType {
    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeDataType::String => "string",
            AttributeDataType::Integer => "integer",
            AttributeDataType::Boolean => "boolean",
            AttributeDataType::Binary => "binary",
        }
    }

    /// Coerce one raw JSON scalar to this type.
    fn coerce(&self, attribute: &str, raw: &Value) -> ConnectorResult<AttributeValue> {
        let type_error = |message: &str| ConnectorError::AttributeType {
            attribute: attribute.to_string(),
            expected: self.as_str().to_string(),
            message: message.to_string(),
        };

        match (self, raw) {
            (AttributeDataType::String, Value::String(s)) => Ok(AttributeValue::String(s.clone())),
            (AttributeDataType::String, Value::Number(n)) => Ok(AttributeValue::String(n.to_string())),
            (AttributeDataType::String, Value::Bool(b)) => Ok(AttributeValue::String(b.to_string())),
            (AttributeDataType::Integer, Value::Number(n)) => n
                .as_i64()
                .map(AttributeValue::Integer)
                .ok_or_else(|| type_error("not a 64-bit integer")),
            (AttributeDataType::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(AttributeValue::Integer)
                .map_err(|e| type_error(&e.to_string())),
            (AttributeDataType::Boolean, Value::Bool(b)) => Ok(AttributeValue::Boolean(*b)),
            (AttributeDataType::Boolean, Value::String(s)) => {
                match s.trim().to_ascii_lowercase().as_str() {
                    "true" => Ok(AttributeValue::Boolean(true)),
                    "false" => Ok(AttributeValue::Boolean(false)),
                    _ => Err(type_error("expected true or false")),
                }
            }
            (AttributeDataType::Binary, Value::String(s)) => BASE64
                .decode(s.as_bytes())
                .map(AttributeValue::Binary)
                .map_err(|e| type_error(&e.to_string())),
            _ => Err(type_error("unsupported JSON value")),
        }
    }
}

/// One declared attribute of an entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAttribute {
    pub name: String,
    #[serde(rename = "type", default)]
    pub data_type: AttributeDataType,
}

/// Fixed attribute list for one entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Entity kind, e.g. `person` or `group`.
    pub name: String,

    /// Record field holding the entity identifier, if the store has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier_field: Option<String>,

    #[serde(default)]
    pub attributes: Vec<SchemaAttribute>,
}

impl EntitySchema {
    /// Create an empty schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier_field: None,
            attributes: Vec::new(),
        }
    }

    /// Set the identifier field.
    #[must_use]
    pub fn with_identifier_field(mut self, field: impl Into<String>) -> Self {
        self.identifier_field = Some(field.into());
        self
    }

    /// Declare an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, data_type: AttributeDataType) -> Self {
        self.attributes.push(SchemaAttribute {
            name: name.into(),
            data_type,
        });
        self
    }

    /// Find a declared attribute, ignoring case.
    pub fn attribute(&self, name: &str) -> Option<&SchemaAttribute> {
        self.attributes
            .iter()
            .find(|a| eq_folded(&a.name, name))
    }

    fn is_identifier_field(&self, field: &str) -> bool {
        self.identifier_field
            .as_deref()
            .is_some_and(|id| eq_folded(id, field))
    }

    /// Map a raw record (a JSON object) into an entity.
    ///
    /// Arrays become multi-valued attributes; `null` fields are skipped.
    pub fn map_record(&self, record: &Value) -> ConnectorResult<Entity> {
        let Value::Object(fields) = record else {
            return Err(ConnectorError::invalid_data(format!(
                "{} record must be a JSON object",
                self.name
            )));
        };

        let mut entity = Entity::anonymous();
        for (field, raw) in fields {
            if self.is_identifier_field(field) {
                match raw {
                    Value::String(id) if !id.is_empty() => entity.set_identifier(id.clone()),
                    Value::Null => {}
                    _ => {
                        return Err(ConnectorError::invalid_data(format!(
                            "identifier field '{field}' must be a non-empty string"
                        )))
                    }
                }
                continue;
            }

            let declared = self
                .attribute(field)
                .ok_or_else(|| ConnectorError::AttributeNotDeclared {
                    attribute: field.clone(),
                    entity: self.name.clone(),
                })?;

            let mut attribute = Attribute::new(declared.name.clone());
            match raw {
                Value::Null => continue,
                Value::Array(items) => {
                    for item in items.iter().filter(|i| !i.is_null()) {
                        attribute.add_value(declared.data_type.coerce(field, item)?);
                    }
                }
                scalar => {
                    attribute.add_value(declared.data_type.coerce(field, scalar)?);
                }
            }
            entity.set_attribute(attribute);
        }

        Ok(entity)
    }

    /// Inverse of [`map_record`](Self::map_record), used when saving stores.
    pub fn to_record(&self, entity: &Entity) -> Value {
        let mut fields = Map::new();
        if let (Some(field), Some(id)) = (&self.identifier_field, entity.identifier()) {
            fields.insert(field.clone(), Value::String(id.to_string()));
        }

        for attribute in entity.attributes() {
            let name = self
                .attribute(attribute.name())
                .map_or_else(|| attribute.name().to_string(), |a| a.name.clone());
            let mut values: Vec<Value> = attribute.values().iter().map(json_value).collect();
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            fields.insert(name, value);
        }

        Value::Object(fields)
    }
}

fn json_value(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::String(s) => Value::String(s.clone()),
        AttributeValue::Integer(i) => Value::from(*i),
        AttributeValue::Boolean(b) => Value::Bool(*b),
        AttributeValue::Binary(bytes) => Value::String(BASE64.encode(bytes)),
    }
}
