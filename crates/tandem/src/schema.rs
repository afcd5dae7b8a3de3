use crate::error::ValidationError;
use crate::event::CommitEvent;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// Declared shape of an event kind's payload
///
/// Schemas state what must hold, not an exhaustive shape: objects accept
/// undeclared extra fields, and `Any` accepts every JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadSchema {
    Any,
    Null,
    Bool,
    Number,
    /// A JSON number with zero fractional part
    Integer,
    String,
    Array(Box<PayloadSchema>),
    Object(ObjectSchema),
}

/// Field table for [`PayloadSchema::Object`]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ObjectSchema {
    fields: BTreeMap<String, Field>,
}

#[derive(Debug, Clone, PartialEq)]
struct Field {
    schema: PayloadSchema,
    required: bool,
}

impl ObjectSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a required field
    pub fn field(mut self, name: impl Into<String>, schema: PayloadSchema) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                schema,
                required: true,
            },
        );
        self
    }

    /// Declare a field that may be absent
    pub fn optional_field(mut self, name: impl Into<String>, schema: PayloadSchema) -> Self {
        self.fields.insert(
            name.into(),
            Field {
                schema,
                required: false,
            },
        );
        self
    }
}

impl From<ObjectSchema> for PayloadSchema {
    fn from(schema: ObjectSchema) -> Self {
        PayloadSchema::Object(schema)
    }
}

/// Why a payload failed validation against its declared schema
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaViolation {
    #[error("expected {expected}, got {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("expected integer, got fractional number")]
    FractionalNumber,
    #[error("missing required field `{0}`")]
    MissingField(String),
    #[error("field `{field}`: {violation}")]
    Field {
        field: String,
        violation: Box<SchemaViolation>,
    },
    #[error("element {index}: {violation}")]
    Element {
        index: usize,
        violation: Box<SchemaViolation>,
    },
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl PayloadSchema {
    fn expected(&self) -> &'static str {
        match self {
            PayloadSchema::Any => "any",
            PayloadSchema::Null => "null",
            PayloadSchema::Bool => "bool",
            PayloadSchema::Number => "number",
            PayloadSchema::Integer => "integer",
            PayloadSchema::String => "string",
            PayloadSchema::Array(_) => "array",
            PayloadSchema::Object(_) => "object",
        }
    }

    /// Check a payload against this schema
    pub fn validate(&self, value: &Value) -> Result<(), SchemaViolation> {
        let mismatch = || SchemaViolation::TypeMismatch {
            expected: self.expected(),
            actual: json_type(value),
        };

        match self {
            PayloadSchema::Any => Ok(()),
            PayloadSchema::Null if value.is_null() => Ok(()),
            PayloadSchema::Bool if value.is_boolean() => Ok(()),
            PayloadSchema::Number if value.is_number() => Ok(()),
            PayloadSchema::String if value.is_string() => Ok(()),
            PayloadSchema::Null | PayloadSchema::Bool | PayloadSchema::Number
            | PayloadSchema::String => Err(mismatch()),
            PayloadSchema::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => Ok(()),
                Value::Number(_) => Err(SchemaViolation::FractionalNumber),
                _ => Err(mismatch()),
            },
            PayloadSchema::Array(inner) => {
                let items = value.as_array().ok_or_else(mismatch)?;
                for (index, item) in items.iter().enumerate() {
                    inner
                        .validate(item)
                        .map_err(|violation| SchemaViolation::Element {
                            index,
                            violation: Box::new(violation),
                        })?;
                }
                Ok(())
            }
            PayloadSchema::Object(object) => {
                let map = value.as_object().ok_or_else(mismatch)?;
                for (name, field) in &object.fields {
                    match map.get(name) {
                        Some(item) => {
                            field
                                .schema
                                .validate(item)
                                .map_err(|violation| SchemaViolation::Field {
                                    field: name.clone(),
                                    violation: Box::new(violation),
                                })?
                        }
                        None if field.required => {
                            return Err(SchemaViolation::MissingField(name.clone()))
                        }
                        None => {}
                    }
                }
                Ok(())
            }
        }
    }
}

/// Immutable map from event kind name to payload schema
///
/// Fixed at replica construction; `commit` validates every submitted event
/// against it before anything is enqueued.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    schemas: HashMap<String, PayloadSchema>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, schema: PayloadSchema) {
        self.schemas.insert(name, schema);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&PayloadSchema> {
        self.schemas.get(name)
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PayloadSchema)> {
        self.schemas.iter()
    }

    /// Validate a submitted event: known kind, conforming payload
    pub fn validate(&self, event: &CommitEvent) -> Result<(), ValidationError> {
        let schema = self
            .schemas
            .get(&event.name)
            .ok_or_else(|| ValidationError::UnknownKind(event.name.clone()))?;

        schema
            .validate(&event.payload)
            .map_err(|violation| ValidationError::Payload {
                kind: event.name.clone(),
                violation,
            })
    }
}
