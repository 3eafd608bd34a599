// src/schema.rs
// Schema documents for structured generation and conformance checks

use crate::error::Error;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Errors raised for schema documents before any generation happens
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// No schema document was supplied
    #[error("Schema document must not be empty")]
    Empty,

    /// The document is not valid JSON
    #[error("Malformed schema document: {0}")]
    Malformed(String),

    /// The document is JSON but breaks the schema vocabulary rules
    #[error("Invalid schema at {path}: {message}")]
    Invalid {
        /// Location of the offending node, e.g. `$.properties.tags.items`
        path: String,
        /// What is wrong with it
        message: String,
    },

    /// The model rejected a schema feature it cannot generate
    #[error("Unsupported schema: {0}")]
    Unsupported(String),
}

/// Value types understood by the schema vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// One node of a generation schema
///
/// This is the dynamic generation schema vocabulary the model understands:
/// objects are lists of named properties, arrays carry element bounds and
/// strings may be restricted to a fixed set of choices.
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaNode {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SchemaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Vec<SchemaProperty>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum_elements: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_elements: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_of: Option<Vec<String>>,
}

/// A named property of an object node
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SchemaProperty {
    pub name: String,
    pub schema: SchemaNode,
}

impl SchemaNode {
    /// The node's type, inferring `object` from `properties`, `array` from
    /// `items`, and `string` otherwise
    pub fn resolved_type(&self) -> SchemaType {
        match self.kind {
            Some(kind) => kind,
            None if self.properties.is_some() => SchemaType::Object,
            None if self.items.is_some() => SchemaType::Array,
            None => SchemaType::String,
        }
    }

    fn check(&self, path: &str) -> Result<(), SchemaError> {
        let invalid = |message: &str| SchemaError::Invalid {
            path: path.to_string(),
            message: message.to_string(),
        };
        let kind = self.resolved_type();

        if self.properties.is_some() && kind != SchemaType::Object {
            return Err(invalid("'properties' requires type 'object'"));
        }
        if self.items.is_some() && kind != SchemaType::Array {
            return Err(invalid("'items' requires type 'array'"));
        }
        if (self.minimum_elements.is_some() || self.maximum_elements.is_some())
            && kind != SchemaType::Array
        {
            return Err(invalid("element bounds require type 'array'"));
        }
        if self.any_of.is_some() && kind != SchemaType::String {
            return Err(invalid("'anyOf' requires type 'string'"));
        }

        match kind {
            SchemaType::Object => {
                let properties = match &self.properties {
                    Some(properties) if !properties.is_empty() => properties,
                    _ => return Err(invalid("object schema requires at least one property")),
                };
                let mut seen = HashSet::new();
                for property in properties {
                    if property.name.is_empty() {
                        return Err(invalid("property names must not be empty"));
                    }
                    if !seen.insert(property.name.as_str()) {
                        return Err(invalid(&format!(
                            "duplicate property '{}'",
                            property.name
                        )));
                    }
                    property
                        .schema
                        .check(&format!("{path}.properties.{}", property.name))?;
                }
            }
            SchemaType::Array => {
                let Some(items) = &self.items else {
                    return Err(invalid("array schema requires 'items'"));
                };
                if let (Some(min), Some(max)) = (self.minimum_elements, self.maximum_elements) {
                    if min > max {
                        return Err(invalid("'minimumElements' exceeds 'maximumElements'"));
                    }
                }
                items.check(&format!("{path}.items"))?;
            }
            SchemaType::String => {
                if matches!(&self.any_of, Some(choices) if choices.is_empty()) {
                    return Err(invalid("'anyOf' must list at least one choice"));
                }
            }
            SchemaType::Integer | SchemaType::Number | SchemaType::Boolean => {}
        }
        Ok(())
    }

    /// Equivalent JSON Schema (draft 2020-12) used for conformance checks
    ///
    /// Every property is required and no additional properties are allowed.
    fn to_json_schema(&self) -> Value {
        let mut out = Map::new();
        if let Some(description) = &self.description {
            out.insert("description".into(), json!(description));
        }
        match self.resolved_type() {
            SchemaType::String => {
                out.insert("type".into(), json!("string"));
                if let Some(choices) = &self.any_of {
                    out.insert("enum".into(), json!(choices));
                }
            }
            SchemaType::Integer => {
                out.insert("type".into(), json!("integer"));
            }
            SchemaType::Number => {
                out.insert("type".into(), json!("number"));
            }
            SchemaType::Boolean => {
                out.insert("type".into(), json!("boolean"));
            }
            SchemaType::Array => {
                out.insert("type".into(), json!("array"));
                if let Some(items) = &self.items {
                    out.insert("items".into(), items.to_json_schema());
                }
                if let Some(min) = self.minimum_elements {
                    out.insert("minItems".into(), json!(min));
                }
                if let Some(max) = self.maximum_elements {
                    out.insert("maxItems".into(), json!(max));
                }
            }
            SchemaType::Object => {
                let properties = self.properties.as_deref().unwrap_or_default();
                let mut shape = Map::new();
                for property in properties {
                    shape.insert(property.name.clone(), property.schema.to_json_schema());
                }
                let required: Vec<&str> = properties.iter().map(|p| p.name.as_str()).collect();
                out.insert("type".into(), json!("object"));
                out.insert("properties".into(), Value::Object(shape));
                out.insert("required".into(), json!(required));
                out.insert("additionalProperties".into(), json!(false));
            }
        }
        Value::Object(out)
    }
}

/// A validated schema document
///
/// Keeps the caller's original text (handed to the model as-is) next to the
/// parsed tree and the JSON Schema used to check generated output. The
/// validator is compiled once and shared by clones.
///
/// # Examples
///
/// ```
/// # use fm_session::Schema;
/// let schema = Schema::parse(r#"{
///     "name": "Answer",
///     "properties": [
///         {"name": "city", "schema": {"type": "string"}},
///         {"name": "population", "schema": {"type": "integer"}}
///     ]
/// }"#).unwrap();
///
/// assert!(schema.validate(r#"{"city": "Lyon", "population": 522250}"#).is_ok());
/// assert!(schema.validate(r#"{"city": "Lyon"}"#).is_err());
/// ```
#[derive(Clone)]
pub struct Schema {
    raw: String,
    document: Value,
    root: SchemaNode,
    json_schema: Value,
    validator: Arc<jsonschema::Validator>,
}

impl Schema {
    /// Parses and checks a schema document
    ///
    /// # Errors
    ///
    /// * `SchemaError::Empty` - the document is empty or whitespace
    /// * `SchemaError::Malformed` - the document is not valid JSON
    /// * `SchemaError::Invalid` - the document breaks the vocabulary rules
    pub fn parse(document: &str) -> Result<Self, SchemaError> {
        if document.trim().is_empty() {
            return Err(SchemaError::Empty);
        }
        let value: Value =
            serde_json::from_str(document).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        Self::from_document(document.to_string(), value)
    }

    /// Builds a schema from any serializable value
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, SchemaError> {
        let document =
            serde_json::to_value(value).map_err(|e| SchemaError::Malformed(e.to_string()))?;
        let raw = document.to_string();
        Self::from_document(raw, document)
    }

    fn from_document(raw: String, document: Value) -> Result<Self, SchemaError> {
        if !document.is_object() {
            return Err(SchemaError::Invalid {
                path: "$".into(),
                message: "schema must be a JSON object".into(),
            });
        }
        let root: SchemaNode =
            serde_json::from_value(document.clone()).map_err(|e| SchemaError::Invalid {
                path: "$".into(),
                message: e.to_string(),
            })?;
        root.check("$")?;

        let json_schema = root.to_json_schema();
        let validator = Arc::new(compile(&json_schema)?);

        Ok(Self {
            raw,
            document,
            root,
            json_schema,
            validator,
        })
    }

    /// The schema text exactly as supplied
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The parsed root node
    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// The JSON Schema generated output is checked against
    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    /// Checks generated text against the schema
    ///
    /// Returns the parsed JSON value when the text conforms.
    ///
    /// # Errors
    ///
    /// `Error::SchemaConformance` if the text is not JSON or does not match.
    pub fn validate(&self, output: &str) -> Result<Value, Error> {
        let value: Value = serde_json::from_str(output)
            .map_err(|e| Error::SchemaConformance(format!("output is not valid JSON: {e}")))?;

        let problems: Vec<String> = self
            .validator
            .iter_errors(&value)
            .map(|e| e.to_string())
            .collect();
        if !problems.is_empty() {
            return Err(Error::SchemaConformance(problems.join("; ")));
        }
        Ok(value)
    }
}

fn compile(json_schema: &Value) -> Result<jsonschema::Validator, SchemaError> {
    jsonschema::draft202012::new(json_schema).map_err(|e| SchemaError::Invalid {
        path: "$".into(),
        message: format!("cannot compile schema: {e}"),
    })
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.document == other.document && self.raw == other.raw
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("raw", &self.raw)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl FromStr for Schema {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for Schema {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.document.serialize(serializer)
    }
}
