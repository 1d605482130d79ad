//! The JSON-Schema-lite subset the grammar compiler understands.
//!
//! Parsing here is deliberately narrow: anything outside the recognised
//! shapes is rejected with [`SchemaError`] rather than guessed at, so the
//! worker's fallback-to-unconstrained path only ever triggers on genuinely
//! unsupported schemas.

use serde_json::Value;

use crate::error::SchemaError;

/// A single object property or array item type.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    String { enum_values: Option<Vec<String>> },
    Number,
    Boolean,
    Array(ArrayItem),
    /// One level of nested `"type": "object"` — rendered as `{}` regardless
    /// of its own `properties`.
    NestedObject,
}

/// Array items are restricted to scalar string/number (optionally enum'd
/// string) — the only shapes the compiler has helper rules for.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayItem {
    String,
    StringEnum(Vec<String>),
    Number,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Object(Vec<(String, Leaf)>),
    Array(ArrayItem),
}

pub fn parse(value: &Value) -> Result<Schema, SchemaError> {
    let top_type = value.get("type").and_then(Value::as_str).unwrap_or("object");
    match top_type {
        "object" => parse_object(value),
        "array" => Ok(Schema::Array(parse_array_item(value)?)),
        other => Err(SchemaError::UnsupportedTopLevel(other.to_string())),
    }
}

fn parse_object(value: &Value) -> Result<Schema, SchemaError> {
    let Some(properties) = value.get("properties").and_then(Value::as_object) else {
        return Err(SchemaError::MissingProperties);
    };
    let mut fields = Vec::with_capacity(properties.len());
    for (key, prop_schema) in properties {
        fields.push((key.clone(), parse_leaf(prop_schema)?));
    }
    Ok(Schema::Object(fields))
}

fn parse_leaf(prop_schema: &Value) -> Result<Leaf, SchemaError> {
    let prop_type = prop_schema.get("type").and_then(Value::as_str).unwrap_or("string");
    match prop_type {
        "string" => Ok(Leaf::String {
            enum_values: parse_enum(prop_schema)?,
        }),
        "number" | "integer" => Ok(Leaf::Number),
        "boolean" => Ok(Leaf::Boolean),
        "array" => Ok(Leaf::Array(parse_array_item(prop_schema)?)),
        "object" => Ok(Leaf::NestedObject),
        other => Err(SchemaError::UnsupportedPropertyType(other.to_string())),
    }
}

fn parse_array_item(schema: &Value) -> Result<ArrayItem, SchemaError> {
    let Some(items) = schema.get("items") else {
        return Err(SchemaError::MissingItems);
    };
    let item_type = items.get("type").and_then(Value::as_str).unwrap_or("string");
    match item_type {
        "string" => match parse_enum(items)? {
            Some(values) => Ok(ArrayItem::StringEnum(values)),
            None => Ok(ArrayItem::String),
        },
        "number" | "integer" => Ok(ArrayItem::Number),
        other => Err(SchemaError::UnsupportedPropertyType(format!("array of {other}"))),
    }
}

fn parse_enum(schema: &Value) -> Result<Option<Vec<String>>, SchemaError> {
    let Some(raw) = schema.get("enum") else {
        return Ok(None);
    };
    let Some(items) = raw.as_array() else {
        return Err(SchemaError::EmptyOrInvalidEnum);
    };
    if items.is_empty() {
        return Err(SchemaError::EmptyOrInvalidEnum);
    }
    let mut values = Vec::with_capacity(items.len());
    for item in items {
        match item.as_str() {
            Some(s) => values.push(s.to_string()),
            None => return Err(SchemaError::EmptyOrInvalidEnum),
        }
    }
    Ok(Some(values))
}
