//! Chat completion request bodies for the two worker endpoints.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::messages::ChatMessage;

pub const DEFAULT_MAX_TOKENS: u32 = 10_000;
pub const MAX_TOKENS_RANGE: (u32, u32) = (1, 32_768);
pub const DEFAULT_TEMPERATURE: f32 = 0.0;
pub const TEMPERATURE_RANGE: (f32, f32) = (0.0, 2.0);
pub const DEFAULT_TOP_P: f32 = 0.9;
pub const TOP_P_RANGE: (f32, f32) = (0.0, 1.0);

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_top_p() -> f32 {
    DEFAULT_TOP_P
}

/// A validation failure for a sampling parameter outside its declared range.
#[derive(Debug, thiserror::Error)]
#[error("{field} must be within [{min}, {max}], got {got}")]
pub struct OutOfRange {
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
    pub got: f64,
}

/// `POST /v1/chat/completions` request body.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), OutOfRange> {
        validate_bounds(self.max_tokens, self.temperature, self.top_p)
    }
}

/// `POST /v1/beta/chat/completions/parse` request body — a superset of
/// [`ChatCompletionRequest`] that additionally accepts a schema-constrained
/// `response_format` and a `seed` used only for the system fingerprint.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub response_format: Option<ResponseFormat>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub seed: i64,
}

impl StructuredChatCompletionRequest {
    pub fn validate(&self) -> Result<(), OutOfRange> {
        validate_bounds(self.max_tokens, self.temperature, self.top_p)
    }
}

fn validate_bounds(max_tokens: u32, temperature: f32, top_p: f32) -> Result<(), OutOfRange> {
    let (lo, hi) = MAX_TOKENS_RANGE;
    if max_tokens < lo || max_tokens > hi {
        return Err(OutOfRange {
            field: "max_tokens",
            min: lo as f64,
            max: hi as f64,
            got: max_tokens as f64,
        });
    }
    let (lo, hi) = TEMPERATURE_RANGE;
    if temperature < lo || temperature > hi {
        return Err(OutOfRange {
            field: "temperature",
            min: lo as f64,
            max: hi as f64,
            got: temperature as f64,
        });
    }
    let (lo, hi) = TOP_P_RANGE;
    if top_p < lo || top_p > hi {
        return Err(OutOfRange {
            field: "top_p",
            min: lo as f64,
            max: hi as f64,
            got: top_p as f64,
        });
    }
    Ok(())
}

/// The three shapes `response_format` can take on the wire.
///
/// Modeled as a sum type rather than matched ad hoc at the call site: only
/// `JsonSchema` ever reaches the grammar compiler, everything else is inert
/// as far as structured output is concerned.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseFormat {
    /// `{"type": "json_schema", "json_schema": {"schema": {...}, ...}}` — the
    /// inner `schema` value is what the grammar compiler consumes.
    JsonSchema(Value),
    /// Any other shape (e.g. `{"type": "text"}` or a client-specific
    /// extension) — passed through untouched, never compiled to a grammar.
    Opaque(Value),
}

impl ResponseFormat {
    /// The schema object under `json_schema.schema`, if this is that variant.
    pub fn schema(&self) -> Option<&Value> {
        match self {
            ResponseFormat::JsonSchema(v) => v.pointer("/json_schema/schema"),
            ResponseFormat::Opaque(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for ResponseFormat {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let has_schema = value
            .get("json_schema")
            .and_then(|js| js.get("schema"))
            .is_some();
        if has_schema {
            Ok(ResponseFormat::JsonSchema(value))
        } else {
            Ok(ResponseFormat::Opaque(value))
        }
    }
}

/// Helper used by tests and CLI tools that want to build a schema-bearing
/// `response_format` without hand-writing the JSON pointer shape.
pub fn json_schema_response_format(schema: Value) -> ResponseFormat {
    ResponseFormat::JsonSchema(serde_json::json!({
        "type": "json_schema",
        "json_schema": { "schema": schema }
    }))
}
