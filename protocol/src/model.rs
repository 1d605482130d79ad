//! `GET /v1/models` response types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single entry in a `/v1/models` listing, OpenAI's `model` object shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub owned_by: &'static str,
    pub permission: Vec<Value>,
    pub root: String,
    pub parent: Option<String>,
}

impl ModelCard {
    pub fn new(name: impl Into<String>, created: i64) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            object: "model",
            created,
            owned_by: "llamaapi",
            permission: Vec::new(),
            root: name,
            parent: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

impl ModelsResponse {
    pub fn new(data: Vec<ModelCard>) -> Self {
        Self {
            object: "list",
            data,
        }
    }
}
