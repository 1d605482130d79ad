//! Response envelope shared by both completion endpoints.
//!
//! `system_fingerprint` and the structured-output fields (`parsed`,
//! `refusal`, `prompt_tokens_details`) are only populated by the
//! `/v1/beta/chat/completions/parse` path; the plain endpoint leaves them
//! `None` and they are dropped from the wire by `skip_serializing_none`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    pub role: &'static str,
    pub content: String,
    pub parsed: Option<Value>,
    pub refusal: Option<Value>,
}

impl ResponseMessage {
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant",
            content: content.into(),
            parsed: None,
            refusal: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: &'static str,
}

impl Choice {
    pub fn new(message: ResponseMessage) -> Self {
        Self {
            index: 0,
            message,
            finish_reason: "stop",
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTokensDetails {
    pub cached_tokens: u32,
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub prompt_tokens_details: Option<PromptTokensDetails>,
}

impl Usage {
    pub fn plain(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            prompt_tokens_details: None,
        }
    }

    pub fn structured(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            prompt_tokens_details: Some(PromptTokensDetails { cached_tokens: 0 }),
        }
    }
}

#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

impl ChatCompletionResponse {
    pub fn new(id: String, created: i64, model: String, choice: Choice, usage: Usage) -> Self {
        Self {
            id,
            object: "chat.completion",
            created,
            model,
            system_fingerprint: None,
            choices: vec![choice],
            usage,
        }
    }

    pub fn with_fingerprint(mut self, fingerprint: String) -> Self {
        self.system_fingerprint = Some(fingerprint);
        self
    }
}
