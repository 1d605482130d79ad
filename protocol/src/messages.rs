//! Chat message types shared by both completion endpoints.

use serde::{Deserialize, Serialize};

/// Role of a single message in a chat completion request.
///
/// `Assistant` is accepted on the wire for round-trip compatibility with
/// clients that echo prior turns back, but the worker's prompt composer
/// ignores it — only `system` and `user` content make it into the flat
/// prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single turn of a chat completion request. Ordering in the `messages`
/// array is preserved end to end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}
