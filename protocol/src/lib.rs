//! OpenAI-compatible wire types shared between the worker and the balancer.
//!
//! Kept in its own crate so the balancer can depend on the request/response
//! shapes without pulling in inference code.

pub mod completion;
pub mod envelope;
pub mod messages;
pub mod model;

pub use completion::{ChatCompletionRequest, ResponseFormat, StructuredChatCompletionRequest};
pub use envelope::{ChatCompletionResponse, Choice, PromptTokensDetails, ResponseMessage, Usage};
pub use messages::{ChatMessage, Role};
pub use model::{ModelCard, ModelsResponse};
