//! LLM transport boundary (§6): a single Anthropic client rather than the
//! teacher's multi-provider registry — this crate speaks to one model
//! family, so `ProviderRegistry`/`LLMManager` would be an abstraction with
//! exactly one implementation.

pub mod anthropic;
pub mod types;

pub use anthropic::AnthropicClient;
pub use types::{
    classify_error_text, LlmError, LlmRequest, LlmResponse, LlmResult, StopReason, ThinkingConfig,
    OAUTH_EXPIRED_SENTINEL,
};
