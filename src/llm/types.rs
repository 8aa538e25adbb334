//! The LLM transport contract (§6): request/response shapes exchanged with
//! the external LLM HTTP client. Messages reuse `crate::types::Message` so
//! the wire format and the Execution State's in-memory format are the same
//! value — the driver never translates between two message types.

use thiserror::Error;

use crate::types::{Message, Usage};

#[derive(Debug, Clone, Copy)]
pub struct ThinkingConfig {
    pub enabled: bool,
    pub budget_tokens: u32,
    pub interleaved: bool,
}

/// `{model, system_prompt, messages[], tools[], max_tokens,
/// max_thinking_tokens, temperature, enable_thinking,
/// enable_interleaved_thinking}` (§6). Cache markers are attached directly
/// on `messages`' content blocks by the caller (§4.5 step 1) rather than
/// threaded through here, matching the wire format's per-block placement.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub model: String,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    /// Tool catalog entries, already shaped as `{name, description,
    /// input_schema}` by `ToolRegistry::api_definitions()`.
    pub tools: Vec<serde_json::Value>,
    pub max_tokens: u32,
    pub thinking: Option<ThinkingConfig>,
    pub temperature: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    Other,
}

impl StopReason {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            _ => StopReason::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub message: Message,
    pub stop_reason: StopReason,
    pub usage: Usage,
}

/// Error taxonomy for the transport boundary (§7): only the three kinds the
/// driver itself must branch on. Anything else is folded into
/// `ProtocolError` at the transport.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    #[error("transient transport error: {0}")]
    TransientTransport(String),
    #[error("OAuth token has expired")]
    AuthExpired,
    #[error("protocol error: {0}")]
    ProtocolError(String),
    #[error("model budget exceeded: {0}")]
    ModelBudget(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// The sentinel substring the driver watches for on a transport error to
/// trigger an OAuth refresh-and-retry (§4.5 step 3, §7 AuthExpired).
pub const OAUTH_EXPIRED_SENTINEL: &str = "OAuth token has expired";

pub fn classify_error_text(status: Option<u16>, body: &str) -> LlmError {
    if body.contains(OAUTH_EXPIRED_SENTINEL) || status == Some(401) {
        return LlmError::AuthExpired;
    }
    match status {
        Some(429) => LlmError::TransientTransport(format!("rate limited: {body}")),
        Some(s) if (500..600).contains(&s) => LlmError::TransientTransport(format!("server error {s}: {body}")),
        Some(s) => LlmError::ProtocolError(format!("http {s}: {body}")),
        None => LlmError::TransientTransport(body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oauth_sentinel_is_classified_as_auth_expired() {
        let err = classify_error_text(None, "error: OAuth token has expired, please refresh");
        assert!(matches!(err, LlmError::AuthExpired));
    }

    #[test]
    fn five_xx_is_transient() {
        let err = classify_error_text(Some(503), "overloaded");
        assert!(matches!(err, LlmError::TransientTransport(_)));
    }

    #[test]
    fn four_xx_other_than_401_is_protocol_error() {
        let err = classify_error_text(Some(400), "bad request");
        assert!(matches!(err, LlmError::ProtocolError(_)));
    }
}
