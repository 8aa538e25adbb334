//! Anthropic Messages API transport (§4.5 step 3), adapted from the
//! teacher's `AnthropicProvider`: same request-body shape and error-body
//! classification, trimmed to a single non-streaming call since the driver
//! consumes a complete turn at a time, not deltas.

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::types::content::{ContentBlock, Role};
use crate::types::{Message, Usage};

use super::types::{classify_error_text, LlmError, LlmRequest, LlmResponse, LlmResult, StopReason};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";

/// Bearer-token Anthropic client. The token comes from the caller's
/// `CredentialStore`/OAuth refresh cycle (§4.15) — this type has no opinion
/// on where the token lives, only on how to use it for one request.
pub struct AnthropicClient {
    http_client: Client,
}

impl Default for AnthropicClient {
    fn default() -> Self {
        Self::new()
    }
}

impl AnthropicClient {
    pub fn new() -> Self {
        Self { http_client: Client::new() }
    }

    pub async fn send(&self, access_token: &str, request: &LlmRequest) -> LlmResult<LlmResponse> {
        let body = build_request_body(request);

        let mut req = self
            .http_client
            .post(ANTHROPIC_API_URL)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("authorization", format!("Bearer {access_token}"))
            .header("content-type", "application/json");

        if request.thinking.map(|t| t.interleaved).unwrap_or(false) {
            req = req.header("anthropic-beta", INTERLEAVED_THINKING_BETA);
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::TransientTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_error_text(Some(status.as_u16()), &text));
        }

        let parsed: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ProtocolError(format!("malformed response body: {e}")))?;

        convert_response(parsed)
    }
}

fn build_request_body(request: &LlmRequest) -> serde_json::Value {
    let messages: Vec<serde_json::Value> = request.messages.iter().map(message_to_wire).collect();

    let mut body = json!({
        "model": request.model,
        "max_tokens": request.max_tokens,
        "system": request.system_prompt,
        "messages": messages,
        "temperature": request.temperature,
    });

    if !request.tools.is_empty() {
        body["tools"] = json!(request.tools);
    }

    if let Some(thinking) = request.thinking {
        if thinking.enabled {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": thinking.budget_tokens,
            });
        }
    }

    body
}

fn message_to_wire(message: &Message) -> serde_json::Value {
    let role = match message.role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "user",
    };
    json!({
        "role": role,
        "content": message.content.iter().map(block_to_wire).collect::<Vec<_>>(),
    })
}

fn block_to_wire(block: &ContentBlock) -> serde_json::Value {
    serde_json::to_value(block).unwrap_or(serde_json::Value::Null)
}

fn convert_response(response: AnthropicResponse) -> LlmResult<LlmResponse> {
    let content: Vec<ContentBlock> = response
        .content
        .into_iter()
        .map(|b| b.try_into())
        .collect::<Result<_, _>>()
        .map_err(LlmError::ProtocolError)?;

    let message = Message { role: Role::Assistant, content };

    let stop_reason = response
        .stop_reason
        .as_deref()
        .map(StopReason::from_wire)
        .unwrap_or(StopReason::Other);

    let usage = Usage {
        input_tokens: response.usage.input_tokens,
        output_tokens: response.usage.output_tokens,
        cache_read_tokens: response.usage.cache_read_input_tokens.unwrap_or(0),
        cache_creation_tokens: response.usage.cache_creation_input_tokens.unwrap_or(0),
    };

    Ok(LlmResponse { message, stop_reason, usage })
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
    stop_reason: Option<String>,
    usage: AnthropicUsage,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
    cache_read_input_tokens: Option<u32>,
    cache_creation_input_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnthropicContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: serde_json::Value },
    Thinking { thinking: String },
    RedactedThinking { data: String },
}

impl TryFrom<AnthropicContentBlock> for ContentBlock {
    type Error = String;

    fn try_from(block: AnthropicContentBlock) -> Result<Self, Self::Error> {
        Ok(match block {
            AnthropicContentBlock::Text { text } => ContentBlock::text(text),
            AnthropicContentBlock::ToolUse { id, name, input } => {
                ContentBlock::ToolUse(crate::types::content::ToolUse { id, name, input })
            }
            AnthropicContentBlock::Thinking { thinking } => ContentBlock::Thinking { thinking },
            AnthropicContentBlock::RedactedThinking { data } => ContentBlock::RedactedThinking { data },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::ThinkingConfig;

    fn sample_request() -> LlmRequest {
        LlmRequest {
            model: "claude-sonnet-4-5-20250929".into(),
            system_prompt: "you are an RE agent".into(),
            messages: vec![Message::user("find the main function")],
            tools: vec![],
            max_tokens: 4096,
            thinking: Some(ThinkingConfig { enabled: true, budget_tokens: 1024, interleaved: true }),
            temperature: 1.0,
        }
    }

    #[test]
    fn build_request_body_includes_thinking_block() {
        let body = build_request_body(&sample_request());
        assert_eq!(body["thinking"]["type"], "enabled");
        assert_eq!(body["thinking"]["budget_tokens"], 1024);
        assert_eq!(body["model"], "claude-sonnet-4-5-20250929");
    }

    #[test]
    fn build_request_body_omits_tools_when_empty() {
        let body = build_request_body(&sample_request());
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn convert_response_maps_cache_usage_fields() {
        let parsed = AnthropicResponse {
            content: vec![AnthropicContentBlock::Text { text: "ok".into() }],
            stop_reason: Some("end_turn".to_string()),
            usage: AnthropicUsage {
                input_tokens: 100,
                output_tokens: 20,
                cache_read_input_tokens: Some(50),
                cache_creation_input_tokens: Some(10),
            },
        };
        let response = convert_response(parsed).unwrap();
        assert_eq!(response.usage.cache_read_tokens, 50);
        assert_eq!(response.usage.cache_creation_tokens, 10);
        assert_eq!(response.stop_reason, StopReason::EndTurn);
    }

    #[test]
    fn convert_response_preserves_thinking_block_verbatim() {
        let parsed = AnthropicResponse {
            content: vec![
                AnthropicContentBlock::Thinking { thinking: "step 1...".into() },
                AnthropicContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "list_functions".into(),
                    input: serde_json::json!({}),
                },
            ],
            stop_reason: Some("tool_use".to_string()),
            usage: AnthropicUsage { input_tokens: 1, output_tokens: 1, cache_read_input_tokens: None, cache_creation_input_tokens: None },
        };
        let response = convert_response(parsed).unwrap();
        assert!(response.message.content[0].is_thinking());
        assert!(response.message.content[1].is_tool_use());
    }
}
