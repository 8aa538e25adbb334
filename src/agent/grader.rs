//! Grader (§4.6), grounded in `original_source/agent/grader.h`: a second,
//! independent LLM pass that decides whether the investigation satisfies the
//! user's request, plus a small deterministic classifier call that turns the
//! peer-review prose into a boolean.

use serde::Deserialize;

use crate::config::GraderConfig;
use crate::llm::{AnthropicClient, LlmRequest, LlmResult, ThinkingConfig};
use crate::types::content::ContentBlock;
use crate::types::{Message, Role};

/// Prefix on a user message that threads grader feedback back into the
/// transcript (§4.5 step 11). Messages carrying this prefix are excluded
/// when the grader reconstructs "the user's request" on a later pass, so it
/// never judges its own prior feedback as the task.
pub const GRADER_FEEDBACK_MARKER: &str = "[GRADER_FEEDBACK]";

const PEER_REVIEW_SYSTEM_PROMPT: &str = "You are a senior reverse engineer reviewing a colleague's \
in-progress investigation. Read their request, the assistant's transcript (including its reasoning \
and tool calls), and anything stored in the shared analysis store. Decide whether the investigation \
fully answers the request. If it does, write the final answer for the user. If it does not, say \
precisely what is missing or still needs verification.";

const CLASSIFIER_PROMPT_TEMPLATE: &str = "A reviewer wrote the following assessment of an \
investigation. Respond with strict JSON of the shape {\"reasoning\": string, \"is_complete\": bool}. \
Set is_complete to true only if the reviewer's text reads as a final, complete answer rather than a \
request for more work.\n\nReviewer assessment:\n";

#[derive(Debug, Clone)]
pub struct GraderVerdict {
    pub complete: bool,
    pub response_text: String,
    pub full_message_including_thinking: Message,
}

#[derive(Debug, Deserialize)]
struct ClassifierOutput {
    #[allow(dead_code)]
    reasoning: String,
    is_complete: bool,
}

/// Rough estimate used only to prioritize/prune messages under the prompt
/// budget; not the billed token count (that comes back in `Usage`).
fn estimate_tokens(message: &Message) -> u32 {
    let chars: usize = message
        .content
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text, .. } => text.len(),
            ContentBlock::Thinking { thinking } => thinking.len(),
            ContentBlock::RedactedThinking { data } => data.len(),
            ContentBlock::ToolUse(tu) => tu.input.to_string().len(),
            ContentBlock::ToolResult(tr) => tr.content.as_text().len(),
            ContentBlock::Image(_) => 256,
        })
        .sum();
    (chars / 4).max(1) as u32
}

fn has_tool_call(message: &Message) -> bool {
    message.content.iter().any(|b| b.is_tool_use() || matches!(b, ContentBlock::ToolResult(_)))
}

/// Prioritizes assistant-turn messages for inclusion in the grader prompt
/// (§4.6 step 1): recent messages and those carrying tool calls rank high,
/// older text-only messages rank low. Greedily includes the highest-ranked
/// messages under `budget`, preserving their original relative order, and
/// returns the count of messages that were pruned.
fn prioritize_and_prune(messages: &[Message], budget: u32) -> (Vec<Message>, usize) {
    let mut ranked: Vec<(usize, i64)> = messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let recency = i as i64;
            let tool_bonus = if has_tool_call(m) { 1_000_000 } else { 0 };
            (i, recency + tool_bonus)
        })
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));

    let mut spent = 0u32;
    let mut keep = vec![false; messages.len()];
    for (idx, _) in &ranked {
        let cost = estimate_tokens(&messages[*idx]);
        if spent + cost > budget {
            continue;
        }
        spent += cost;
        keep[*idx] = true;
    }

    let pruned = keep.iter().filter(|k| !**k).count();
    let kept: Vec<Message> = messages.iter().zip(keep.iter()).filter(|(_, k)| **k).map(|(m, _)| m.clone()).collect();
    (kept, pruned)
}

/// Reconstructs the original user request by concatenating every non-grader
/// user text message, stripping the grader's own prior feedback markers.
fn reconstruct_user_request(messages: &[Message]) -> String {
    messages
        .iter()
        .filter(|m| m.role == Role::User)
        .flat_map(|m| m.content.iter())
        .filter_map(ContentBlock::as_text)
        .filter(|t| !t.starts_with(GRADER_FEEDBACK_MARKER))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Grader {
    client: AnthropicClient,
    config: GraderConfig,
}

impl Grader {
    pub fn new(client: AnthropicClient, config: GraderConfig) -> Self {
        Self { client, config }
    }

    /// Runs the full two-call procedure: a thinking-enabled peer review,
    /// then a deterministic classifier call against the review's text.
    pub async fn grade(
        &self,
        access_token: &str,
        messages: &[Message],
        stored_analyses_summary: &str,
    ) -> LlmResult<GraderVerdict> {
        let user_request = reconstruct_user_request(messages);
        let (prioritized, pruned) = prioritize_and_prune(messages, self.config.prompt_token_budget);
        if pruned > 0 {
            tracing::warn!(pruned, "grader pruned messages to fit prompt_token_budget");
        }

        let mut review_messages = prioritized;
        review_messages.push(Message::user(format!(
            "Original request:\n{user_request}\n\nStored analyses:\n{stored_analyses_summary}"
        )));

        let review_request = LlmRequest {
            model: self.config.model.clone(),
            system_prompt: PEER_REVIEW_SYSTEM_PROMPT.to_string(),
            messages: review_messages,
            tools: vec![],
            max_tokens: self.config.max_tokens,
            thinking: Some(ThinkingConfig { enabled: true, budget_tokens: 2048, interleaved: false }),
            temperature: 0.0,
        };

        let review_response = self.client.send(access_token, &review_request).await?;
        let response_text = review_response
            .message
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect::<Vec<_>>()
            .join("\n");

        let complete = self.classify(access_token, &response_text).await;

        Ok(GraderVerdict { complete, response_text, full_message_including_thinking: review_response.message })
    }

    /// Second, deterministic classifier call (§4.6 step 3): defaults to
    /// `is_complete = false` on parse or transport failure, since an
    /// unreadable verdict must not be mistaken for a completed task.
    async fn classify(&self, access_token: &str, review_text: &str) -> bool {
        let request = LlmRequest {
            model: self.config.classifier_model.clone(),
            system_prompt: "Respond with JSON only, no prose.".to_string(),
            messages: vec![Message::user(format!("{CLASSIFIER_PROMPT_TEMPLATE}{review_text}"))],
            tools: vec![],
            max_tokens: 256,
            thinking: None,
            temperature: 0.0,
        };

        let Ok(response) = self.client.send(access_token, &request).await else { return false };
        let text = response.message.content.iter().filter_map(ContentBlock::as_text).collect::<Vec<_>>().join("");
        serde_json::from_str::<ClassifierOutput>(text.trim()).map(|out| out.is_complete).unwrap_or(false)
    }
}

/// §4.6's fallback path when the grader is disabled entirely: the most
/// recent assistant text message is surfaced as the final report verbatim.
pub fn surface_last_assistant_text(messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::Assistant)
        .and_then(|m| m.content.iter().filter_map(ContentBlock::as_text).last().map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content::{ToolResult, ToolResultContent, ToolUse};

    #[test]
    fn prioritize_ranks_tool_call_messages_above_old_text() {
        let messages = vec![
            Message::user("analyze main"),
            Message {
                role: Role::Assistant,
                content: vec![ContentBlock::ToolUse(ToolUse { id: "t1".into(), name: "decompile".into(), input: serde_json::json!({}) })],
            },
            Message::assistant("some filler text ".repeat(50)),
        ];
        let (kept, pruned) = prioritize_and_prune(&messages, 20);
        assert_eq!(pruned, 1);
        assert!(kept.iter().any(|m| m.tool_uses().len() == 1));
    }

    #[test]
    fn reconstruct_strips_grader_feedback_messages() {
        let messages = vec![
            Message::user("analyze main"),
            Message::assistant("working on it"),
            Message::user(format!("{GRADER_FEEDBACK_MARKER} please check the imports too")),
        ];
        let request = reconstruct_user_request(&messages);
        assert_eq!(request, "analyze main");
    }

    #[test]
    fn surfaces_last_assistant_text_when_grader_disabled() {
        let messages = vec![Message::assistant("first"), Message::user("ok"), Message::assistant("final report")];
        assert_eq!(surface_last_assistant_text(&messages), Some("final report".to_string()));
    }

    #[test]
    fn tool_result_message_counts_as_tool_call_for_priority() {
        let message = Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult(ToolResult {
                tool_use_id: "t1".into(),
                content: ToolResultContent::Text("ok".into()),
                is_error: false,
                cache_control: None,
            })],
        };
        assert!(has_tool_call(&message));
    }
}
