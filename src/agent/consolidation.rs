//! Consolidation Engine (§4.7), grounded in `original_source/agent/agent.h`:
//! compresses the conversation when token usage crosses `context_limit`,
//! preserving only what the model re-stores through the memory tool plus a
//! text summary. Driven entirely from §4.5 step 2/8 — this module holds the
//! pure logic (prompt text, extraction, the rebuilt seed message); the
//! driver owns when to call it.

use crate::memory::MemoryStore;
use crate::types::content::ContentBlock;
use crate::types::Message;

pub const CONSOLIDATION_REQUEST_TEXT: &str = "Context is approaching its limit. Before continuing, \
bulk-store every finding, hypothesis, and open question you have accumulated so far using the \
memory-store tool, one entry per distinct fact. Once you are done storing, reply with a concise \
text summary of the investigation so far and what remains to be done.";

const CONTINUATION_TEMPLATE: &str = "Resuming investigation after a context consolidation.\n\n\
Original task: {task}\n\nSummary of prior work: {summary}\n\nKeys stored in the analysis memory so \
far: {keys}\n\nContinue the investigation from here, consulting the memory store for prior findings \
as needed.";

/// Appends the fixed consolidation-request message and marks the in-flight
/// flag (§4.7 phase 1). The caller continues the normal loop afterward so
/// the model's next response is treated as the consolidation response.
pub fn begin_consolidation(messages: &mut Vec<Message>) {
    messages.push(Message::user(CONSOLIDATION_REQUEST_TEXT));
}

/// Extraction (§4.7 phase 2): pulls the set of keys the model stored via
/// `store_analysis` tool-use blocks in `response`, and the text summary it
/// emitted. If the model produced no summary text, a fallback is synthesized
/// from the stored keys (§9 Open Questions: no further round-trip to the
/// model) and a warning is logged.
pub fn extract_summary(response: &Message, store: &MemoryStore) -> (String, Vec<String>) {
    let keys: Vec<String> = response
        .content
        .iter()
        .filter_map(|b| match b {
            ContentBlock::ToolUse(tu) if tu.name == "store_analysis" => {
                tu.input.get("key").and_then(|k| k.as_str()).map(str::to_string)
            }
            _ => None,
        })
        .collect();

    let summary_text: String = response.content.iter().filter_map(ContentBlock::as_text).collect::<Vec<_>>().join("\n");

    if !summary_text.trim().is_empty() {
        return (summary_text, keys);
    }

    tracing::warn!(stored_keys = keys.len(), "consolidation response had no summary text; synthesizing one from stored keys");
    let fallback = synthesize_fallback_summary(&keys, store);
    (fallback, keys)
}

/// Builds a fallback summary by pulling each stored key's content back out
/// of the memory store and concatenating a short digest, rather than
/// re-asking the model (§9 Open Questions resolution).
fn synthesize_fallback_summary(keys: &[String], store: &MemoryStore) -> String {
    if keys.is_empty() {
        return "No summary was produced and no findings were stored during consolidation.".to_string();
    }
    let mut lines = vec!["Consolidation summary (synthesized from stored findings):".to_string()];
    for key in keys {
        if let Some(entry) = store.get_by_key(key) {
            let snippet: String = entry.content.chars().take(160).collect();
            lines.push(format!("- {key}: {snippet}"));
        } else {
            lines.push(format!("- {key}"));
        }
    }
    lines.join("\n")
}

/// Rebuild (§4.7 phase 3): the single seed message for the fresh
/// conversation, interpolating the original task, the summary, and the
/// stored keys into the fixed continuation template.
pub fn build_continuation_message(original_task: &str, summary: &str, keys: &[String]) -> Message {
    let keys_text = if keys.is_empty() { "(none)".to_string() } else { keys.join(", ") };
    let text = CONTINUATION_TEMPLATE
        .replace("{task}", original_task)
        .replace("{summary}", summary)
        .replace("{keys}", &keys_text);
    Message::user(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AnalysisCategory, MemoryStore};
    use crate::types::content::ToolUse;
    use crate::types::Role;

    #[test]
    fn begin_consolidation_appends_fixed_request_text() {
        let mut messages = vec![Message::user("analyze main")];
        begin_consolidation(&mut messages);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].content[0].as_text(), Some(CONSOLIDATION_REQUEST_TEXT));
    }

    #[test]
    fn extract_summary_prefers_model_provided_text() {
        let store = MemoryStore::new();
        let response = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::text("the binary is a packed ELF with a custom loader")],
        };
        let (summary, keys) = extract_summary(&response, &store);
        assert_eq!(summary, "the binary is a packed ELF with a custom loader");
        assert!(keys.is_empty());
    }

    #[test]
    fn extract_summary_collects_store_analysis_keys() {
        let store = MemoryStore::new();
        let response = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::ToolUse(ToolUse { id: "t1".into(), name: "store_analysis".into(), input: serde_json::json!({"key": "entry_point"}) }),
                ContentBlock::ToolUse(ToolUse { id: "t2".into(), name: "store_analysis".into(), input: serde_json::json!({"key": "loader_routine"}) }),
            ],
        };
        let (_summary, keys) = extract_summary(&response, &store);
        assert_eq!(keys, vec!["entry_point".to_string(), "loader_routine".to_string()]);
    }

    #[test]
    fn extract_summary_falls_back_to_synthesized_text_when_model_omits_it() {
        let store = MemoryStore::new();
        store.store("entry_point", "located at 0x401000", AnalysisCategory::Finding, Some(0x401000), vec![], 1000);
        let response = Message {
            role: Role::Assistant,
            content: vec![ContentBlock::ToolUse(ToolUse { id: "t1".into(), name: "store_analysis".into(), input: serde_json::json!({"key": "entry_point"}) })],
        };
        let (summary, keys) = extract_summary(&response, &store);
        assert!(summary.contains("entry_point"));
        assert!(summary.contains("0x401000"));
        assert_eq!(keys, vec!["entry_point".to_string()]);
    }

    #[test]
    fn continuation_message_interpolates_task_summary_and_keys() {
        let message = build_continuation_message("analyze main", "found a packer", &["entry_point".to_string()]);
        let text = message.content[0].as_text().unwrap();
        assert!(text.contains("analyze main"));
        assert!(text.contains("found a packer"));
        assert!(text.contains("entry_point"));
    }
}
