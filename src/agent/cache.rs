//! Prompt-cache re-anchoring (§4.5 step 1). The wire protocol has four
//! cacheable breakpoints; two are reserved for the static system prompt and
//! tool catalog (attached once, outside the conversation, and never moved),
//! leaving this crate's responsibility to exactly one moving breakpoint over
//! the conversation itself.

use crate::types::content::ContentBlock;
use crate::types::{Message, Role};

pub const MAX_CACHE_BREAKPOINTS: usize = 4;

/// Strips every ephemeral cache marker from `messages`, then places exactly
/// one on the last content block of the most recent tool-result-bearing user
/// message. If no such message exists (e.g. before any tool has run), the
/// last message's last block is marked instead so the conversation always
/// has a moving anchor once it's non-empty.
pub fn reshape_cache_markers(messages: &mut [Message]) {
    for message in messages.iter_mut() {
        message.strip_cache_markers();
    }

    let target = messages
        .iter()
        .rposition(|m| m.role == Role::User && m.content.iter().any(is_tool_result))
        .or_else(|| if messages.is_empty() { None } else { Some(messages.len() - 1) });

    let Some(index) = target else { return };
    mark_last_cacheable_block(&mut messages[index]);
}

fn is_tool_result(block: &ContentBlock) -> bool {
    matches!(block, ContentBlock::ToolResult(_))
}

fn mark_last_cacheable_block(message: &mut Message) {
    for block in message.content.iter_mut().rev() {
        match block {
            ContentBlock::Text { cache_control, .. } => {
                *cache_control = Some(crate::types::content::CacheControl::ephemeral());
                return;
            }
            ContentBlock::ToolResult(tr) => {
                tr.cache_control = Some(crate::types::content::CacheControl::ephemeral());
                return;
            }
            _ => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::content::{ToolResult, ToolResultContent};

    fn tool_result_message(id: &str) -> Message {
        Message {
            role: Role::User,
            content: vec![ContentBlock::ToolResult(ToolResult {
                tool_use_id: id.to_string(),
                content: ToolResultContent::Text("ok".into()),
                is_error: false,
                cache_control: None,
            })],
        }
    }

    #[test]
    fn marks_only_the_most_recent_tool_result_message() {
        let mut messages = vec![tool_result_message("t1"), Message::assistant("ack"), tool_result_message("t2")];
        reshape_cache_markers(&mut messages);

        let marked: Vec<bool> = messages
            .iter()
            .map(|m| {
                m.content.iter().any(|b| matches!(b, ContentBlock::ToolResult(tr) if tr.cache_control.is_some()))
            })
            .collect();
        assert_eq!(marked, vec![false, false, true]);
    }

    #[test]
    fn clears_earlier_markers_before_placing_a_fresh_one() {
        let mut first = tool_result_message("t1");
        if let ContentBlock::ToolResult(tr) = &mut first.content[0] {
            tr.cache_control = Some(crate::types::content::CacheControl::ephemeral());
        }
        let mut messages = vec![first, tool_result_message("t2")];
        reshape_cache_markers(&mut messages);

        let ContentBlock::ToolResult(tr0) = &messages[0].content[0] else { panic!() };
        let ContentBlock::ToolResult(tr1) = &messages[1].content[0] else { panic!() };
        assert!(tr0.cache_control.is_none());
        assert!(tr1.cache_control.is_some());
    }

    #[test]
    fn falls_back_to_last_message_when_no_tool_result_present() {
        let mut messages = vec![Message::user("analyze main")];
        reshape_cache_markers(&mut messages);
        let ContentBlock::Text { cache_control, .. } = &messages[0].content[0] else { panic!() };
        assert!(cache_control.is_some());
    }
}
