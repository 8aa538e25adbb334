//! Polymorphic message content: a tagged union per kind rather than an
//! inheritance hierarchy, with a single serde surface for the LLM wire
//! format. Thinking and redacted-thinking blocks are preserved verbatim —
//! nothing here rewrites, reorders, or summarizes them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// An ephemeral prompt-cache breakpoint attached to a content block. The
/// transport places at most four of these per request (§4.5 step 1): two on
/// the static tool catalog / system prompt, one on the moving conversation
/// point, with the fourth held in reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: CacheControlKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheControlKind {
    Ephemeral,
}

impl CacheControl {
    pub fn ephemeral() -> Self {
        Self {
            kind: CacheControlKind::Ephemeral,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        cache_control: Option<CacheControl>,
    },
    Image(ImageContent),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    /// Opaque model reasoning. Must travel verbatim with any tool-use blocks
    /// from the same assistant turn, or the provider rejects the turn.
    Thinking { thinking: String },
    /// Encrypted variant of a thinking block; same preservation rule.
    RedactedThinking { data: String },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: None,
        }
    }

    pub fn text_cached(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            cache_control: Some(CacheControl::ephemeral()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self, ContentBlock::Thinking { .. } | ContentBlock::RedactedThinking { .. })
    }

    pub fn is_tool_use(&self) -> bool {
        matches!(self, ContentBlock::ToolUse(_))
    }

    pub fn strip_cache_control(&mut self) {
        if let ContentBlock::Text { cache_control, .. } = self {
            *cache_control = None;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageContent {
    pub source: ImageSource,
    pub media_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64(String),
    Url(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub content: ToolResultContent,
    pub is_error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Json(serde_json::Value),
}

impl ToolResultContent {
    pub fn as_text(&self) -> String {
        match self {
            ToolResultContent::Text(s) => s.clone(),
            ToolResultContent::Json(v) => v.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: vec![ContentBlock::text(text)],
        }
    }

    pub fn thinking_blocks(&self) -> Vec<&ContentBlock> {
        self.content.iter().filter(|c| c.is_thinking()).collect()
    }

    pub fn tool_uses(&self) -> Vec<&ToolUse> {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::ToolUse(tu) => Some(tu),
                _ => None,
            })
            .collect()
    }

    /// Strips every cache-control marker from this message's text blocks.
    pub fn strip_cache_markers(&mut self) {
        for block in &mut self.content {
            block.strip_cache_control();
        }
        for block in &mut self.content {
            if let ContentBlock::ToolResult(tr) = block {
                tr.cache_control = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_blocks_travel_with_tool_use() {
        let msg = Message {
            role: Role::Assistant,
            content: vec![
                ContentBlock::Thinking { thinking: "reasoning".into() },
                ContentBlock::ToolUse(ToolUse {
                    id: "t1".into(),
                    name: "set_name".into(),
                    input: serde_json::json!({"address": "0x1000"}),
                }),
            ],
        };
        assert_eq!(msg.thinking_blocks().len(), 1);
        assert_eq!(msg.tool_uses().len(), 1);

        // Round-trip through serde preserves block order and kind.
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert!(back.content[0].is_thinking());
        assert!(back.content[1].is_tool_use());
    }

    #[test]
    fn redacted_thinking_round_trips() {
        let block = ContentBlock::RedactedThinking { data: "ciphertext".into() };
        let json = serde_json::to_string(&block).unwrap();
        let back: ContentBlock = serde_json::from_str(&json).unwrap();
        assert!(back.is_thinking());
    }

    #[test]
    fn strip_cache_markers_clears_text_and_tool_result() {
        let mut msg = Message {
            role: Role::User,
            content: vec![
                ContentBlock::text_cached("hello"),
                ContentBlock::ToolResult(ToolResult {
                    tool_use_id: "t1".into(),
                    content: ToolResultContent::Text("ok".into()),
                    is_error: false,
                    cache_control: Some(CacheControl::ephemeral()),
                }),
            ],
        };
        msg.strip_cache_markers();
        match &msg.content[0] {
            ContentBlock::Text { cache_control, .. } => assert!(cache_control.is_none()),
            _ => panic!("expected text block"),
        }
        match &msg.content[1] {
            ContentBlock::ToolResult(tr) => assert!(tr.cache_control.is_none()),
            _ => panic!("expected tool result block"),
        }
    }
}
