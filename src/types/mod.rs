//! Wire-shape data types shared across the agent runtime: message content,
//! token usage, and the agent identifier newtype.

mod content;
mod usage;

pub use content::{
    CacheControl, ContentBlock, ImageContent, ImageSource, Message, Role, ToolResult,
    ToolResultContent, ToolUse,
};
pub use usage::{ModelPrice, PriceTable, Usage};

use std::fmt;

/// Identifies a single agent participating in a run. A thin wrapper over
/// `String` so call sites can't accidentally pass a channel or tool name
/// where an agent id is expected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
