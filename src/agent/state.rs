//! Execution State (§3): the driver's owned conversation aggregate. Cleared
//! on a new top-level task and reset with the consolidation summary after a
//! consolidation (§4.7 phase 3). Grounded in the teacher's `AgentThread`
//! (`agent/thread.rs`) for the append-only-segments shape, narrowed to a flat
//! message vector since this crate has no multi-thread persistence surface.

use std::collections::HashMap;

use crate::types::{Message, Usage};

/// Where a tool-use id was issued, so the driver can attribute a later
/// tool-result back to the iteration that requested it.
#[derive(Debug, Clone)]
pub struct PendingToolUse {
    pub tool_name: String,
    pub iteration: u32,
}

/// One completed session's token totals, archived when a consolidation
/// rolls the current counters over (§3 Token Usage).
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionUsage {
    pub usage: Usage,
    pub iterations: u32,
}

#[derive(Debug, Clone)]
pub struct ExecutionState {
    pub messages: Vec<Message>,
    pub tool_use_origin: HashMap<String, PendingToolUse>,
    pub iteration: u32,
    /// Cleared (set false) by an unrecoverable error; a caller may not
    /// `Resume` an invalid state, only start a new task.
    pub valid: bool,
    pub last_saved_unix: i64,
    pub current_usage: Usage,
    pub sessions: Vec<SessionUsage>,
    pub consolidating: bool,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            tool_use_origin: HashMap::new(),
            iteration: 0,
            valid: true,
            last_saved_unix: 0,
            current_usage: Usage::default(),
            sessions: Vec::new(),
            consolidating: false,
        }
    }

    /// Clears everything for a brand new top-level task; does not touch the
    /// archived `sessions` history.
    pub fn reset_for_new_task(&mut self) {
        self.messages.clear();
        self.tool_use_origin.clear();
        self.iteration = 0;
        self.valid = true;
        self.current_usage = Usage::default();
        self.consolidating = false;
    }

    /// Consolidation rebuild (§4.7 phase 3): archives the current usage,
    /// resets the counter, and clears the conversation down to the single
    /// seed message the caller is about to push.
    pub fn rebuild_after_consolidation(&mut self) {
        self.sessions.push(SessionUsage { usage: self.current_usage, iterations: self.iteration });
        self.current_usage = Usage::default();
        self.messages.clear();
        self.tool_use_origin.clear();
        self.iteration = 0;
        self.consolidating = false;
    }

    pub fn account(&mut self, usage: Usage) {
        self.current_usage.add(&usage);
    }

    pub fn total_tokens_last_turn(&self) -> u32 {
        self.current_usage.input_tokens + self.current_usage.cache_read_tokens + self.current_usage.cache_creation_tokens
    }
}

impl Default for ExecutionState {
    fn default() -> Self {
        Self::new()
    }
}

/// The agent state machine (§4.5): transitions are emitted on the Event Bus
/// by the driver, never decided here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRunState {
    Idle,
    Running,
    Paused,
    Completed,
}

impl std::fmt::Display for AgentRunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AgentRunState::Idle => "idle",
            AgentRunState::Running => "running",
            AgentRunState::Paused => "paused",
            AgentRunState::Completed => "completed",
        };
        write!(f, "{s}")
    }
}

/// Work items accepted by a driver's worker loop (§4.5).
#[derive(Debug, Clone)]
pub enum DriverTask {
    NewTask(String),
    Resume,
    Continue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebuild_after_consolidation_archives_usage_and_clears_messages() {
        let mut state = ExecutionState::new();
        state.messages.push(Message::user("analyze main"));
        state.iteration = 5;
        state.account(Usage { input_tokens: 100, output_tokens: 20, cache_read_tokens: 0, cache_creation_tokens: 0 });

        state.rebuild_after_consolidation();

        assert!(state.messages.is_empty());
        assert_eq!(state.iteration, 0);
        assert_eq!(state.sessions.len(), 1);
        assert_eq!(state.sessions[0].usage.input_tokens, 100);
        assert_eq!(state.current_usage.total(), 0);
    }

    #[test]
    fn reset_for_new_task_preserves_archived_sessions() {
        let mut state = ExecutionState::new();
        state.sessions.push(SessionUsage::default());
        state.messages.push(Message::user("hi"));
        state.reset_for_new_task();
        assert!(state.messages.is_empty());
        assert_eq!(state.sessions.len(), 1);
    }
}
