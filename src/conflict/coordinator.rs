//! Turn-ordered consensus protocol (§4.10): when the detector reports a
//! prior write by another agent, the coordinator forces every participant
//! into a dedicated conflict channel, seeds it with the colliding tool
//! calls, and blocks until every participant has emitted a byte-identical
//! (post-trim) `MARKED_CONSENSUS` frame or the deadline elapses. Grounded in
//! `original_source/agent/agent_irc_tools.h`'s conflict-channel naming and
//! force-join behavior.

use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use crate::coordination::{CoordinationClient, CoordinationClientError, CoordinationEvent, CoordinationFrame};
use crate::coordination::parse_frame;
use crate::tools::tool_class;
use crate::types::AgentId;

use super::detector::ToolCallRecord;

#[derive(Debug, Error)]
pub enum ConflictCoordinatorError {
    #[error("coordination client error: {0}")]
    Client(#[from] CoordinationClientError),
    #[error("timed out waiting for consensus on {0}")]
    Timeout(String),
}

pub type Result<T> = std::result::Result<T, ConflictCoordinatorError>;

/// What triggered a conflict channel to be opened.
#[derive(Debug, Clone)]
pub struct ConflictTrigger {
    pub tool_name: String,
    pub address: u64,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPhase {
    Proposed,
    Discussing,
    MarkingConsensus,
    Resolved,
    Abandoned,
}

#[derive(Debug, Clone)]
pub struct ConflictDescriptor {
    pub channel: String,
    pub triggering_agent: AgentId,
    pub participants: Vec<AgentId>,
    pub trigger: ConflictTrigger,
    pub prior_records: Vec<ToolCallRecord>,
    pub phase: ConflictPhase,
}

#[derive(Debug, Clone)]
pub enum ConflictOutcome {
    /// Every participant emitted the same (post-trim) `MARKED_CONSENSUS`
    /// payload; the originally-conflicting write should be re-executed
    /// using this agreed text.
    Proceed { payload: String },
    /// No consensus arrived before the deadline; neither write is applied.
    Abandoned,
}

/// Deterministic channel name derived from address and tool *class* (not
/// the raw tool name), so `set_name` and `set_function_name` — both
/// `ToolClass::Rename` — collide into the same channel (§4.10).
pub fn channel_name(address: u64, tool_name: &str) -> String {
    let class_name = tool_class(tool_name)
        .map(|c| format!("{:?}", c).to_lowercase())
        .unwrap_or_else(|| "other".to_string());
    format!("#conflict_{:x}_{}", address, class_name)
}

/// Tracks, for a single open conflict, which participants have marked
/// consensus and with what payload. Resolution requires every participant
/// in `participants` to be present with byte-identical (post-trim) text.
struct ConsensusTracker {
    participants: HashSet<String>,
    marked: HashMap<String, String>,
}

impl ConsensusTracker {
    fn new(participants: &[AgentId]) -> Self {
        Self {
            participants: participants.iter().map(|a| a.as_str().to_string()).collect(),
            marked: HashMap::new(),
        }
    }

    /// Records `agent`'s consensus payload. Returns `Some(payload)` once
    /// every participant has marked with byte-identical (trimmed) text;
    /// returns `None` otherwise, clearing the accumulated marks if a
    /// divergent payload was just seen (§4.10, scenario S4) so discussion
    /// resumes instead of silently waiting forever on a stale mark.
    fn mark(&mut self, agent: &str, payload: &str) -> Option<String> {
        if !self.participants.contains(agent) {
            return None;
        }
        self.marked.insert(agent.to_string(), payload.trim().to_string());

        if self.marked.len() < self.participants.len() {
            return None;
        }

        let mut values = self.marked.values();
        let first = values.next()?.clone();
        if values.all(|v| *v == first) {
            Some(first)
        } else {
            self.marked.clear();
            None
        }
    }
}

pub struct ConflictCoordinator {
    client: std::sync::Arc<CoordinationClient>,
    consensus_timeout: Duration,
}

impl ConflictCoordinator {
    pub fn new(client: std::sync::Arc<CoordinationClient>) -> Self {
        Self { client, consensus_timeout: Duration::from_secs(120) }
    }

    pub fn with_timeout(client: std::sync::Arc<CoordinationClient>, consensus_timeout: Duration) -> Self {
        Self { client, consensus_timeout }
    }

    /// Opens a conflict channel for `trigger` against every agent named in
    /// `prior_records`, force-joins each one, seeds the channel with every
    /// colliding tool call, and blocks until consensus is reached or the
    /// deadline elapses.
    pub async fn resolve(
        &self,
        triggering_agent: &AgentId,
        trigger: ConflictTrigger,
        prior_records: Vec<ToolCallRecord>,
        mut events: tokio::sync::mpsc::UnboundedReceiver<CoordinationEvent>,
    ) -> Result<ConflictOutcome> {
        let channel = channel_name(trigger.address, &trigger.tool_name);

        let mut participants = vec![triggering_agent.clone()];
        for record in &prior_records {
            if !participants.contains(&record.agent_id) {
                participants.push(record.agent_id.clone());
            }
        }

        self.client.join(&channel).await?;

        for other in participants.iter().filter(|a| *a != triggering_agent) {
            let force = format!("CONFLICT_FORCE:{}:{}", other.as_str(), channel);
            self.client.send("#agents", &force).await?;
        }

        for record in &prior_records {
            self.client
                .send(
                    &channel,
                    &format!(
                        "{} is attempting {} at 0x{:x}; {} already called {} here at t={}",
                        triggering_agent, trigger.tool_name, trigger.address, record.agent_id, record.tool_name, record.timestamp,
                    ),
                )
                .await?;
        }

        let mut tracker = ConsensusTracker::new(&participants);

        let wait = async {
            while let Some(event) = events.recv().await {
                if let CoordinationEvent::Conflict { text, channel: evt_channel, .. } = event {
                    if evt_channel != channel {
                        continue;
                    }
                    if let CoordinationFrame::MarkedConsensus { agent, payload } = parse_frame(&text) {
                        if let Some(resolved) = tracker.mark(&agent, &payload) {
                            return Some(resolved);
                        }
                    }
                }
            }
            None
        };

        let outcome = match tokio::time::timeout(self.consensus_timeout, wait).await {
            Ok(Some(payload)) => Ok(ConflictOutcome::Proceed { payload }),
            Ok(None) => Ok(ConflictOutcome::Abandoned),
            Err(_) => Err(ConflictCoordinatorError::Timeout(channel.clone())),
        };

        if matches!(outcome, Ok(ConflictOutcome::Proceed { .. })) {
            self.client.leave(&channel).await?;
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_name_groups_by_tool_class_not_raw_name() {
        assert_eq!(channel_name(0x500, "set_name"), channel_name(0x500, "set_function_name"));
        assert_ne!(channel_name(0x500, "set_name"), channel_name(0x500, "set_variable_type"));
    }

    #[test]
    fn channel_name_is_deterministic_per_address() {
        assert_eq!(channel_name(0x500, "set_name"), channel_name(0x500, "set_name"));
        assert_ne!(channel_name(0x500, "set_name"), channel_name(0x501, "set_name"));
    }

    fn agents(names: &[&str]) -> Vec<AgentId> {
        names.iter().map(|n| AgentId::new(*n)).collect()
    }

    #[test]
    fn tracker_resolves_only_once_every_participant_matches() {
        let mut tracker = ConsensusTracker::new(&agents(&["A", "B"]));
        assert_eq!(tracker.mark("A", "rename to baz"), None);
        assert_eq!(tracker.mark("B", "rename to baz"), Some("rename to baz".to_string()));
    }

    #[test]
    fn tracker_trims_payloads_before_comparing() {
        let mut tracker = ConsensusTracker::new(&agents(&["A", "B"]));
        tracker.mark("A", "baz");
        assert_eq!(tracker.mark("B", "baz "), Some("baz".to_string()));
    }

    /// Scenario S4: divergent payloads must not resolve, and must clear
    /// the waiting state for both agents so discussion can resume.
    #[test]
    fn tracker_clears_marks_on_divergence_instead_of_resolving() {
        let mut tracker = ConsensusTracker::new(&agents(&["A", "B"]));
        tracker.mark("A", "baz");
        assert_eq!(tracker.mark("B", "qux"), None);
        assert!(tracker.marked.is_empty());

        // discussion resumes: a fresh matching round still resolves
        tracker.mark("A", "baz");
        assert_eq!(tracker.mark("B", "baz"), Some("baz".to_string()));
    }

    #[test]
    fn tracker_ignores_marks_from_non_participants() {
        let mut tracker = ConsensusTracker::new(&agents(&["A", "B"]));
        assert_eq!(tracker.mark("C", "baz"), None);
        assert!(tracker.marked.is_empty());
    }

    #[tokio::test]
    async fn resolve_times_out_when_no_consensus_arrives() {
        let client = std::sync::Arc::new(CoordinationClient::new("A"));
        // not connected, so join/send will error before we ever reach the wait;
        // this still exercises the error path deterministically.
        let (_tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let coordinator = ConflictCoordinator::with_timeout(client, Duration::from_millis(10));
        let trigger = ConflictTrigger { tool_name: "set_name".into(), address: 0x500, params: serde_json::json!({}) };
        let prior = ToolCallRecord {
            tool_name: "set_name".into(),
            address: 0x500,
            params: serde_json::json!({}),
            agent_id: AgentId::new("B"),
            timestamp: 1,
        };
        let result = coordinator.resolve(&AgentId::new("A"), trigger, vec![prior], rx).await;
        assert!(result.is_err());
    }
}
