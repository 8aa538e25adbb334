//! In-process publish/subscribe fan-out for logs, messages, tool events,
//! state transitions, and metrics (§4.8). Backed by `tokio::sync::broadcast`
//! so subscribers (GUI, IRC relay, log file — none implemented here, all
//! out of scope) never block the publisher; a slow subscriber just misses
//! events once its lag exceeds the channel capacity, matching the "buffer as
//! needed" contract.

use serde_json::Value;
use tokio::sync::broadcast;

use crate::types::AgentId;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum EventKind {
    Log { level: LogLevel, text: String },
    Message { payload: String },
    ToolCall { phase: ToolCallPhase, id: String, name: String, input: Value, result: Option<Value> },
    StateChanged { new_state: String },
    Metric { payload: Value },
    Error { text: String },
    ContextConsolidation { status: String },
    GraderFeedback { text: String },
    AnalysisResult { text: String },
    UserMessage { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallPhase {
    Started,
    Completed,
}

/// An event kind stamped with the agent it originated from.
#[derive(Debug, Clone)]
pub struct Event {
    pub agent_id: AgentId,
    pub kind: EventKind,
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Best-effort publish: if there are no subscribers the send error is
    /// swallowed, matching the event bus's "fire and forget" contract.
    pub fn publish(&self, agent_id: AgentId, kind: EventKind) {
        let _ = self.tx.send(Event { agent_id, kind });
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(AgentId::new("agent-1"), EventKind::Log { level: LogLevel::Info, text: "hi".into() });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.agent_id.as_str(), "agent-1");
        matches!(event.kind, EventKind::Log { .. });
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new();
        bus.publish(AgentId::new("agent-1"), EventKind::Error { text: "boom".into() });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive_event() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(AgentId::new("a"), EventKind::StateChanged { new_state: "Running".into() });
        assert!(rx1.recv().await.is_ok());
        assert!(rx2.recv().await.is_ok());
    }
}
