//! Fans a single `CoordinationClient` event stream out to two destinations
//! (§4.9 injection, §4.10 conflict resolution): most events become
//! human-readable text queued for the next turn, while `Conflict` events on
//! whatever channel is currently "live" are forwarded to the one
//! `ConflictCoordinator::resolve` call in flight, since that call owns an
//! `mpsc::UnboundedReceiver` for the duration of one resolution.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

use crate::coordination::CoordinationEvent;
use crate::queue::MessageQueue;

pub struct ConflictEventRouter {
    forward: Mutex<Option<mpsc::UnboundedSender<CoordinationEvent>>>,
}

impl ConflictEventRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { forward: Mutex::new(None) })
    }

    /// Drains `rx` for the life of the connection, translating broadcast,
    /// private, and peer-table events into queued text (§4.9), while
    /// routing `Conflict` events to whichever resolution is currently
    /// listening.
    pub fn spawn(self: &Arc<Self>, mut rx: mpsc::UnboundedReceiver<CoordinationEvent>, queue: Arc<MessageQueue>) {
        let router = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match &event {
                    CoordinationEvent::Conflict { .. } => {
                        if let Some(tx) = router.forward.lock().await.as_ref() {
                            let _ = tx.send(event.clone());
                        }
                    }
                    CoordinationEvent::Broadcast { sender, text } => {
                        queue.push(format!("[broadcast] {sender}: {text}")).await;
                    }
                    CoordinationEvent::Private { sender, text, .. } => {
                        queue.push(format!("[private] {sender}: {text}")).await;
                    }
                    CoordinationEvent::PeerJoined { agent_id, task } => {
                        queue.push(format!("[peer] {agent_id} joined, working on: {task}")).await;
                    }
                    CoordinationEvent::PeerLeft { agent_id } => {
                        queue.push(format!("[peer] {agent_id} left")).await;
                    }
                    CoordinationEvent::ConflictForced { channel, .. } => {
                        queue
                            .push(format!("[conflict] you have been pulled into {channel} to resolve a conflicting write"))
                            .await;
                    }
                    CoordinationEvent::Disconnected => break,
                }
            }
        });
    }

    /// Opens a fresh forwarding channel for one conflict resolution.
    /// `ConflictCoordinator::resolve` consumes the whole receiver it is
    /// given, so only one resolution may be in flight per agent at a time
    /// (matching §4.10's serial, per-triggering-write model).
    pub async fn take_conflict_receiver(&self) -> mpsc::UnboundedReceiver<CoordinationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.forward.lock().await = Some(tx);
        rx
    }

    pub async fn clear(&self) {
        *self.forward.lock().await = None;
    }
}

impl Default for ConflictEventRouter {
    fn default() -> Self {
        Self { forward: Mutex::new(None) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_event_is_queued_with_bracketed_prefix() {
        let router = ConflictEventRouter::new();
        let queue = Arc::new(MessageQueue::new());
        let (tx, rx) = mpsc::unbounded_channel();
        router.spawn(rx, queue.clone());

        tx.send(CoordinationEvent::Broadcast { sender: "B".into(), text: "found the loader".into() }).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        let drained = queue.drain().await;
        assert_eq!(drained, vec!["[broadcast] B: found the loader".to_string()]);
    }

    #[tokio::test]
    async fn conflict_event_is_forwarded_only_to_a_registered_receiver() {
        let router = ConflictEventRouter::new();
        let queue = Arc::new(MessageQueue::new());
        let (tx, rx) = mpsc::unbounded_channel();
        router.spawn(rx, queue.clone());

        let mut conflict_rx = router.take_conflict_receiver().await;
        tx.send(CoordinationEvent::Conflict { channel: "#conflict_500_rename".into(), sender: "B".into(), text: "hi".into() })
            .unwrap();

        let received = conflict_rx.recv().await.unwrap();
        match received {
            CoordinationEvent::Conflict { sender, .. } => assert_eq!(sender, "B"),
            other => panic!("unexpected event: {:?}", other),
        }
        // nothing leaked into the general queue
        assert!(queue.is_empty().await);
    }
}
