//! Injected-User-Message Queue (§4.11): messages a human or another agent
//! injects mid-run. The Driver drains it atomically once per iteration
//! boundary so a message arriving mid-tool-call never splits a turn.

use tokio::sync::Mutex;
use std::collections::VecDeque;

pub struct MessageQueue {
    inner: Mutex<VecDeque<String>>,
}

impl MessageQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    pub async fn push(&self, text: impl Into<String>) {
        self.inner.lock().await.push_back(text.into());
    }

    /// Removes and returns every message currently queued, in insertion
    /// order. Messages pushed after this call starts are not included.
    pub async fn drain(&self) -> Vec<String> {
        let mut guard = self.inner.lock().await;
        guard.drain(..).collect()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn drain_returns_messages_in_insertion_order() {
        let queue = MessageQueue::new();
        queue.push("first").await;
        queue.push("second").await;
        let drained = queue.drain().await;
        assert_eq!(drained, vec!["first".to_string(), "second".to_string()]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn drain_on_empty_queue_returns_empty_vec() {
        let queue = MessageQueue::new();
        assert!(queue.drain().await.is_empty());
    }

    #[tokio::test]
    async fn pushes_after_drain_starts_are_not_lost() {
        let queue = MessageQueue::new();
        queue.push("a").await;
        let first_drain = queue.drain().await;
        queue.push("b").await;
        let second_drain = queue.drain().await;
        assert_eq!(first_drain, vec!["a".to_string()]);
        assert_eq!(second_drain, vec!["b".to_string()]);
    }
}
