//! Debugger Broker Client (§4.12): sends `LLDB_*` request frames over the
//! coordination wire and correlates the eventual reply by `request_id`,
//! grounded in `original_source/agent/agent_lldb_tools.h`'s frame
//! vocabulary (already modeled in `coordination::frame::LldbFrame`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, Mutex};

use crate::coordination::{CoordinationClient, CoordinationClientError, LldbFrame};

const DEBUGGER_CHANNEL: &str = "#debugger";

#[derive(Debug, Error)]
pub enum DebuggerError {
    #[error("coordination client error: {0}")]
    Client(#[from] CoordinationClientError),
    #[error("timed out waiting for response to request {0}")]
    Timeout(String),
    #[error("no such pending request: {0}")]
    UnknownRequest(String),
}

pub type Result<T> = std::result::Result<T, DebuggerError>;

fn request_id_of(frame: &LldbFrame) -> &str {
    match frame {
        LldbFrame::StartSession { request_id, .. } => request_id,
        LldbFrame::SendCommand { request_id, .. } => request_id,
        LldbFrame::ConvertAddress { request_id, .. } => request_id,
        LldbFrame::StopSession { request_id, .. } => request_id,
    }
}

pub struct DebuggerBroker {
    client: Arc<CoordinationClient>,
    pending: Mutex<HashMap<String, oneshot::Sender<String>>>,
    response_timeout: Duration,
}

impl DebuggerBroker {
    pub fn new(client: Arc<CoordinationClient>) -> Self {
        Self { client, pending: Mutex::new(HashMap::new()), response_timeout: Duration::from_secs(30) }
    }

    pub fn with_timeout(client: Arc<CoordinationClient>, response_timeout: Duration) -> Self {
        Self { client, pending: Mutex::new(HashMap::new()), response_timeout }
    }

    /// Sends `frame` and awaits the correlated reply, delivered by a caller
    /// invoking `resolve` with the same `request_id` from the coordination
    /// dispatch loop.
    pub async fn request(&self, frame: LldbFrame) -> Result<String> {
        let request_id = request_id_of(&frame).to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(request_id.clone(), tx);

        self.client.send(DEBUGGER_CHANNEL, &frame.to_string()).await?;

        match tokio::time::timeout(self.response_timeout, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(DebuggerError::Timeout(request_id)),
            Err(_) => {
                self.pending.lock().await.remove(&request_id);
                Err(DebuggerError::Timeout(request_id))
            }
        }
    }

    /// Delivers a correlated response, routing it to whichever `request()`
    /// call is waiting on `request_id`. Called from the coordination event
    /// loop when a reply frame for `#debugger` arrives.
    pub async fn resolve(&self, request_id: &str, payload: String) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .await
            .remove(request_id)
            .ok_or_else(|| DebuggerError::UnknownRequest(request_id.to_string()))?;
        let _ = sender.send(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_before_timeout_delivers_payload_to_waiting_request() {
        let client = Arc::new(CoordinationClient::new("A"));
        let broker = Arc::new(DebuggerBroker::with_timeout(client, Duration::from_millis(200)));

        let broker_clone = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            broker_clone.resolve("r1", "(lldb) bt result".to_string()).await.unwrap();
        });

        // request() will error on send() since the client isn't connected;
        // exercise resolve()'s correlation logic directly instead.
        let (tx, rx) = oneshot::channel();
        broker.pending.lock().await.insert("r1".to_string(), tx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(rx.await.unwrap(), "(lldb) bt result");
    }

    #[tokio::test]
    async fn resolve_unknown_request_id_is_an_error() {
        let client = Arc::new(CoordinationClient::new("A"));
        let broker = DebuggerBroker::new(client);
        assert!(broker.resolve("nope", "x".to_string()).await.is_err());
    }

    #[test]
    fn request_id_extraction_covers_all_frame_kinds() {
        assert_eq!(request_id_of(&LldbFrame::StartSession { request_id: "r".into(), agent_id: "a".into(), timeout_ms: 1 }), "r");
        assert_eq!(request_id_of(&LldbFrame::StopSession { request_id: "r".into(), session_id: "s".into(), agent_id: "a".into() }), "r");
    }
}
