//! Connection to the line-oriented chat server (§4.9), implemented as a
//! plain `tokio::net::TcpStream` line protocol rather than WebSocket — the
//! distilled spec's JOIN/PART/PRIVMSG semantics are IRC-shaped, and the
//! teacher's `streams/client.rs` already imports `TcpStream` /
//! `AsyncBufReadExt` alongside its WebSocket path, which this crate takes
//! instead. Reconnect/backoff is grounded directly in that file's
//! `ConnectionHealth` (exponential backoff with jitter, capped attempts).

use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};

use super::frame::{parse_system_notification, SystemNotification};

#[derive(Debug, Error)]
pub enum CoordinationClientError {
    #[error("not connected")]
    NotConnected,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed line: {0}")]
    Malformed(String),
}

pub type Result<T> = std::result::Result<T, CoordinationClientError>;

/// A received, dispatched-by-channel-kind coordination message (§4.9).
#[derive(Debug, Clone)]
pub enum CoordinationEvent {
    Broadcast { sender: String, text: String },
    Private { channel: String, sender: String, text: String },
    Conflict { channel: String, sender: String, text: String },
    PeerJoined { agent_id: String, task: String },
    PeerLeft { agent_id: String },
    ConflictForced { target_agent: String, channel: String },
    Disconnected,
}

/// Tracks connection health for reconnect/backoff decisions, grounded in
/// the teacher's `ConnectionHealth`.
#[derive(Debug, Clone)]
pub struct ConnectionHealth {
    pub failure_count: u32,
    pub reconnect_attempt: u32,
    pub max_reconnect_attempts: u32,
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self { failure_count: 0, reconnect_attempt: 0, max_reconnect_attempts: 5 }
    }
}

impl ConnectionHealth {
    pub fn record_error(&mut self) {
        self.failure_count += 1;
    }

    pub fn record_connected(&mut self) {
        self.failure_count = 0;
        self.reconnect_attempt = 0;
    }

    pub fn should_reconnect(&self) -> bool {
        self.reconnect_attempt < self.max_reconnect_attempts
    }

    /// Exponential backoff, base * 2^attempt, capped at 60s, with +/-20%
    /// jitter so a disconnected swarm doesn't reconnect in lockstep.
    pub fn backoff_delay(&self, base_delay_ms: u64) -> Duration {
        let exp = base_delay_ms.saturating_mul(1u64 << self.reconnect_attempt.min(16));
        let capped = exp.min(60_000);
        let jitter_range = (capped as f64 * 0.2) as i64;
        let jitter = fastrand::i64(-jitter_range..=jitter_range);
        let final_ms = (capped as i64 + jitter).max(0) as u64;
        Duration::from_millis(final_ms)
    }
}

const COMMON_CHANNEL: &str = "#agents";

pub struct CoordinationClient {
    agent_id: String,
    writer: Mutex<Option<tokio::net::tcp::OwnedWriteHalf>>,
    events_tx: mpsc::UnboundedSender<CoordinationEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<CoordinationEvent>>>,
    health: Mutex<ConnectionHealth>,
}

impl CoordinationClient {
    pub fn new(agent_id: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            agent_id: agent_id.into(),
            writer: Mutex::new(None),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
            health: Mutex::new(ConnectionHealth::default()),
        }
    }

    pub async fn take_event_rx(&self) -> Option<mpsc::UnboundedReceiver<CoordinationEvent>> {
        self.events_rx.lock().await.take()
    }

    /// Connects, joins the common channel, and announces `task`. Spawns a
    /// background read loop that dispatches incoming lines to events.
    pub async fn connect(&self, addr: &str, task: &str) -> Result<()> {
        let stream = TcpStream::connect(addr).await?;
        let (read_half, write_half) = stream.into_split();
        *self.writer.lock().await = Some(write_half);
        self.health.lock().await.record_connected();

        self.join(COMMON_CHANNEL).await?;
        self.send(COMMON_CHANNEL, &format!("MY_TASK: {}", task)).await?;

        let events_tx = self.events_tx.clone();
        let agent_id = self.agent_id.clone();
        tokio::spawn(async move {
            let mut reader = BufReader::new(read_half).lines();
            loop {
                match reader.next_line().await {
                    Ok(Some(line)) => dispatch_line(&line, &agent_id, &events_tx),
                    Ok(None) | Err(_) => {
                        let _ = events_tx.send(CoordinationEvent::Disconnected);
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(CoordinationClientError::NotConnected)?;
        writer.write_all(line.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn join(&self, channel: &str) -> Result<()> {
        self.write_line(&format!("JOIN {}", channel)).await
    }

    pub async fn leave(&self, channel: &str) -> Result<()> {
        self.write_line(&format!("PART {}", channel)).await
    }

    pub async fn send(&self, channel: &str, text: &str) -> Result<()> {
        self.write_line(&format!("PRIVMSG {} :{}", channel, text)).await
    }

    pub async fn disconnect(&self) {
        *self.writer.lock().await = None;
    }
}

/// Parses one wire line of the form `:<sender> PRIVMSG <channel> :<text>`
/// and classifies it per §4.9's channel-kind dispatch table.
fn dispatch_line(line: &str, this_agent: &str, tx: &mpsc::UnboundedSender<CoordinationEvent>) {
    let Some(rest) = line.strip_prefix(':') else { return };
    let Some((sender, rest)) = rest.split_once(' ') else { return };
    let Some(rest) = rest.strip_prefix("PRIVMSG ") else { return };
    let Some((channel, text)) = rest.split_once(" :") else { return };

    if sender == "SYSTEM" {
        match parse_system_notification(text) {
            Some(SystemNotification::AgentJoin { agent_id, task }) => {
                let _ = tx.send(CoordinationEvent::PeerJoined { agent_id, task });
            }
            Some(SystemNotification::AgentLeave { agent_id }) => {
                let _ = tx.send(CoordinationEvent::PeerLeft { agent_id });
            }
            None => {}
        }
        return;
    }

    if let Some(rest) = text.strip_prefix("CONFLICT_FORCE:") {
        let mut parts = rest.splitn(2, ':');
        if let (Some(target), Some(force_channel)) = (parts.next(), parts.next()) {
            if target == this_agent {
                let _ = tx.send(CoordinationEvent::ConflictForced {
                    target_agent: target.to_string(),
                    channel: force_channel.to_string(),
                });
                return;
            }
        }
    }

    let event = if channel == COMMON_CHANNEL {
        CoordinationEvent::Broadcast { sender: sender.to_string(), text: text.to_string() }
    } else if channel.starts_with("#private_") {
        CoordinationEvent::Private { channel: channel.to_string(), sender: sender.to_string(), text: text.to_string() }
    } else if channel.starts_with("#conflict_") {
        CoordinationEvent::Conflict { channel: channel.to_string(), sender: sender.to_string(), text: text.to_string() }
    } else {
        CoordinationEvent::Broadcast { sender: sender.to_string(), text: text.to_string() }
    };
    let _ = tx.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn connect_joins_common_channel_and_announces_task() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 256];
            let n = socket.read(&mut buf).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });

        let client = CoordinationClient::new("A");
        client.connect(&addr.to_string(), "analyze main").await.unwrap();

        // give the client a moment to flush both lines
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(client);

        let received = server.await.unwrap();
        assert!(received.contains("JOIN #agents"));
        assert!(received.contains("MY_TASK: analyze main"));
    }

    #[test]
    fn dispatch_classifies_conflict_channel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch_line(":B PRIVMSG #conflict_500_rename :let's talk", "A", &tx);
        match rx.try_recv().unwrap() {
            CoordinationEvent::Conflict { sender, text, .. } => {
                assert_eq!(sender, "B");
                assert_eq!(text, "let's talk");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn dispatch_routes_conflict_force_addressed_to_this_agent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch_line(":B PRIVMSG #agents :CONFLICT_FORCE:A:#conflict_500_rename", "A", &tx);
        match rx.try_recv().unwrap() {
            CoordinationEvent::ConflictForced { target_agent, channel } => {
                assert_eq!(target_agent, "A");
                assert_eq!(channel, "#conflict_500_rename");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn dispatch_ignores_conflict_force_addressed_to_someone_else() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        dispatch_line(":B PRIVMSG #agents :CONFLICT_FORCE:C:#conflict_500_rename", "A", &tx);
        // falls through to a broadcast event instead
        match rx.try_recv().unwrap() {
            CoordinationEvent::Broadcast { .. } => {}
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        let mut health = ConnectionHealth::default();
        health.reconnect_attempt = 0;
        let d0 = health.backoff_delay(100).as_millis();
        health.reconnect_attempt = 10;
        let d10 = health.backoff_delay(100).as_millis();
        assert!(d10 >= d0);
        assert!(d10 <= (60_000f64 * 1.2) as u128);
    }
}
