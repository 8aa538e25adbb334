//! Coordination frames transmitted line-oriented over chat-server channels
//! (§3 Coordination Frame, §6 wire formats). Four families: free-form
//! discussion, the `CONFLICT_FORCE` join directive, `MARKED_CONSENSUS`
//! assent, and the `LLDB_*` debugger-broker request/response frames.
//! Wire formats are bit-exact per distilled spec §6, grounded in
//! `original_source/agent/agent_irc_tools.h` and
//! `original_source/agent/agent_lldb_tools.h` for the frame vocabulary.

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationFrame {
    FreeForm(String),
    ConflictForce { target_agent: String, channel: String },
    MarkedConsensus { agent: String, payload: String },
    Lldb(LldbFrame),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LldbFrame {
    StartSession { request_id: String, agent_id: String, timeout_ms: u64 },
    SendCommand { request_id: String, session_id: String, agent_id: String, command: String },
    ConvertAddress { request_id: String, session_id: String, agent_id: String, ida_address: String },
    StopSession { request_id: String, session_id: String, agent_id: String },
}

/// A `SYSTEM`-sender notification (`AGENT_JOIN:<id>|<task>` /
/// `AGENT_LEAVE:<id>`), distinct from `CoordinationFrame` because it is
/// identified by sender, not payload prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemNotification {
    AgentJoin { agent_id: String, task: String },
    AgentLeave { agent_id: String },
}

pub fn parse_system_notification(payload: &str) -> Option<SystemNotification> {
    if let Some(rest) = payload.strip_prefix("AGENT_JOIN:") {
        let (id, task) = rest.split_once('|')?;
        return Some(SystemNotification::AgentJoin { agent_id: id.to_string(), task: task.to_string() });
    }
    if let Some(rest) = payload.strip_prefix("AGENT_LEAVE:") {
        return Some(SystemNotification::AgentLeave { agent_id: rest.to_string() });
    }
    None
}

pub fn parse_frame(text: &str) -> CoordinationFrame {
    if let Some(rest) = text.strip_prefix("CONFLICT_FORCE:") {
        let mut parts = rest.splitn(2, ':');
        if let (Some(target), Some(channel)) = (parts.next(), parts.next()) {
            return CoordinationFrame::ConflictForce {
                target_agent: target.to_string(),
                channel: channel.to_string(),
            };
        }
    }

    if let Some(rest) = text.strip_prefix("MARKED_CONSENSUS|") {
        if let Some((agent, payload)) = rest.split_once('|') {
            return CoordinationFrame::MarkedConsensus {
                agent: agent.to_string(),
                payload: payload.to_string(),
            };
        }
    }

    if let Some(frame) = parse_lldb(text) {
        return CoordinationFrame::Lldb(frame);
    }

    CoordinationFrame::FreeForm(text.to_string())
}

fn parse_lldb(text: &str) -> Option<LldbFrame> {
    let mut fields = text.split('|');
    let tag = fields.next()?;
    match tag {
        "LLDB_START_SESSION" => {
            let request_id = fields.next()?.to_string();
            let agent_id = fields.next()?.to_string();
            let timeout_ms: u64 = fields.next()?.parse().ok()?;
            Some(LldbFrame::StartSession { request_id, agent_id, timeout_ms })
        }
        "LLDB_SEND_COMMAND" => {
            let request_id = fields.next()?.to_string();
            let session_id = fields.next()?.to_string();
            let agent_id = fields.next()?.to_string();
            let command = fields.next()?.to_string();
            Some(LldbFrame::SendCommand { request_id, session_id, agent_id, command })
        }
        "LLDB_CONVERT_ADDRESS" => {
            let request_id = fields.next()?.to_string();
            let session_id = fields.next()?.to_string();
            let agent_id = fields.next()?.to_string();
            let ida_address = fields.next()?.to_string();
            Some(LldbFrame::ConvertAddress { request_id, session_id, agent_id, ida_address })
        }
        "LLDB_STOP_SESSION" => {
            let request_id = fields.next()?.to_string();
            let session_id = fields.next()?.to_string();
            let agent_id = fields.next()?.to_string();
            Some(LldbFrame::StopSession { request_id, session_id, agent_id })
        }
        _ => None,
    }
}

impl fmt::Display for CoordinationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordinationFrame::FreeForm(s) => write!(f, "{}", s),
            CoordinationFrame::ConflictForce { target_agent, channel } => {
                write!(f, "CONFLICT_FORCE:{}:{}", target_agent, channel)
            }
            CoordinationFrame::MarkedConsensus { agent, payload } => {
                write!(f, "MARKED_CONSENSUS|{}|{}", agent, payload)
            }
            CoordinationFrame::Lldb(frame) => write!(f, "{}", frame),
        }
    }
}

impl fmt::Display for LldbFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LldbFrame::StartSession { request_id, agent_id, timeout_ms } => {
                write!(f, "LLDB_START_SESSION|{}|{}|{}", request_id, agent_id, timeout_ms)
            }
            LldbFrame::SendCommand { request_id, session_id, agent_id, command } => {
                write!(f, "LLDB_SEND_COMMAND|{}|{}|{}|{}", request_id, session_id, agent_id, command)
            }
            LldbFrame::ConvertAddress { request_id, session_id, agent_id, ida_address } => {
                write!(f, "LLDB_CONVERT_ADDRESS|{}|{}|{}|{}", request_id, session_id, agent_id, ida_address)
            }
            LldbFrame::StopSession { request_id, session_id, agent_id } => {
                write!(f, "LLDB_STOP_SESSION|{}|{}|{}", request_id, session_id, agent_id)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_force_round_trips() {
        let frame = CoordinationFrame::ConflictForce { target_agent: "A".into(), channel: "#conflict_500_rename".into() };
        let wire = frame.to_string();
        assert_eq!(wire, "CONFLICT_FORCE:A:#conflict_500_rename");
        assert_eq!(parse_frame(&wire), frame);
    }

    #[test]
    fn marked_consensus_round_trips_with_embedded_spaces() {
        let frame = CoordinationFrame::MarkedConsensus { agent: "A".into(), payload: "rename 0x500 to baz".into() };
        let wire = frame.to_string();
        assert_eq!(wire, "MARKED_CONSENSUS|A|rename 0x500 to baz");
        assert_eq!(parse_frame(&wire), frame);
    }

    #[test]
    fn lldb_frames_round_trip() {
        let frame = LldbFrame::SendCommand {
            request_id: "r1".into(),
            session_id: "s1".into(),
            agent_id: "A".into(),
            command: "bt".into(),
        };
        let wire = frame.to_string();
        assert_eq!(wire, "LLDB_SEND_COMMAND|r1|s1|A|bt");
        assert_eq!(parse_frame(&wire), CoordinationFrame::Lldb(frame));
    }

    #[test]
    fn unrecognized_text_is_free_form() {
        assert_eq!(parse_frame("just chatting"), CoordinationFrame::FreeForm("just chatting".into()));
    }

    #[test]
    fn system_notifications_parse() {
        assert_eq!(
            parse_system_notification("AGENT_JOIN:A|analyze main"),
            Some(SystemNotification::AgentJoin { agent_id: "A".into(), task: "analyze main".into() })
        );
        assert_eq!(
            parse_system_notification("AGENT_LEAVE:A"),
            Some(SystemNotification::AgentLeave { agent_id: "A".into() })
        );
    }
}
