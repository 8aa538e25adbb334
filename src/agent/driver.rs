//! LLM Driver (§4.5): the per-agent loop that drives one `ExecutionState`
//! through the model, the Tool Registry, the Conflict Coordinator, and the
//! Grader, iteration by iteration, until it pauses, completes, or goes idle.
//! Grounded in the teacher's `agent/engine.rs` `AgentEngine` for the overall
//! shape of a state-machine loop driving an LLM conversation forward one
//! turn at a time; the twelve numbered steps below are this crate's own
//! procedure, not the teacher's (its turn loop is a single-shot send/stream/
//! tool-round trip with no conflict coordination or consolidation).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::{AgentModelConfig, CredentialStore, GraderConfig, LoopConfig};
use crate::conflict::{ConflictCoordinator, ConflictDetector, ConflictOutcome, ConflictTrigger};
use crate::event_bus::{Event, EventBus, EventKind, LogLevel, ToolCallPhase};
use crate::llm::{AnthropicClient, LlmError, LlmRequest, LlmResponse, StopReason, ThinkingConfig};
use crate::memory::{MemoryStore, QueryFilter};
use crate::queue::MessageQueue;
use crate::tools::{dispatch_tool_use, ToolRegistry};
use crate::types::content::{ContentBlock, ToolResultContent};
use crate::types::{AgentId, Message, Role};

use super::cache::reshape_cache_markers;
use super::consolidation::{begin_consolidation, build_continuation_message, extract_summary};
use super::coordination_router::ConflictEventRouter;
use super::grader::{surface_last_assistant_text, Grader, GraderVerdict, GRADER_FEEDBACK_MARKER};
use super::oauth::OAuthRefresher;
use super::state::{AgentRunState, DriverTask, ExecutionState};

const SYSTEM_PROMPT: &str = "You are an autonomous reverse-engineering agent working inside a shared \
binary analysis session alongside other agents. Use the available tools to explore, annotate, and \
patch the target. Store durable findings in the analysis memory as you go, since your conversation \
may be consolidated and your tool-call history discarded. When another agent has already written to \
something you are about to change, you will be pulled into a conflict channel to agree on one outcome \
before your write proceeds.";

/// Everything the driver needs to run one agent's loop. Constructed once per
/// agent and handed to `Driver::new`; every field is a shared collaborator
/// (§6), not owned state — the driver itself owns only the conversation
/// (`ExecutionState`) and its run state.
pub struct DriverDeps {
    pub agent_id: AgentId,
    pub binary_id: String,
    pub llm: Arc<AnthropicClient>,
    pub credentials: Arc<CredentialStore>,
    pub refresher: Arc<dyn OAuthRefresher>,
    pub tools: Arc<ToolRegistry>,
    pub conflict_detector: Arc<ConflictDetector>,
    pub conflict_coordinator: Option<Arc<ConflictCoordinator>>,
    pub conflict_router: Option<Arc<ConflictEventRouter>>,
    pub event_bus: Arc<EventBus>,
    pub memory: Arc<MemoryStore>,
    pub injected: Arc<MessageQueue>,
    pub loop_config: LoopConfig,
    pub grader_config: GraderConfig,
    pub agent_model: AgentModelConfig,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// What a non-success LLM response means for the state machine (§7): a
/// recoverable error leaves the conversation valid and pauses the agent; an
/// unrecoverable one invalidates it.
enum Recoverability {
    Recoverable,
    Unrecoverable,
}

fn classify_non_success(error: &LlmError) -> Recoverability {
    match error {
        LlmError::TransientTransport(_) => Recoverability::Recoverable,
        // A second AuthExpired after the refresh-and-retry in step 3 is
        // downgraded to transient per §7, rather than treated as a protocol
        // failure — the credentials might simply need another refresh cycle.
        LlmError::AuthExpired => Recoverability::Recoverable,
        LlmError::ModelBudget(_) => Recoverability::Recoverable,
        LlmError::ProtocolError(_) => Recoverability::Unrecoverable,
    }
}

/// Pulls an `address` field (hex string, with or without `0x`) out of a tool
/// call's input, for conflict-detection keying. Tools with no address
/// concept (e.g. `store_analysis`) simply opt out of conflict detection.
fn extract_address(input: &serde_json::Value) -> Option<u64> {
    let raw = input.get("address")?.as_str()?;
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).ok()
}

/// Which input field carries the "new value" for a given write tool, used to
/// graft an agreed consensus payload onto the originally-conflicting call
/// before it is re-executed (§4.10 `ConflictOutcome::Proceed`).
fn consensus_field_for(tool_name: &str) -> Option<&'static str> {
    match tool_name {
        "set_name" | "set_function_name" | "rename_variable" => Some("name"),
        "set_comment" => Some("comment"),
        "set_function_prototype" => Some("prototype"),
        "set_variable_type" | "set_local_type" => Some("type"),
        _ => None,
    }
}

/// Overwrites the tool's designated value field with the agreed consensus
/// text, leaving every other argument (address, tool-specific identifiers)
/// untouched.
fn apply_consensus_payload(tool_name: &str, mut input: serde_json::Value, payload: &str) -> serde_json::Value {
    if let Some(field) = consensus_field_for(tool_name) {
        if let Some(obj) = input.as_object_mut() {
            obj.insert(field.to_string(), serde_json::Value::String(payload.to_string()));
        }
    }
    input
}

/// Builds a short digest of recent memory entries for the grader's second
/// pass, newest first, capped so it never dwarfs the grader's own prompt
/// budget.
fn summarize_stored_analyses(store: &MemoryStore) -> String {
    let entries = store.get(&QueryFilter::default()).unwrap_or_default();
    if entries.is_empty() {
        return "(none stored)".to_string();
    }
    entries
        .iter()
        .take(50)
        .map(|e| format!("- [{:?}] {}: {}", e.category, e.key, e.content))
        .collect::<Vec<_>>()
        .join("\n")
}

pub struct Driver {
    deps: DriverDeps,
    grader: Option<Grader>,
    state: AsyncMutex<ExecutionState>,
    run_state: AsyncMutex<AgentRunState>,
    stop: Arc<AtomicBool>,
    /// Preserved across a consolidation rebuild so the continuation message
    /// can reference what the user actually asked for.
    original_task: AsyncMutex<String>,
}

impl Driver {
    pub fn new(deps: DriverDeps) -> Self {
        let grader = if deps.grader_config.enabled {
            Some(Grader::new(AnthropicClient::new(), deps.grader_config.clone()))
        } else {
            None
        };
        Self {
            deps,
            grader,
            state: AsyncMutex::new(ExecutionState::new()),
            run_state: AsyncMutex::new(AgentRunState::Idle),
            stop: Arc::new(AtomicBool::new(false)),
            original_task: AsyncMutex::new(String::new()),
        }
    }

    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub async fn run_state(&self) -> AgentRunState {
        *self.run_state.lock().await
    }

    fn emit(&self, kind: EventKind) {
        self.deps.event_bus.publish(self.deps.agent_id.clone(), kind);
    }

    async fn transition(&self, new_state: AgentRunState) {
        *self.run_state.lock().await = new_state;
        self.emit(EventKind::StateChanged { new_state: new_state.to_string() });
    }

    /// The worker loop (§4.5): awakens on `tasks`, driving the agent through
    /// `Running` until it reaches `Paused`, `Idle`, or `Completed`, then
    /// waits for the next task.
    pub async fn run(self: Arc<Self>, mut tasks: tokio::sync::mpsc::Receiver<DriverTask>) {
        while let Some(task) = tasks.recv().await {
            let can_proceed = match &task {
                DriverTask::NewTask(text) => {
                    let mut state = self.state.lock().await;
                    state.reset_for_new_task();
                    state.messages.push(Message::user(text.clone()));
                    *self.original_task.lock().await = text.clone();
                    true
                }
                DriverTask::Resume => {
                    let state = self.state.lock().await;
                    let run_state = *self.run_state.lock().await;
                    run_state == AgentRunState::Paused && state.valid
                }
                DriverTask::Continue(text) => {
                    let run_state = *self.run_state.lock().await;
                    if run_state == AgentRunState::Completed {
                        let mut state = self.state.lock().await;
                        state.messages.push(Message::user(text.clone()));
                        true
                    } else {
                        false
                    }
                }
            };

            if !can_proceed {
                tracing::warn!(?task, "driver task rejected: agent not in a state that accepts it");
                continue;
            }

            self.stop.store(false, Ordering::SeqCst);
            self.transition(AgentRunState::Running).await;
            self.drive_to_pause_or_complete().await;
        }
    }

    /// Runs iterations until the agent reaches `Paused`, `Idle`, or
    /// `Completed` (§4.5's twelve-step body, looped).
    async fn drive_to_pause_or_complete(&self) {
        loop {
            if self.stop.load(Ordering::SeqCst) {
                self.transition(AgentRunState::Paused).await;
                return;
            }

            let outcome = self.run_one_iteration().await;
            match outcome {
                IterationOutcome::Continue => continue,
                IterationOutcome::Paused => {
                    self.transition(AgentRunState::Paused).await;
                    return;
                }
                IterationOutcome::Idle => {
                    self.transition(AgentRunState::Idle).await;
                    return;
                }
                IterationOutcome::Completed => {
                    self.transition(AgentRunState::Completed).await;
                    return;
                }
            }
        }
    }

    async fn run_one_iteration(&self) -> IterationOutcome {
        let mut state = self.state.lock().await;
        state.iteration += 1;
        let iteration = state.iteration;

        // Step 1: cache reshaping, skipped on the very first iteration of a
        // fresh task since there is nothing yet to re-anchor.
        if iteration > 1 {
            reshape_cache_markers(&mut state.messages);
        }

        // Step 2: begin consolidation if the last turn blew the context
        // budget and one isn't already in flight.
        if state.total_tokens_last_turn() > self.deps.loop_config.context_limit && !state.consolidating {
            begin_consolidation(&mut state.messages);
            state.consolidating = true;
            self.emit(EventKind::ContextConsolidation { status: "started".to_string() });
            return IterationOutcome::Continue;
        }

        let model_config = &self.deps.agent_model;
        let request = LlmRequest {
            model: model_config.model.clone(),
            system_prompt: SYSTEM_PROMPT.to_string(),
            messages: state.messages.clone(),
            tools: self.deps.tools.api_definitions(),
            max_tokens: model_config.max_tokens,
            thinking: model_config.enable_thinking.then_some(ThinkingConfig {
                enabled: true,
                budget_tokens: model_config.max_thinking_tokens,
                interleaved: model_config.enable_interleaved_thinking,
            }),
            temperature: model_config.temperature,
        };
        drop(state);

        // Step 3: send, retrying once through the OAuth refresher on an
        // expired-token response.
        let response = match self.send_with_auth_retry(&request).await {
            Ok(r) => r,
            Err(e) => {
                self.emit(EventKind::Error { text: e.to_string() });
                // Step 4: classify and leave.
                return match classify_non_success(&e) {
                    Recoverability::Recoverable => IterationOutcome::Paused,
                    Recoverability::Unrecoverable => {
                        self.state.lock().await.valid = false;
                        IterationOutcome::Idle
                    }
                };
            }
        };

        let mut state = self.state.lock().await;

        // Step 5: append the assistant turn verbatim, thinking blocks and all.
        state.messages.push(response.message.clone());

        // Step 6: account tokens, publish a metric.
        state.account(response.usage);
        self.emit(EventKind::Metric {
            payload: serde_json::json!({
                "iteration": iteration,
                "input_tokens": response.usage.input_tokens,
                "output_tokens": response.usage.output_tokens,
                "cache_read_tokens": response.usage.cache_read_tokens,
                "cache_creation_tokens": response.usage.cache_creation_tokens,
            }),
        });

        let tool_uses: Vec<_> = response.message.tool_uses().into_iter().cloned().collect();
        drop(state);

        // Step 7: execute each tool-use block in order, conflict-checking
        // writes first.
        let mut result_blocks = Vec::with_capacity(tool_uses.len());
        for tool_use in &tool_uses {
            self.emit(EventKind::ToolCall {
                phase: ToolCallPhase::Started,
                id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                input: tool_use.input.clone(),
                result: None,
            });

            let mut effective_input = tool_use.input.clone();
            if let Some(address) = extract_address(&tool_use.input) {
                let record = crate::conflict::ToolCallRecord {
                    tool_name: tool_use.name.clone(),
                    address,
                    params: tool_use.input.clone(),
                    agent_id: self.deps.agent_id.clone(),
                    timestamp: now_unix(),
                };
                let prior = self
                    .deps
                    .conflict_detector
                    .check_conflict(&self.deps.binary_id, &tool_use.name, address, &self.deps.agent_id)
                    .unwrap_or_default();

                if !prior.is_empty() {
                    if let Some(resolved) = self.resolve_conflict(&tool_use.name, address, &tool_use.input, prior).await {
                        match resolved {
                            ConflictOutcome::Proceed { payload } => {
                                effective_input = apply_consensus_payload(&tool_use.name, effective_input, &payload);
                            }
                            ConflictOutcome::Abandoned => {
                                let block = ContentBlock::ToolResult(crate::types::content::ToolResult {
                                    tool_use_id: tool_use.id.clone(),
                                    content: ToolResultContent::Json(serde_json::json!({
                                        "success": false,
                                        "error": "conflict abandoned: no consensus reached before the deadline",
                                    })),
                                    is_error: true,
                                    cache_control: None,
                                });
                                result_blocks.push(block);
                                continue;
                            }
                        }
                    }
                }

                let _ = self.deps.conflict_detector.record(&self.deps.binary_id, record);
            }

            let tool_use_effective = crate::types::content::ToolUse {
                id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                input: effective_input,
            };
            let block = dispatch_tool_use(&self.deps.tools, &tool_use_effective).await;
            let result_json = if let ContentBlock::ToolResult(tr) = &block { Some(tr.content.as_text()) } else { None };
            self.emit(EventKind::ToolCall {
                phase: ToolCallPhase::Completed,
                id: tool_use.id.clone(),
                name: tool_use.name.clone(),
                input: tool_use_effective.input.clone(),
                result: result_json.map(|t| serde_json::Value::String(t)),
            });
            result_blocks.push(block);
        }

        let mut state = self.state.lock().await;

        // Step 8: if consolidating, this response *is* the consolidation
        // reply; extract and rebuild instead of treating it as ordinary work.
        if state.consolidating {
            let (summary, keys) = extract_summary(&response.message, &self.deps.memory);
            let task = self.original_task.lock().await.clone();
            let continuation = build_continuation_message(&task, &summary, &keys);
            state.rebuild_after_consolidation();
            state.messages.push(continuation);
            self.emit(EventKind::ContextConsolidation { status: "completed".to_string() });
            return IterationOutcome::Continue;
        }

        // Step 9: merge tool results into a single user message.
        if !result_blocks.is_empty() {
            state.messages.push(Message { role: Role::User, content: result_blocks });
        }

        // Step 10: drain injected messages onto the latest user message, or
        // push a standalone one if the transcript doesn't currently end on
        // a user turn.
        let injected = self.deps.injected.drain().await;
        if !injected.is_empty() {
            let combined = injected.join("\n");
            match state.messages.last_mut() {
                Some(last) if last.role == Role::User => last.content.push(ContentBlock::text(combined)),
                _ => state.messages.push(Message::user(combined)),
            }
            self.emit(EventKind::UserMessage { text: combined });
        }

        let no_tool_calls = tool_uses.is_empty();
        let stop_reason = response.stop_reason;
        let consolidating = state.consolidating;
        drop(state);

        // Step 11: engage the grader once the model has ended its turn with
        // no further tool calls, past the first iteration, outside
        // consolidation.
        if stop_reason == StopReason::EndTurn && no_tool_calls && iteration > 1 && !consolidating {
            return self.engage_grader().await;
        }

        // Step 12: truncate on iteration budget exhaustion.
        if iteration >= self.deps.loop_config.max_iterations {
            self.emit(EventKind::AnalysisResult { text: "truncated: reached max_iterations".to_string() });
            return IterationOutcome::Completed;
        }

        IterationOutcome::Continue
    }

    async fn send_with_auth_retry(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let access_token = match self.deps.credentials.load() {
            Ok(creds) => creds.access_token,
            Err(e) => {
                tracing::warn!(error = %e, "no stored credentials; treating as an expired token");
                return Err(LlmError::AuthExpired);
            }
        };
        let first = self.deps.llm.send(&access_token, request).await;
        match first {
            Err(LlmError::AuthExpired) => match self.deps.refresher.refresh().await {
                Ok(fresh_token) => self.deps.llm.send(&fresh_token, request).await,
                Err(_) => Err(LlmError::TransientTransport("oauth refresh failed".to_string())),
            },
            other => other,
        }
    }

    /// Routes a colliding write through the Conflict Coordinator (§4.10) if
    /// one is configured; returns `None` (meaning: proceed unmodified) when
    /// no coordinator/router pair is wired, which only happens in
    /// single-agent or test configurations with no coordination server.
    async fn resolve_conflict(
        &self,
        tool_name: &str,
        address: u64,
        params: &serde_json::Value,
        prior: Vec<crate::conflict::ToolCallRecord>,
    ) -> Option<ConflictOutcome> {
        let coordinator = self.deps.conflict_coordinator.as_ref()?;
        let router = self.deps.conflict_router.as_ref()?;

        let events = router.take_conflict_receiver().await;
        let trigger = ConflictTrigger { tool_name: tool_name.to_string(), address, params: params.clone() };
        let outcome = coordinator.resolve(&self.deps.agent_id, trigger, prior, events).await;
        router.clear().await;

        match outcome {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                tracing::warn!(error = %e, "conflict resolution failed; proceeding without consensus");
                None
            }
        }
    }

    async fn engage_grader(&self) -> IterationOutcome {
        let Some(grader) = &self.grader else {
            let state = self.state.lock().await;
            let report = surface_last_assistant_text(&state.messages).unwrap_or_default();
            drop(state);
            self.emit(EventKind::AnalysisResult { text: report });
            return IterationOutcome::Completed;
        };

        let access_token = match self.deps.credentials.load() {
            Ok(c) => c.access_token,
            Err(_) => {
                self.emit(EventKind::Error { text: "no credentials available for grader pass".to_string() });
                return IterationOutcome::Paused;
            }
        };

        let summary = summarize_stored_analyses(&self.deps.memory);
        let state = self.state.lock().await;
        let verdict: Result<GraderVerdict, _> = grader.grade(&access_token, &state.messages, &summary).await;
        drop(state);

        let verdict = match verdict {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "grader call failed; treating investigation as incomplete");
                self.emit(EventKind::Error { text: format!("grader call failed: {e}") });
                return IterationOutcome::Paused;
            }
        };

        self.emit(EventKind::GraderFeedback { text: verdict.response_text.clone() });

        if verdict.complete {
            self.emit(EventKind::AnalysisResult { text: verdict.response_text });
            IterationOutcome::Completed
        } else {
            let mut state = self.state.lock().await;
            state.messages.push(Message::user(format!("{GRADER_FEEDBACK_MARKER} {}", verdict.response_text)));
            IterationOutcome::Continue
        }
    }
}

enum IterationOutcome {
    Continue,
    Paused,
    Idle,
    Completed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_address_parses_0x_prefixed_hex() {
        let input = serde_json::json!({"address": "0x401000"});
        assert_eq!(extract_address(&input), Some(0x401000));
    }

    #[test]
    fn extract_address_is_none_when_field_absent() {
        let input = serde_json::json!({"key": "finding_1"});
        assert_eq!(extract_address(&input), None);
    }

    #[test]
    fn apply_consensus_payload_overwrites_the_name_field_for_rename_tools() {
        let input = serde_json::json!({"address": "0x1000", "name": "sub_1000"});
        let updated = apply_consensus_payload("set_function_name", input, "decrypt_buffer");
        assert_eq!(updated["name"], "decrypt_buffer");
        assert_eq!(updated["address"], "0x1000");
    }

    #[test]
    fn apply_consensus_payload_leaves_input_untouched_for_tools_without_a_designated_field() {
        let input = serde_json::json!({"address": "0x1000", "original_hex": "90", "new_hex": "cc"});
        let updated = apply_consensus_payload("apply_byte_patch", input.clone(), "anything");
        assert_eq!(updated, input);
    }

    #[test]
    fn classify_protocol_error_is_unrecoverable() {
        assert!(matches!(classify_non_success(&LlmError::ProtocolError("bad request".into())), Recoverability::Unrecoverable));
    }

    #[test]
    fn classify_transient_transport_is_recoverable() {
        assert!(matches!(classify_non_success(&LlmError::TransientTransport("503".into())), Recoverability::Recoverable));
    }

    #[test]
    fn summarize_stored_analyses_reports_none_when_store_is_empty() {
        let store = MemoryStore::new();
        assert_eq!(summarize_stored_analyses(&store), "(none stored)");
    }

    #[test]
    fn summarize_stored_analyses_includes_key_and_content() {
        let store = MemoryStore::new();
        store.store("entry_point", "located at 0x401000", crate::memory::AnalysisCategory::Finding, Some(0x401000), vec![], 1);
        let summary = summarize_stored_analyses(&store);
        assert!(summary.contains("entry_point"));
        assert!(summary.contains("0x401000"));
    }
}
