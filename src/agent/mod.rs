//! Per-agent runtime (§4): the LLM Driver's execution loop plus the
//! collaborators it owns directly — cache-breakpoint reshaping, context
//! consolidation, the OAuth refresh path, the grader, conflict-event
//! routing, and the small state types the loop turns through.

mod cache;
mod consolidation;
mod coordination_router;
mod driver;
mod grader;
mod oauth;
mod state;

pub use cache::{reshape_cache_markers, MAX_CACHE_BREAKPOINTS};
pub use consolidation::{begin_consolidation, build_continuation_message, extract_summary, CONSOLIDATION_REQUEST_TEXT};
pub use coordination_router::ConflictEventRouter;
pub use driver::{Driver, DriverDeps};
pub use grader::{surface_last_assistant_text, Grader, GraderVerdict, GRADER_FEEDBACK_MARKER};
pub use oauth::{AnthropicOAuthRefresher, OAuthRefreshError, OAuthRefreshResult, OAuthRefresher};
pub use state::{AgentRunState, DriverTask, ExecutionState, PendingToolUse, SessionUsage};
