//! Registration of the concrete built-in tools, and the driver-facing
//! dispatch wrapper (§4.5 step 7): tool execution must never produce an
//! `Err` that the driver has to branch on — a failing tool is just another
//! tool result, with `is_error` set, fed back to the model like any other.

use serde_json::json;
use std::sync::Arc;

use crate::host::HostAnalysis;
use crate::memory::MemoryStore;
use crate::patch::PatchManager;
use crate::tools::builtin::{
    ApplyAssemblyPatchTool, ApplyBytePatchTool, ApplySegmentInjectionTool, DecompileTool, DisassembleTool,
    GetAnalysisTool, ListFunctionsTool, ReadBytesTool, RenameVariableTool, SearchFunctionsTool, SetCommentTool,
    SetFunctionNameTool, SetFunctionPrototypeTool, SetLocalTypeTool, SetNameTool, SetVariableTypeTool,
    StoreAnalysisTool, XrefsFromTool, XrefsToTool,
};
use crate::tools::ToolRegistry;
use crate::types::content::{ContentBlock, ToolResult, ToolResultContent};
use crate::types::ToolUse;

fn tool_result_block(tool_use_id: String, content: ToolResultContent, is_error: bool) -> ContentBlock {
    ContentBlock::ToolResult(ToolResult { tool_use_id, content, is_error, cache_control: None })
}

/// Registers every built-in tool (§4.1, §6) against `registry`, in the
/// fixed order below — insertion order is the order the catalog is sent to
/// the model in, and a stable order keeps the tool-catalog cache breakpoint
/// valid across requests (§4.5 step 1).
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    host: Arc<dyn HostAnalysis>,
    patch_manager: Arc<PatchManager>,
    memory_store: Arc<MemoryStore>,
) {
    registry.register(Arc::new(ListFunctionsTool::new(host.clone())));
    registry.register(Arc::new(SearchFunctionsTool::new(host.clone())));
    registry.register(Arc::new(DecompileTool::new(host.clone())));
    registry.register(Arc::new(DisassembleTool::new(host.clone())));
    registry.register(Arc::new(XrefsToTool::new(host.clone())));
    registry.register(Arc::new(XrefsFromTool::new(host.clone())));
    registry.register(Arc::new(ReadBytesTool::new(host.clone())));
    registry.register(Arc::new(SetNameTool::new(host.clone())));
    registry.register(Arc::new(SetFunctionNameTool::new(host.clone())));
    registry.register(Arc::new(RenameVariableTool::new(host.clone())));
    registry.register(Arc::new(SetVariableTypeTool::new(host.clone())));
    registry.register(Arc::new(SetLocalTypeTool::new(host.clone())));
    registry.register(Arc::new(SetCommentTool::new(host.clone())));
    registry.register(Arc::new(SetFunctionPrototypeTool::new(host)));
    registry.register(Arc::new(ApplyBytePatchTool::new(patch_manager.clone())));
    registry.register(Arc::new(ApplyAssemblyPatchTool::new(patch_manager.clone())));
    registry.register(Arc::new(ApplySegmentInjectionTool::new(patch_manager)));
    registry.register(Arc::new(StoreAnalysisTool::new(memory_store.clone())));
    registry.register(Arc::new(GetAnalysisTool::new(memory_store)));
}

/// Executes one tool-use block against `registry` and returns a tool-result
/// content block that is always `Ok` — a registry-level failure (unknown
/// tool, bad arguments, or a tool that itself reported `success: false`)
/// becomes `is_error: true` rather than propagating up to the driver.
pub async fn dispatch_tool_use(registry: &ToolRegistry, tool_use: &ToolUse) -> ContentBlock {
    match registry.execute(&tool_use.name, tool_use.input.clone()).await {
        Ok(value) => {
            let is_error = value.get("success").and_then(|v| v.as_bool()) == Some(false);
            tool_result_block(tool_use.id.clone(), ToolResultContent::Json(value), is_error)
        }
        Err(e) => tool_result_block(
            tool_use.id.clone(),
            ToolResultContent::Json(json!({"success": false, "error": e.to_string()})),
            true,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;

    #[tokio::test]
    async fn dispatch_reports_unknown_tool_as_error_result_not_a_failure() {
        let registry = ToolRegistry::new();
        let tool_use = ToolUse { id: "t1".into(), name: "nonexistent".into(), input: json!({}) };
        let block = dispatch_tool_use(&registry, &tool_use).await;
        let ContentBlock::ToolResult(result) = block else { panic!("expected a tool result") };
        assert!(result.is_error);
        assert_eq!(result.tool_use_id, "t1");
    }

    #[tokio::test]
    async fn dispatch_surfaces_tool_reported_failure_as_error_result() {
        let registry = ToolRegistry::new();
        let host: Arc<dyn HostAnalysis> = Arc::new(FakeHost::new());
        let patch_manager = Arc::new(PatchManager::new(host.clone()));
        let memory_store = Arc::new(MemoryStore::new());
        register_builtin_tools(&registry, host, patch_manager, memory_store);

        let tool_use = ToolUse {
            id: "t1".into(),
            name: "apply_byte_patch".into(),
            input: json!({"address": "0x1000", "original_hex": "90", "new_hex": "cc", "description": "trap"}),
        };
        let block = dispatch_tool_use(&registry, &tool_use).await;
        let ContentBlock::ToolResult(result) = block else { panic!("expected a tool result") };
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn dispatch_reports_successful_tool_call_without_error_flag() {
        let registry = ToolRegistry::new();
        let host: Arc<dyn HostAnalysis> = Arc::new(FakeHost::new());
        let patch_manager = Arc::new(PatchManager::new(host.clone()));
        let memory_store = Arc::new(MemoryStore::new());
        register_builtin_tools(&registry, host, patch_manager, memory_store);

        let tool_use = ToolUse { id: "t1".into(), name: "list_functions".into(), input: json!({}) };
        let block = dispatch_tool_use(&registry, &tool_use).await;
        let ContentBlock::ToolResult(result) = block else { panic!("expected a tool result") };
        assert!(!result.is_error);
    }
}
