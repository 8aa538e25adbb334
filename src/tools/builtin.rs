//! Concrete tool implementations (§4.1, §6): thin `Tool` wrappers over the
//! host disassembler, the patch manager, and the memory store. None of
//! these enforce conflict discipline themselves — per §4.5 step 7, that is
//! the driver's job, performed around `ToolRegistry::execute` rather than
//! inside any one tool.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::host::HostAnalysis;
use crate::memory::{AnalysisCategory, MemoryStore, QueryFilter};
use crate::patch::PatchManager;
use crate::tools::{schema_object, Tool, ToolError, ToolResult};

fn parse_address(input: &Value) -> ToolResult<u64> {
    let raw = input
        .get("address")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments("missing required field: address".to_string()))?;
    let trimmed = raw.trim_start_matches("0x").trim_start_matches("0X");
    u64::from_str_radix(trimmed, 16).map_err(|_| ToolError::InvalidArguments(format!("invalid hex address: {raw}")))
}

fn string_field<'a>(input: &'a Value, field: &str) -> ToolResult<&'a str> {
    input
        .get(field)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing required field: {field}")))
}

pub struct ListFunctionsTool {
    host: Arc<dyn HostAnalysis>,
}

impl ListFunctionsTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for ListFunctionsTool {
    fn name(&self) -> &str {
        "list_functions"
    }
    fn description(&self) -> &str {
        "Lists every function known to the host's analysis database."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[])
    }
    async fn execute(&self, _input: Value) -> ToolResult<Value> {
        let functions = self.host.list_functions().await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "functions": functions.iter().map(|f| json!({
                "address": format!("0x{:x}", f.address),
                "name": f.name,
                "size": f.size,
            })).collect::<Vec<_>>(),
        }))
    }
}

pub struct SearchFunctionsTool {
    host: Arc<dyn HostAnalysis>,
}

impl SearchFunctionsTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for SearchFunctionsTool {
    fn name(&self) -> &str {
        "search_functions"
    }
    fn description(&self) -> &str {
        "Searches function names by substring or pattern."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[("pattern", "string", "substring or pattern to match against function names", true)])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let pattern = string_field(&input, "pattern")?;
        let functions = self.host.search_functions(pattern).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "functions": functions.iter().map(|f| json!({
                "address": format!("0x{:x}", f.address),
                "name": f.name,
            })).collect::<Vec<_>>(),
        }))
    }
}

pub struct DecompileTool {
    host: Arc<dyn HostAnalysis>,
}

impl DecompileTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for DecompileTool {
    fn name(&self) -> &str {
        "decompile"
    }
    fn description(&self) -> &str {
        "Returns the decompiled pseudocode for the function at the given address."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[("address", "string", "hex address of the function", true)])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let code = self.host.decompile(address).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({"success": true, "decompilation": code}))
    }
}

pub struct DisassembleTool {
    host: Arc<dyn HostAnalysis>,
}

impl DisassembleTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for DisassembleTool {
    fn name(&self) -> &str {
        "disassemble"
    }
    fn description(&self) -> &str {
        "Disassembles a byte range starting at the given address."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex start address", true),
            ("length", "integer", "number of bytes to disassemble", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let len = input
            .get("length")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field: length".to_string()))? as usize;
        let asm = self.host.disassemble(address, len).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({"success": true, "disassembly": asm}))
    }
}

pub struct XrefsFromTool {
    host: Arc<dyn HostAnalysis>,
}

impl XrefsFromTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for XrefsFromTool {
    fn name(&self) -> &str {
        "xrefs_from"
    }
    fn description(&self) -> &str {
        "Lists cross-references originating from the given address."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[("address", "string", "hex address", true)])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let xrefs = self.host.xrefs_from(address).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "xrefs": xrefs.iter().map(|x| json!({"from": format!("0x{:x}", x.from), "to": format!("0x{:x}", x.to), "kind": x.kind})).collect::<Vec<_>>(),
        }))
    }
}

pub struct XrefsToTool {
    host: Arc<dyn HostAnalysis>,
}

impl XrefsToTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for XrefsToTool {
    fn name(&self) -> &str {
        "xrefs_to"
    }
    fn description(&self) -> &str {
        "Lists cross-references pointing to the given address."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[("address", "string", "hex address", true)])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let xrefs = self.host.xrefs_to(address).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "xrefs": xrefs.iter().map(|x| json!({"from": format!("0x{:x}", x.from), "to": format!("0x{:x}", x.to), "kind": x.kind})).collect::<Vec<_>>(),
        }))
    }
}

pub struct ReadBytesTool {
    host: Arc<dyn HostAnalysis>,
}

impl ReadBytesTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for ReadBytesTool {
    fn name(&self) -> &str {
        "read_bytes"
    }
    fn description(&self) -> &str {
        "Reads raw bytes from the host's memory image."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex start address", true),
            ("length", "integer", "number of bytes to read", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let len = input
            .get("length")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field: length".to_string()))? as usize;
        let bytes = self.host.read_bytes(address, len).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({"success": true, "bytes": crate::patch::bytes_to_hex_string(&bytes)}))
    }
}

macro_rules! rename_style_tool {
    ($struct_name:ident, $tool_name:literal, $description:literal, $field:literal, $method:ident) => {
        pub struct $struct_name {
            host: Arc<dyn HostAnalysis>,
        }

        impl $struct_name {
            pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
                Self { host }
            }
        }

        #[async_trait]
        impl Tool for $struct_name {
            fn name(&self) -> &str {
                $tool_name
            }
            fn description(&self) -> &str {
                $description
            }
            fn parameters_schema(&self) -> Value {
                schema_object(&[
                    ("address", "string", "hex address", true),
                    ($field, "string", "new value", true),
                ])
            }
            async fn execute(&self, input: Value) -> ToolResult<Value> {
                let address = parse_address(&input)?;
                let value = string_field(&input, $field)?;
                self.host.$method(address, value).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
                Ok(json!({"success": true, "address": format!("0x{:x}", address), $field: value}))
            }
        }
    };
}

// `set_name`, `set_function_name`, and `rename_variable` all land on
// `HostAnalysis::set_name` — the catalog gives them distinct tool names (and
// hence distinct prompts) because a function rename and a local-variable
// rename are different actions to the model, but the host only tracks one
// flat name overlay, so they collide under the same `ToolClass::Rename`
// class in `tools/catalog.rs`.
rename_style_tool!(SetNameTool, "set_name", "Renames the symbol at the given address.", "name", set_name);
rename_style_tool!(
    SetFunctionNameTool,
    "set_function_name",
    "Renames the function at the given address.",
    "name",
    set_name
);
rename_style_tool!(
    RenameVariableTool,
    "rename_variable",
    "Renames a local variable, identified by its containing function's address.",
    "name",
    set_name
);
rename_style_tool!(SetCommentTool, "set_comment", "Sets a comment at the given address.", "comment", set_comment);
rename_style_tool!(
    SetFunctionPrototypeTool,
    "set_function_prototype",
    "Sets the C-style prototype for the function at the given address.",
    "prototype",
    set_function_prototype
);

pub struct SetVariableTypeTool {
    host: Arc<dyn HostAnalysis>,
}

impl SetVariableTypeTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for SetVariableTypeTool {
    fn name(&self) -> &str {
        "set_variable_type"
    }
    fn description(&self) -> &str {
        "Sets the declared type of a local variable."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex address of the containing function", true),
            ("variable", "string", "variable name", true),
            ("type", "string", "new C-style type", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let variable = string_field(&input, "variable")?;
        let ty = string_field(&input, "type")?;
        self.host.set_variable_type(address, variable, ty).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({"success": true, "variable": variable, "type": ty}))
    }
}

pub struct SetLocalTypeTool {
    host: Arc<dyn HostAnalysis>,
}

impl SetLocalTypeTool {
    pub fn new(host: Arc<dyn HostAnalysis>) -> Self {
        Self { host }
    }
}

#[async_trait]
impl Tool for SetLocalTypeTool {
    fn name(&self) -> &str {
        "set_local_type"
    }
    fn description(&self) -> &str {
        "Sets the declared type of a stack-local variable, an alias of set_variable_type for locals specifically."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex address of the containing function", true),
            ("variable", "string", "local variable name", true),
            ("type", "string", "new C-style type", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let variable = string_field(&input, "variable")?;
        let ty = string_field(&input, "type")?;
        self.host.set_variable_type(address, variable, ty).await.map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({"success": true, "variable": variable, "type": ty}))
    }
}

pub struct ApplyBytePatchTool {
    manager: Arc<PatchManager>,
}

impl ApplyBytePatchTool {
    pub fn new(manager: Arc<PatchManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ApplyBytePatchTool {
    fn name(&self) -> &str {
        "apply_byte_patch"
    }
    fn description(&self) -> &str {
        "Overwrites raw bytes at an address after verifying the current bytes match what the caller expects."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex address", true),
            ("original_hex", "string", "expected current bytes, as hex", true),
            ("new_hex", "string", "replacement bytes, as hex", true),
            ("description", "string", "human-readable reason for the patch", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let original_hex = string_field(&input, "original_hex")?;
        let new_hex = string_field(&input, "new_hex")?;
        let description = string_field(&input, "description")?;
        let now = input.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
        match self.manager.apply_byte_patch(address, original_hex, new_hex, description, now).await {
            Ok(result) => Ok(json!({"success": true, "bytes_patched": result.bytes_patched})),
            Err(e) => Ok(json!({"success": false, "error": e.to_string()})),
        }
    }
}

pub struct ApplyAssemblyPatchTool {
    manager: Arc<PatchManager>,
}

impl ApplyAssemblyPatchTool {
    pub fn new(manager: Arc<PatchManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ApplyAssemblyPatchTool {
    fn name(&self) -> &str {
        "apply_assembly_patch"
    }
    fn description(&self) -> &str {
        "Assembles and writes a replacement instruction sequence after verifying the current disassembly."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex address", true),
            ("original_asm", "string", "expected current disassembly", true),
            ("new_asm", "string", "replacement assembly text", true),
            ("description", "string", "human-readable reason for the patch", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let original_asm = string_field(&input, "original_asm")?;
        let new_asm = string_field(&input, "new_asm")?;
        let description = string_field(&input, "description")?;
        let pad_to_len = input.get("pad_to_len").and_then(|v| v.as_u64()).map(|n| n as usize);
        let now = input.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
        match self.manager.apply_assembly_patch(address, original_asm, new_asm, pad_to_len, description, now).await {
            Ok(result) => Ok(json!({"success": true, "bytes_patched": result.bytes_patched, "nops_added": result.nops_added})),
            Err(e) => Ok(json!({"success": false, "error": e.to_string()})),
        }
    }
}

pub struct ApplySegmentInjectionTool {
    manager: Arc<PatchManager>,
}

impl ApplySegmentInjectionTool {
    pub fn new(manager: Arc<PatchManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ApplySegmentInjectionTool {
    fn name(&self) -> &str {
        "apply_segment_injection"
    }
    fn description(&self) -> &str {
        "Creates a new code segment in the host for injected code."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("address", "string", "hex address for the new segment", true),
            ("size", "integer", "segment size in bytes", true),
            ("name", "string", "segment name", true),
            ("description", "string", "human-readable reason", true),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = parse_address(&input)?;
        let size = input
            .get("size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| ToolError::InvalidArguments("missing required field: size".to_string()))? as usize;
        let name = string_field(&input, "name")?;
        let description = string_field(&input, "description")?;
        let now = input.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);
        match self.manager.apply_segment_injection(address, size, name, description, now).await {
            Ok(result) => Ok(json!({"success": true, "segment_address": format!("0x{:x}", result.segment_address), "allocated_size": result.allocated_size})),
            Err(e) => Ok(json!({"success": false, "error": e.to_string()})),
        }
    }
}

pub struct StoreAnalysisTool {
    store: Arc<MemoryStore>,
}

impl StoreAnalysisTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

fn parse_category(s: &str) -> ToolResult<AnalysisCategory> {
    match s {
        "note" => Ok(AnalysisCategory::Note),
        "finding" => Ok(AnalysisCategory::Finding),
        "hypothesis" => Ok(AnalysisCategory::Hypothesis),
        "question" => Ok(AnalysisCategory::Question),
        "analysis" => Ok(AnalysisCategory::Analysis),
        other => Err(ToolError::InvalidArguments(format!("unknown category: {other}"))),
    }
}

#[async_trait]
impl Tool for StoreAnalysisTool {
    fn name(&self) -> &str {
        "store_analysis"
    }
    fn description(&self) -> &str {
        "Stores a keyed finding, hypothesis, note, question, or analysis in the shared memory store."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("key", "string", "unique key for this entry", true),
            ("content", "string", "free-text content", true),
            ("type", "string", "one of note, finding, hypothesis, question, analysis", true),
            ("address", "string", "optional primary hex address", false),
            ("related_addresses", "array", "optional related hex addresses", false),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let key = string_field(&input, "key")?;
        let content = string_field(&input, "content")?;
        let category = parse_category(string_field(&input, "type")?)?;
        let address = match input.get("address").and_then(|v| v.as_str()) {
            Some(s) => Some(
                u64::from_str_radix(s.trim_start_matches("0x"), 16)
                    .map_err(|_| ToolError::InvalidArguments(format!("invalid hex address: {s}")))?,
            ),
            None => None,
        };
        let related: Vec<u64> = input
            .get("related_addresses")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| u64::from_str_radix(s.trim_start_matches("0x"), 16).ok())
                    .collect()
            })
            .unwrap_or_default();
        let now = input.get("timestamp").and_then(|v| v.as_i64()).unwrap_or(0);

        let stored_key = self.store.store(key, content, category, address, related, now);
        Ok(json!({"success": true, "key": stored_key}))
    }
}

pub struct GetAnalysisTool {
    store: Arc<MemoryStore>,
}

impl GetAnalysisTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for GetAnalysisTool {
    fn name(&self) -> &str {
        "get_analysis"
    }
    fn description(&self) -> &str {
        "Queries the shared memory store by key, address, type, or a content pattern."
    }
    fn parameters_schema(&self) -> Value {
        schema_object(&[
            ("key", "string", "exact key to look up", false),
            ("address", "string", "hex address filter", false),
            ("type", "string", "category filter", false),
            ("pattern", "string", "case-insensitive regex over content", false),
        ])
    }
    async fn execute(&self, input: Value) -> ToolResult<Value> {
        let address = match input.get("address").and_then(|v| v.as_str()) {
            Some(s) => Some(
                u64::from_str_radix(s.trim_start_matches("0x"), 16)
                    .map_err(|_| ToolError::InvalidArguments(format!("invalid hex address: {s}")))?,
            ),
            None => None,
        };
        let category = match input.get("type").and_then(|v| v.as_str()) {
            Some(s) => Some(parse_category(s)?),
            None => None,
        };
        let filter = QueryFilter {
            key: input.get("key").and_then(|v| v.as_str()).map(str::to_string),
            address,
            category,
            pattern: input.get("pattern").and_then(|v| v.as_str()).map(str::to_string),
        };
        let entries = self.store.get(&filter).map_err(|e| ToolError::ExecutionFailed(e.to_string()))?;
        Ok(json!({
            "success": true,
            "entries": entries.iter().map(|e| json!({
                "key": e.key,
                "content": e.content,
                "type": format!("{:?}", e.category).to_lowercase(),
                "address": e.address.map(|a| format!("0x{:x}", a)),
                "related_addresses": e.related_addresses.iter().map(|a| format!("0x{:x}", a)).collect::<Vec<_>>(),
                "timestamp": e.timestamp,
            })).collect::<Vec<_>>(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::FakeHost;

    #[tokio::test]
    async fn set_name_tool_invokes_host_and_reports_success() {
        let host = Arc::new(FakeHost::new());
        let tool = SetNameTool::new(host.clone());
        let result = tool.execute(json!({"address": "0x1000", "name": "sub_1000"})).await.unwrap();
        assert_eq!(result["success"], true);
        assert_eq!(host.function_at(0x1000).await.unwrap().name, "sub_1000");
    }

    #[tokio::test]
    async fn set_name_tool_rejects_missing_address() {
        let host = Arc::new(FakeHost::new());
        let tool = SetNameTool::new(host);
        assert!(tool.execute(json!({"name": "x"})).await.is_err());
    }

    #[tokio::test]
    async fn store_analysis_tool_round_trips_through_get_analysis_tool() {
        let store = Arc::new(MemoryStore::new());
        let store_tool = StoreAnalysisTool::new(store.clone());
        let get_tool = GetAnalysisTool::new(store.clone());

        store_tool
            .execute(json!({"key": "entry_point", "content": "at 0x401000", "type": "finding", "address": "0x401000"}))
            .await
            .unwrap();

        let result = get_tool.execute(json!({"key": "entry_point"})).await.unwrap();
        assert_eq!(result["entries"][0]["content"], "at 0x401000");
        assert_eq!(result["entries"][0]["address"], "0x401000");
    }

    #[tokio::test]
    async fn apply_byte_patch_tool_reports_failure_as_success_false_not_an_error() {
        let host = Arc::new(FakeHost::new());
        let manager = Arc::new(PatchManager::new(host));
        let tool = ApplyBytePatchTool::new(manager);
        let result = tool
            .execute(json!({"address": "0x1000", "original_hex": "90 90", "new_hex": "cc cc", "description": "trap"}))
            .await
            .unwrap();
        assert_eq!(result["success"], false);
        assert!(result["error"].as_str().unwrap().contains("host error"));
    }
}
