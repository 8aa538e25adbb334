//! The semantic-collision table and JSON-schema builder helpers shared by
//! every tool definition. The distilled spec leaves "semantic collision" as
//! a property of the tool fixed in the catalog, not formalized further
//! (§9 Open Questions); this module is that table, using the default rule
//! the spec proposes: two writes collide iff they belong to the same class.

use serde_json::{json, Value};

/// The collision class a write tool belongs to. Two write-tool calls at the
/// same address collide iff they share a class; a read tool has no class
/// and is excluded from conflict tracking entirely (see `is_write`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolClass {
    Rename,
    Retype,
    Comment,
    Signature,
    Patch,
    StoreAnalysis,
    Other,
}

/// Maps a tool name to its collision class, or `None` if the tool is a pure
/// read and excluded from conflict tracking.
pub fn tool_class(tool_name: &str) -> Option<ToolClass> {
    match tool_name {
        "set_name" | "set_function_name" | "rename_variable" => Some(ToolClass::Rename),
        "set_variable_type" | "set_local_type" => Some(ToolClass::Retype),
        "set_comment" => Some(ToolClass::Comment),
        "set_function_prototype" => Some(ToolClass::Signature),
        "apply_byte_patch" | "apply_assembly_patch" | "apply_segment_injection" => Some(ToolClass::Patch),
        "store_analysis" => Some(ToolClass::StoreAnalysis),
        // Reads: list/search/xrefs/disassemble/decompile/get_* never mutate
        // host state and are excluded from conflict tracking.
        _ => None,
    }
}

pub fn is_write_tool(tool_name: &str) -> bool {
    tool_class(tool_name).is_some()
}

/// Builds a JSON-schema `object` parameter schema from `(name, json_type,
/// description, required)` tuples. `json_type` is one of `"integer"`,
/// `"string"`, `"boolean"`, or `"array"`.
pub fn schema_object(fields: &[(&str, &str, &str, bool)]) -> Value {
    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();
    for (name, json_type, description, is_required) in fields {
        properties.insert(
            name.to_string(),
            json!({ "type": json_type, "description": description }),
        );
        if *is_required {
            required.push(json!(name));
        }
    }
    json!({
        "type": "object",
        "properties": Value::Object(properties),
        "required": required,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_class_tools_collide_different_classes_do_not() {
        assert_eq!(tool_class("set_name"), tool_class("set_function_name"));
        assert_ne!(tool_class("set_name"), tool_class("set_variable_type"));
    }

    #[test]
    fn read_tools_have_no_class() {
        assert_eq!(tool_class("list_functions"), None);
        assert!(!is_write_tool("decompile"));
    }

    #[test]
    fn schema_object_marks_required_fields() {
        let schema = schema_object(&[("address", "string", "hex address", true), ("note", "string", "optional note", false)]);
        assert_eq!(schema["required"], json!(["address"]));
        assert_eq!(schema["properties"]["note"]["type"], "string");
    }
}
