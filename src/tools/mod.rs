pub mod builtin;
pub mod catalog;
mod dispatch;
mod registry;

pub use catalog::{is_write_tool, schema_object, tool_class, ToolClass};
pub use dispatch::{dispatch_tool_use, register_builtin_tools};
pub use registry::{Tool, ToolError, ToolRegistry, ToolResult};
