//! Tools the reasoning service may call against a cloned repository.
//!
//! The catalog is fixed: `run_shell`, `read_file` and `write_file`. Every
//! filesystem argument is confined to the repository root by [`confine`].

mod confine;
mod dispatcher;

pub use confine::{normalize_lexically, resolve_confined};
pub use dispatcher::ToolDispatcher;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const RUN_SHELL: &str = "run_shell";
pub const READ_FILE: &str = "read_file";
pub const WRITE_FILE: &str = "write_file";

/// A tool invocation requested by the reasoning service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier echoed back with the result.
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Returns a string argument, if present.
    pub fn str_arg(&self, key: &str) -> Option<&str> {
        self.arguments.get(key).and_then(Value::as_str)
    }
}

/// Structured outcome of one tool call, tagged with the originating call id.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub output: Value,
}

impl ToolResult {
    pub fn ok(call: &ToolCall, output: Value) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            output,
        }
    }

    pub fn error(call: &ToolCall, message: impl Into<String>) -> Self {
        Self::ok(call, json!({ "error": message.into() }))
    }

    /// Whether the tool reported a failure back to the model.
    pub fn is_error(&self) -> bool {
        self.output.get("error").is_some()
    }

    /// The output as the JSON string sent to the reasoning service.
    pub fn serialized(&self) -> String {
        self.output.to_string()
    }
}

/// JSON-schema descriptions of the tool catalog.
pub fn catalog() -> Vec<Value> {
    vec![
        json!({
            "type": "function",
            "name": RUN_SHELL,
            "description": "Runs a command inside the cloned repository. The first element is the program, the rest are its arguments; no shell is involved.",
            "parameters": {
                "type": "object",
                "properties": {
                    "command": { "type": "array", "items": { "type": "string" } },
                    "cwd": { "type": "string", "description": "Directory relative to the repository root" }
                },
                "required": ["command"]
            }
        }),
        json!({
            "type": "function",
            "name": READ_FILE,
            "description": "Reads a file from the cloned repository.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" }
                },
                "required": ["path"]
            }
        }),
        json!({
            "type": "function",
            "name": WRITE_FILE,
            "description": "Writes a file inside the cloned repository, creating parent directories.",
            "parameters": {
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }
        }),
    ]
}
