//! Client seam for the external reasoning service.
//!
//! The service is turn based: a first request carries the instructions, the
//! task and the tool catalog; each follow-up carries tool outputs and the id
//! of the previous response. Responses are a list of loosely typed output
//! items, parsed here into text and [`ToolCall`]s.

mod openai;
mod scripted;

pub use openai::ResponsesClient;
pub use scripted::{function_call_item, text_item, RecordedRequest, ScriptedReasoning};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;
use crate::tools::ToolCall;

/// First request of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialRequest {
    /// System instruction.
    pub instructions: String,
    /// The user's task description.
    pub task: String,
    /// Tool catalog in JSON-schema form.
    pub tools: Vec<Value>,
}

/// Output of one tool call, sent back to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    pub call_id: String,
    /// JSON-encoded tool result.
    pub output: String,
}

/// Continuation of a conversation with tool outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRequest {
    pub previous_response_id: String,
    pub tool_outputs: Vec<ToolOutput>,
    pub tools: Vec<Value>,
}

/// One response from the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub id: String,
    #[serde(default)]
    pub output: Vec<Value>,
}

/// A stateful, turn-based reasoning service.
#[async_trait]
pub trait ReasoningService: Send + Sync {
    /// Starts a conversation.
    async fn create_response(&self, request: InitialRequest) -> Result<ModelResponse>;

    /// Continues the conversation identified by `previous_response_id`.
    async fn continue_with_tool_outputs(&self, request: FollowUpRequest) -> Result<ModelResponse>;

    /// Returns the name of this service.
    fn name(&self) -> &str;
}

/// Joins every text fragment in `output`, trimmed. `None` when there is none.
///
/// Text is taken from an item's own `text` field and from the `text` field of
/// each entry in its `content` array.
pub fn extract_text(output: &[Value]) -> Option<String> {
    let mut texts: Vec<&str> = Vec::new();
    for item in output {
        let Some(object) = item.as_object() else {
            continue;
        };
        if let Some(text) = object.get("text").and_then(Value::as_str) {
            texts.push(text);
        }
        if let Some(content) = object.get("content").and_then(Value::as_array) {
            texts.extend(
                content
                    .iter()
                    .filter_map(|entry| entry.get("text").and_then(Value::as_str)),
            );
        }
    }

    let joined = texts.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Normalizes the tool calls in `output`, in order.
///
/// Items of type `function_call` or `tool_call` are considered. The name and
/// arguments may sit on the item or on a nested `function` object. Calls
/// without a name or with arguments that are not a JSON object are dropped.
pub fn extract_tool_calls(output: &[Value]) -> Vec<ToolCall> {
    let mut calls = Vec::new();
    for item in output {
        let item_type = item.get("type").and_then(Value::as_str);
        if !matches!(item_type, Some("function_call") | Some("tool_call")) {
            continue;
        }
        let function = item.get("function");

        let name = item
            .get("name")
            .and_then(Value::as_str)
            .or_else(|| function.and_then(|f| f.get("name")).and_then(Value::as_str))
            .filter(|n| !n.is_empty());
        let raw_arguments = item
            .get("arguments")
            .or_else(|| function.and_then(|f| f.get("arguments")));

        let (Some(name), Some(arguments)) = (name, parse_arguments(raw_arguments)) else {
            tracing::debug!(item = %item, "dropping malformed tool call");
            continue;
        };

        let id = item
            .get("call_id")
            .and_then(Value::as_str)
            .or_else(|| item.get("id").and_then(Value::as_str))
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        calls.push(ToolCall {
            id,
            name: name.to_string(),
            arguments,
        });
    }
    calls
}

/// Parses tool arguments that arrive either as a JSON string or an object.
fn parse_arguments(raw: Option<&Value>) -> Option<Map<String, Value>> {
    match raw? {
        Value::String(text) if !text.trim().is_empty() => {
            match serde_json::from_str::<Value>(text) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        }
        Value::Object(map) => Some(map.clone()),
        _ => None,
    }
}
