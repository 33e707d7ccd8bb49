//! In-process reasoning service that replays a fixed script.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::{FollowUpRequest, InitialRequest, ModelResponse, ReasoningService};

/// A request received by [`ScriptedReasoning`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedRequest {
    Initial(InitialRequest),
    FollowUp(FollowUpRequest),
}

/// Answers each request with the next scripted list of output items.
///
/// Running past the end of the script is an external-service error.
#[derive(Default)]
pub struct ScriptedReasoning {
    turns: Mutex<VecDeque<Vec<Value>>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedReasoning {
    pub fn new(turns: Vec<Vec<Value>>) -> Self {
        Self {
            turns: Mutex::new(turns.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_turn(&self, request: RecordedRequest) -> Result<ModelResponse> {
        let turn_number = {
            let mut requests = self.requests.lock().unwrap_or_else(|e| e.into_inner());
            requests.push(request);
            requests.len()
        };

        let output = self
            .turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .ok_or_else(|| Error::ExternalService("scripted conversation exhausted".to_string()))?;

        Ok(ModelResponse {
            id: format!("resp_{}", turn_number),
            output,
        })
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoning {
    async fn create_response(&self, request: InitialRequest) -> Result<ModelResponse> {
        self.next_turn(RecordedRequest::Initial(request))
    }

    async fn continue_with_tool_outputs(&self, request: FollowUpRequest) -> Result<ModelResponse> {
        self.next_turn(RecordedRequest::FollowUp(request))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// An assistant message item carrying `text`.
pub fn text_item(text: &str) -> Value {
    json!({
        "type": "message",
        "role": "assistant",
        "content": [{ "type": "output_text", "text": text }]
    })
}

/// A function call item with JSON-string arguments.
pub fn function_call_item(call_id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "type": "function_call",
        "call_id": call_id,
        "name": name,
        "arguments": arguments.to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initial() -> InitialRequest {
        InitialRequest {
            instructions: "i".to_string(),
            task: "t".to_string(),
            tools: vec![],
        }
    }

    #[tokio::test]
    async fn replays_turns_and_records_requests() {
        let service = ScriptedReasoning::new(vec![vec![text_item("one")], vec![text_item("two")]]);

        let first = service.create_response(initial()).await.unwrap();
        let second = service
            .continue_with_tool_outputs(FollowUpRequest {
                previous_response_id: first.id.clone(),
                tool_outputs: vec![],
                tools: vec![],
            })
            .await
            .unwrap();

        assert_eq!(first.id, "resp_1");
        assert_eq!(second.id, "resp_2");
        let requests = service.requests();
        assert!(matches!(requests[0], RecordedRequest::Initial(_)));
        assert!(matches!(&requests[1], RecordedRequest::FollowUp(f) if f.previous_response_id == "resp_1"));
    }

    #[tokio::test]
    async fn exhausted_script_is_an_error() {
        let service = ScriptedReasoning::new(vec![]);
        let err = service.create_response(initial()).await.unwrap_err();
        assert!(matches!(err, Error::ExternalService(_)));
    }
}
