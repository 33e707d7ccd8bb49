//! HTTP client for an OpenAI-Responses-compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{Error, Result};

use super::{FollowUpRequest, InitialRequest, ModelResponse, ReasoningService};

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<Value>,
    tools: &'a [Value],
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_response_id: Option<&'a str>,
}

/// Reasoning service reached over HTTP at `{base_url}/responses`.
pub struct ResponsesClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl ResponsesClient {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: base_url.into(),
            model: model.into(),
            client: Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/responses", self.base_url.trim_end_matches('/'))
    }

    async fn send(&self, body: &ResponsesRequest<'_>) -> Result<ModelResponse> {
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::ExternalService(format!("request failed: {}", e)))?;

        let status = res.status();
        if !status.is_success() {
            let text = res.text().await.unwrap_or_default();
            return Err(Error::ExternalService(format!(
                "responses API returned {}: {}",
                status, text
            )));
        }

        let payload: Value = res
            .json()
            .await
            .map_err(|e| Error::ExternalService(format!("invalid response body: {}", e)))?;

        if let Some(error) = payload.get("error").filter(|e| !e.is_null()) {
            return Err(Error::ExternalService(format!(
                "responses API reported an error: {}",
                error
            )));
        }

        serde_json::from_value(payload)
            .map_err(|e| Error::ExternalService(format!("unexpected response shape: {}", e)))
    }
}

#[async_trait]
impl ReasoningService for ResponsesClient {
    async fn create_response(&self, request: InitialRequest) -> Result<ModelResponse> {
        let body = ResponsesRequest {
            model: &self.model,
            input: vec![
                json!({ "role": "system", "content": request.instructions }),
                json!({ "role": "user", "content": request.task }),
            ],
            tools: &request.tools,
            previous_response_id: None,
        };
        self.send(&body).await
    }

    async fn continue_with_tool_outputs(&self, request: FollowUpRequest) -> Result<ModelResponse> {
        let input = request
            .tool_outputs
            .iter()
            .map(|out| {
                json!({
                    "type": "function_call_output",
                    "call_id": out.call_id,
                    "output": out.output,
                })
            })
            .collect();
        let body = ResponsesRequest {
            model: &self.model,
            input,
            tools: &request.tools,
            previous_response_id: Some(&request.previous_response_id),
        };
        self.send(&body).await
    }

    fn name(&self) -> &str {
        "openai-responses"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_strips_trailing_slash() {
        let client = ResponsesClient::new("k", "https://api.example.com/v1/", "gpt-5-codex");
        assert_eq!(client.endpoint(), "https://api.example.com/v1/responses");
        assert_eq!(client.model(), "gpt-5-codex");
    }

    #[test]
    fn follow_up_body_references_previous_response() {
        let tools = vec![json!({ "name": "read_file" })];
        let body = ResponsesRequest {
            model: "m",
            input: vec![json!({ "type": "function_call_output", "call_id": "c1", "output": "{}" })],
            tools: &tools,
            previous_response_id: Some("resp_1"),
        };

        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(value["previous_response_id"], "resp_1");
        assert_eq!(value["input"][0]["call_id"], "c1");
    }

    #[test]
    fn initial_body_omits_previous_response() {
        let body = ResponsesRequest {
            model: "m",
            input: vec![],
            tools: &[],
            previous_response_id: None,
        };

        let value = serde_json::to_value(&body).unwrap();

        assert!(value.get("previous_response_id").is_none());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_external_service_error() {
        let client = ResponsesClient::new("k", "http://127.0.0.1:1", "m");
        let err = client
            .create_response(InitialRequest {
                instructions: "i".to_string(),
                task: "t".to_string(),
                tools: vec![],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ExternalService(_)));
    }
}
