use std::time::Duration;

use async_trait::async_trait;
use foliochat_common::{Error, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    ChatMessage, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamEvent, ToolCall, Usage,
    build_client, check_status, read_json, send_error,
};
use crate::relay::{FrameError, Framing, decode_stream};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Any endpoint speaking the OpenAI chat-completions protocol.
#[derive(Clone)]
pub struct OpenAiProvider {
    name: String,
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            client: Client::new(),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(Some(timeout));
        self
    }

    fn convert_request(&self, request: &LlmRequest, stream: bool) -> OpenAiRequest {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(OpenAiMessage {
                role: "system",
                content: system.clone(),
            });
        }
        messages.extend(request.messages.iter().map(|m: &ChatMessage| OpenAiMessage {
            role: m.role.as_str(),
            content: m.content.clone(),
        }));

        let tools = (!request.tools.is_empty()).then(|| {
            request
                .tools
                .iter()
                .map(|t| OpenAiTool {
                    kind: "function",
                    function: OpenAiFunctionDefinition {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.input_schema.clone(),
                    },
                })
                .collect()
        });

        OpenAiRequest {
            model: request.model.clone(),
            messages,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            tools,
            stream,
            stream_options: stream.then_some(OpenAiStreamOptions {
                include_usage: true,
            }),
        }
    }

    async fn post(&self, body: &OpenAiRequest) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(&self.name, e))?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.convert_request(request, false);
        let response = self.post(&body).await?;
        let parsed: OpenAiResponse = read_json(&self.name, response).await?;
        convert_response(&self.name, parsed)
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = self.convert_request(request, true);
        let response = self.post(&body).await?;
        Ok(decode_stream(
            &self.name,
            response.bytes_stream(),
            Framing::ServerSentEvents,
            parse_stream_frame,
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

fn convert_response(provider: &str, response: OpenAiResponse) -> Result<LlmResponse> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::malformed(provider, "no choices in response"))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::String(tc.function.arguments.clone())),
            name: tc.function.name,
        })
        .collect();

    Ok(LlmResponse {
        content: choice.message.content.unwrap_or_default(),
        tool_calls,
        model: response.model,
        usage: response.usage.map(Usage::from),
        stop_reason: choice.finish_reason,
    })
}

/// One `data:` payload of a chat-completions stream.
fn parse_stream_frame(payload: &str) -> std::result::Result<Vec<StreamEvent>, FrameError> {
    let chunk: OpenAiStreamChunk =
        serde_json::from_str(payload).map_err(|e| format!("invalid stream chunk: {e}"))?;

    let mut events = Vec::new();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content {
            if !content.is_empty() {
                events.push(StreamEvent::TextDelta(content));
            }
        }
        for tc in choice.delta.tool_calls.unwrap_or_default() {
            let function = tc.function.unwrap_or_default();
            if tc.id.is_some() || function.name.is_some() {
                events.push(StreamEvent::ToolCallStart {
                    index: tc.index,
                    id: tc.id.unwrap_or_default(),
                    name: function.name.unwrap_or_default(),
                });
            }
            if let Some(arguments) = function.arguments {
                if !arguments.is_empty() {
                    events.push(StreamEvent::ToolCallDelta {
                        index: tc.index,
                        arguments,
                    });
                }
            }
        }
    }
    if let Some(usage) = chunk.usage {
        events.push(StreamEvent::Usage(usage.into()));
    }
    Ok(events)
}

// Request types
#[derive(Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<OpenAiStreamOptions>,
}

#[derive(Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: OpenAiFunctionDefinition,
}

#[derive(Serialize)]
struct OpenAiFunctionDefinition {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiToolCall {
    id: String,
    function: OpenAiFunctionCall,
}

#[derive(Deserialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<OpenAiUsage> for Usage {
    fn from(u: OpenAiUsage) -> Self {
        Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        }
    }
}

// Stream types
#[derive(Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Deserialize)]
struct OpenAiStreamChoice {
    delta: OpenAiStreamDelta,
}

#[derive(Deserialize)]
struct OpenAiStreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAiStreamToolCall>>,
}

#[derive(Deserialize)]
struct OpenAiStreamToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<OpenAiStreamFunctionCall>,
}

#[derive(Deserialize, Default)]
struct OpenAiStreamFunctionCall {
    name: Option<String>,
    arguments: Option<String>,
}
