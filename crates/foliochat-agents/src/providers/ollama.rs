use std::time::Duration;

use async_trait::async_trait;
use foliochat_common::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use super::{
    LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamEvent, ToolCall, Usage, build_client,
    check_status, read_json, send_error,
};
use crate::relay::{FrameError, Framing, decode_stream};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Local Ollama server. Streams newline-delimited JSON rather than SSE.
#[derive(Clone)]
pub struct OllamaProvider {
    name: String,
    base_url: String,
    client: Client,
}

impl OllamaProvider {
    pub fn new(name: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            client: Client::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(Some(timeout));
        self
    }

    fn build_request_body(&self, request: &LlmRequest, stream: bool) -> Value {
        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = &request.system {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.extend(request.messages.iter().map(|msg| {
            json!({
                "role": msg.role.as_str(),
                "content": msg.content,
            })
        }));

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
        });

        let mut options = serde_json::Map::new();
        if let Some(temp) = request.temperature {
            options.insert("temperature".to_string(), json!(temp));
        }
        if let Some(max_tokens) = request.max_tokens {
            options.insert("num_predict".to_string(), json!(max_tokens));
        }
        if !options.is_empty() {
            body["options"] = Value::Object(options);
        }

        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.input_schema,
                        }
                    }))
                    .collect::<Vec<_>>()
            );
        }
        body
    }

    async fn post(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(&self.name, e))?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.build_request_body(request, false);
        let response = self.post(&body).await?;
        let chunk: ChatChunk = read_json(&self.name, response).await?;

        let usage = chunk.usage();
        let message = chunk.message.unwrap_or_default();
        Ok(LlmResponse {
            content: message.content,
            tool_calls: message
                .tool_calls
                .into_iter()
                .enumerate()
                .map(|(i, tc)| ToolCall {
                    id: format!("call_{i}"),
                    name: tc.function.name,
                    arguments: tc.function.arguments,
                })
                .collect(),
            model: chunk.model,
            usage,
            stop_reason: chunk.done_reason,
        })
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = self.build_request_body(request, true);
        let response = self.post(&body).await?;
        Ok(decode_stream(
            &self.name,
            response.bytes_stream(),
            Framing::JsonLines,
            parse_stream_line,
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);
        match self.client.get(&url).send().await {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// One line of an `/api/chat` stream.
fn parse_stream_line(line: &str) -> std::result::Result<Vec<StreamEvent>, FrameError> {
    let chunk: ChatChunk =
        serde_json::from_str(line).map_err(|e| format!("invalid stream line: {e}"))?;
    if let Some(message) = chunk.error {
        return Err(FrameError::Upstream {
            status: None,
            message,
        });
    }

    let mut events = Vec::new();
    if let Some(message) = &chunk.message {
        if !message.content.is_empty() {
            events.push(StreamEvent::TextDelta(message.content.clone()));
        }
        for (i, tc) in message.tool_calls.iter().enumerate() {
            let index = i as u32;
            events.push(StreamEvent::ToolCallStart {
                index,
                id: format!("call_{i}"),
                name: tc.function.name.clone(),
            });
            events.push(StreamEvent::ToolCallDelta {
                index,
                arguments: tc.function.arguments.to_string(),
            });
        }
    }
    if chunk.done {
        if let Some(usage) = chunk.usage() {
            events.push(StreamEvent::Usage(usage));
        }
        events.push(StreamEvent::Done {
            stop_reason: chunk.done_reason,
        });
    }
    Ok(events)
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    model: String,
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
    error: Option<String>,
}

impl ChatChunk {
    fn usage(&self) -> Option<Usage> {
        if self.prompt_eval_count.is_none() && self.eval_count.is_none() {
            return None;
        }
        Some(Usage {
            input_tokens: self.prompt_eval_count.unwrap_or(0),
            output_tokens: self.eval_count.unwrap_or(0),
        })
    }
}

#[derive(Deserialize, Default)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    function: ChunkFunction,
}

#[derive(Deserialize)]
struct ChunkFunction {
    name: String,
    #[serde(default)]
    arguments: Value,
}
