use std::time::Duration;

use async_trait::async_trait;
use foliochat_common::Result;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::{
    ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream, StreamEvent, ToolCall, Usage,
    build_client, check_status, read_json, send_error,
};
use crate::relay::{FrameError, Framing, decode_stream};

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const PROBE_MODEL: &str = "claude-3-haiku-20240307";

pub struct AnthropicProvider {
    name: String,
    api_key: String,
    client: Client,
    base_url: String,
    probe_model: String,
}

impl AnthropicProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            api_key: api_key.into(),
            client: Client::new(),
            base_url: ANTHROPIC_API_URL.to_string(),
            probe_model: PROBE_MODEL.to_string(),
        }
    }

    /// Full messages endpoint, e.g. `https://api.anthropic.com/v1/messages`.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = build_client(Some(timeout));
        self
    }

    /// Model used by the health probe.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.probe_model = model.into();
        self
    }

    fn request_body(&self, request: &LlmRequest, stream: bool) -> serde_json::Value {
        // The messages API has no system role; system text goes in its own field.
        let mut system: Vec<&str> = request.system.iter().map(String::as_str).collect();
        let mut messages = Vec::with_capacity(request.messages.len());
        for msg in &request.messages {
            match msg.role {
                ChatRole::System => system.push(&msg.content),
                ChatRole::User | ChatRole::Assistant => messages.push(json!({
                    "role": msg.role.as_str(),
                    "content": msg.content,
                })),
            }
        }

        let mut body = json!({
            "model": request.model,
            "messages": messages,
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system.join("\n\n"));
        }
        if let Some(temperature) = request.temperature {
            body["temperature"] = json!(temperature);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(
                request
                    .tools
                    .iter()
                    .map(|t| json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.input_schema,
                    }))
                    .collect::<Vec<_>>()
            );
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body)
            .send()
            .await
            .map_err(|e| send_error(&self.name, e))?;
        check_status(&self.name, response).await
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn provider_id(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let body = self.request_body(request, false);
        let response = self.post(&body).await?;
        let parsed: MessagesResponse = read_json(&self.name, response).await?;

        let mut content = String::new();
        let mut tool_calls = Vec::new();
        for block in parsed.content {
            match block {
                ResponseBlock::Text { text } => content.push_str(&text),
                ResponseBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ResponseBlock::Other => {}
            }
        }

        Ok(LlmResponse {
            content,
            tool_calls,
            model: parsed.model,
            usage: parsed.usage.map(Usage::from),
            stop_reason: parsed.stop_reason,
        })
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let body = self.request_body(request, true);
        let response = self.post(&body).await?;
        Ok(decode_stream(
            &self.name,
            response.bytes_stream(),
            Framing::ServerSentEvents,
            parse_stream_frame,
        ))
    }

    async fn health_check(&self) -> Result<bool> {
        let body = json!({
            "model": self.probe_model,
            "max_tokens": 1,
            "messages": [{"role": "user", "content": "ping"}],
        });
        let response = self
            .client
            .post(&self.base_url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await;

        match response {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }
}

/// One `data:` payload of a messages stream. The `event:` line is redundant
/// with the payload's `type` field and is ignored by the framer.
fn parse_stream_frame(payload: &str) -> std::result::Result<Vec<StreamEvent>, FrameError> {
    let event: StreamPayload =
        serde_json::from_str(payload).map_err(|e| format!("invalid stream event: {e}"))?;

    let events = match event {
        StreamPayload::MessageStart { message } => message
            .usage
            .map(|u| vec![StreamEvent::Usage(u.into())])
            .unwrap_or_default(),
        StreamPayload::ContentBlockStart {
            index,
            content_block,
        } => match content_block {
            ResponseBlock::Text { text } if !text.is_empty() => {
                vec![StreamEvent::TextDelta(text)]
            }
            ResponseBlock::ToolUse { id, name, .. } => {
                vec![StreamEvent::ToolCallStart { index, id, name }]
            }
            _ => Vec::new(),
        },
        StreamPayload::ContentBlockDelta { index, delta } => match delta {
            BlockDelta::TextDelta { text } => vec![StreamEvent::TextDelta(text)],
            BlockDelta::InputJsonDelta { partial_json } => vec![StreamEvent::ToolCallDelta {
                index,
                arguments: partial_json,
            }],
            BlockDelta::Other => Vec::new(),
        },
        StreamPayload::MessageDelta { delta, usage } => {
            let mut events = Vec::new();
            if let Some(usage) = usage {
                events.push(StreamEvent::Usage(Usage {
                    input_tokens: 0,
                    output_tokens: usage.output_tokens,
                }));
            }
            if delta.stop_reason.is_some() {
                events.push(StreamEvent::Done {
                    stop_reason: delta.stop_reason,
                });
            }
            events
        }
        StreamPayload::MessageStop => vec![StreamEvent::Done { stop_reason: None }],
        StreamPayload::Error { error } => {
            return Err(FrameError::Upstream {
                status: error_status(&error.kind),
                message: format!("{}: {}", error.kind, error.message),
            });
        }
        StreamPayload::Ping | StreamPayload::ContentBlockStop | StreamPayload::Other => {
            Vec::new()
        }
    };
    Ok(events)
}

/// HTTP status the API uses for each error type outside a stream.
fn error_status(kind: &str) -> Option<u16> {
    match kind {
        "invalid_request_error" => Some(400),
        "authentication_error" => Some(401),
        "permission_error" => Some(403),
        "not_found_error" => Some(404),
        "request_too_large" => Some(413),
        "rate_limit_error" => Some(429),
        "api_error" => Some(500),
        "overloaded_error" => Some(529),
        _ => None,
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: String,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl From<AnthropicUsage> for Usage {
    fn from(u: AnthropicUsage) -> Self {
        Usage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart {
        message: StartedMessage,
    },
    ContentBlockStart {
        index: u32,
        content_block: ResponseBlock,
    },
    ContentBlockDelta {
        index: u32,
        delta: BlockDelta,
    },
    ContentBlockStop,
    MessageDelta {
        delta: MessageDeltaBody,
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: StreamError,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct StartedMessage {
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct MessageDeltaBody {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(rename = "type")]
    kind: String,
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ChatMessage;

    #[test]
    fn system_messages_fold_into_the_system_field() {
        let provider = AnthropicProvider::new("claude", "key");
        let request = LlmRequest {
            model: "claude-sonnet".into(),
            system: Some("Known facts".into()),
            messages: vec![
                ChatMessage {
                    role: ChatRole::System,
                    content: "Be brief".into(),
                },
                ChatMessage::user("hi"),
            ],
            ..Default::default()
        };
        let body = provider.request_body(&request, false);
        assert_eq!(body["system"], "Known facts\n\nBe brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["max_tokens"], 1024);
    }

    #[test]
    fn stream_frames_map_to_events() {
        let start = parse_stream_frame(
            r#"{"type":"message_start","message":{"id":"m","usage":{"input_tokens":25,"output_tokens":1}}}"#,
        )
        .unwrap();
        assert_eq!(
            start,
            vec![StreamEvent::Usage(Usage {
                input_tokens: 25,
                output_tokens: 1
            })]
        );

        let delta = parse_stream_frame(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
        )
        .unwrap();
        assert_eq!(delta, vec![StreamEvent::TextDelta("Hello".into())]);

        let end = parse_stream_frame(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":15}}"#,
        )
        .unwrap();
        assert_eq!(end.len(), 2);
        assert_eq!(
            end[1],
            StreamEvent::Done {
                stop_reason: Some("end_turn".into())
            }
        );

        assert!(parse_stream_frame(r#"{"type":"ping"}"#).unwrap().is_empty());
    }

    #[test]
    fn tool_use_blocks_stream_as_tool_call_events() {
        let start = parse_stream_frame(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"toolu_1","name":"get_quote","input":{}}}"#,
        )
        .unwrap();
        assert_eq!(
            start,
            vec![StreamEvent::ToolCallStart {
                index: 1,
                id: "toolu_1".into(),
                name: "get_quote".into()
            }]
        );

        let piece = parse_stream_frame(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"symbol\":"}}"#,
        )
        .unwrap();
        assert_eq!(
            piece,
            vec![StreamEvent::ToolCallDelta {
                index: 1,
                arguments: "{\"symbol\":".into()
            }]
        );
    }

    #[test]
    fn error_events_fail_the_frame() {
        let err = parse_stream_frame(
            r#"{"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#,
        )
        .unwrap_err();
        assert_eq!(
            err,
            FrameError::Upstream {
                status: Some(529),
                message: "overloaded_error: Overloaded".into(),
            }
        );

        let err = parse_stream_frame(
            r#"{"type":"error","error":{"type":"brand_new_error","message":"?"}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, FrameError::Upstream { status: None, .. }));
    }
}
