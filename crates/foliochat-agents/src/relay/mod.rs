//! Streaming relay: forwards decoded text fragments to a consumer channel in
//! arrival order while accumulating the same response shape the blocking path
//! returns.

pub mod frames;

use std::collections::BTreeMap;

use foliochat_common::{Error, Result};
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::debug;

use crate::providers::{LlmResponse, LlmStream, StreamEvent, ToolCall, Usage};

pub use frames::{EnvelopeParser, Frame, FrameDecoder, FrameError, Framing, decode_stream};

/// What a streaming consumer receives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamDelta {
    Text { text: String },
    /// The previous attempt failed after emitting text; discard it. The next
    /// fragments come from `provider`.
    Restart { provider: String },
}

impl StreamDelta {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Bounded consumer channel. Dropping the receiver cancels the call.
pub type DeltaSender = mpsc::Sender<StreamDelta>;

/// Relays one provider stream. Tracks how much text reached the consumer so a
/// retry can tell it to start over.
#[derive(Debug, Default)]
pub struct StreamRelay {
    delivered: usize,
}

#[derive(Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl StreamRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of text fragments delivered so far.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Drain `stream` into `sink`.
    ///
    /// Returns [`Error::Cancelled`] as soon as the receiver is gone; the
    /// transport stream is dropped with it. A stream that closes without a
    /// terminal event is treated as complete.
    pub async fn run(
        &mut self,
        model: &str,
        mut stream: LlmStream,
        sink: &DeltaSender,
    ) -> Result<LlmResponse> {
        let mut content = String::new();
        let mut tools: BTreeMap<u32, PartialToolCall> = BTreeMap::new();
        let mut usage: Option<Usage> = None;
        let mut stop_reason = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return Err(Error::Cancelled),
                item = stream.next() => item,
            };
            let Some(event) = next else {
                break;
            };
            match event? {
                StreamEvent::TextDelta(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    content.push_str(&text);
                    sink.send(StreamDelta::Text { text })
                        .await
                        .map_err(|_| Error::Cancelled)?;
                    self.delivered += 1;
                }
                StreamEvent::ToolCallStart { index, id, name } => {
                    let call = tools.entry(index).or_default();
                    call.id = id;
                    call.name = name;
                }
                StreamEvent::ToolCallDelta { index, arguments } => {
                    tools.entry(index).or_default().arguments.push_str(&arguments);
                }
                StreamEvent::Usage(reported) => {
                    usage.get_or_insert_with(Usage::default).merge(reported);
                }
                StreamEvent::Done { stop_reason: reason } => {
                    if reason.is_some() {
                        stop_reason = reason;
                    }
                    break;
                }
            }
        }

        debug!(fragments = self.delivered, chars = content.len(), "stream relayed");
        Ok(LlmResponse {
            content,
            tool_calls: tools.into_values().map(finish_tool_call).collect(),
            model: model.to_string(),
            usage,
            stop_reason,
        })
    }
}

fn finish_tool_call(call: PartialToolCall) -> ToolCall {
    let arguments = if call.arguments.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(&call.arguments)
            .unwrap_or(serde_json::Value::String(call.arguments))
    };
    ToolCall {
        id: call.id,
        name: call.name,
        arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn events(items: Vec<Result<StreamEvent>>) -> LlmStream {
        Box::pin(stream::iter(items))
    }

    fn text(s: &str) -> Result<StreamEvent> {
        Ok(StreamEvent::TextDelta(s.to_string()))
    }

    #[tokio::test]
    async fn fragments_arrive_in_order_and_accumulate() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut relay = StreamRelay::new();
        let response = relay
            .run(
                "m",
                events(vec![text("The "), text("price "), text("is $150")]),
                &tx,
            )
            .await
            .unwrap();
        drop(tx);

        let mut received = Vec::new();
        while let Some(delta) = rx.recv().await {
            received.push(delta);
        }
        assert_eq!(
            received,
            vec![
                StreamDelta::text("The "),
                StreamDelta::text("price "),
                StreamDelta::text("is $150")
            ]
        );
        assert_eq!(response.content, "The price is $150");
        assert_eq!(relay.delivered(), 3);
    }

    #[tokio::test]
    async fn tool_calls_and_usage_are_assembled() {
        let (tx, _rx) = mpsc::channel(8);
        let response = StreamRelay::new()
            .run(
                "m",
                events(vec![
                    Ok(StreamEvent::Usage(Usage {
                        input_tokens: 12,
                        output_tokens: 1,
                    })),
                    Ok(StreamEvent::ToolCallStart {
                        index: 0,
                        id: "call_1".into(),
                        name: "get_quote".into(),
                    }),
                    Ok(StreamEvent::ToolCallDelta {
                        index: 0,
                        arguments: "{\"symbol\":".into(),
                    }),
                    Ok(StreamEvent::ToolCallDelta {
                        index: 0,
                        arguments: "\"AAPL\"}".into(),
                    }),
                    Ok(StreamEvent::Usage(Usage {
                        input_tokens: 0,
                        output_tokens: 9,
                    })),
                    Ok(StreamEvent::Done {
                        stop_reason: Some("tool_use".into()),
                    }),
                    text("ignored after done"),
                ]),
                &tx,
            )
            .await
            .unwrap();

        assert_eq!(response.content, "");
        assert_eq!(response.tool_calls.len(), 1);
        assert_eq!(response.tool_calls[0].arguments["symbol"], "AAPL");
        assert_eq!(
            response.usage,
            Some(Usage {
                input_tokens: 12,
                output_tokens: 9
            })
        );
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
    }

    #[tokio::test]
    async fn dropped_receiver_cancels() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let err = StreamRelay::new()
            .run("m", events(vec![text("a"), text("b")]), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }

    #[tokio::test]
    async fn errors_mid_stream_propagate_after_partial_delivery() {
        let (tx, _rx) = mpsc::channel(8);
        let mut relay = StreamRelay::new();
        let err = relay
            .run(
                "m",
                events(vec![
                    text("partial"),
                    Err(Error::interrupted("p", "connection reset")),
                ]),
                &tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StreamInterrupted { .. }));
        assert_eq!(relay.delivered(), 1);
    }
}
