//! Provider calls with failover and bounded retry.

use std::sync::Arc;

use foliochat_common::{Error, FailureClass, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::context::OrchestrationContext;
use crate::providers::{ChatMessage, LlmProvider, LlmRequest, LlmResponse, ToolCall, ToolDefinition, Usage};
use crate::registry::RegisteredProvider;
use crate::relay::{DeltaSender, StreamDelta, StreamRelay};

/// Provider-independent request. The model comes from the selected provider.
#[derive(Debug, Clone, Default)]
pub struct InvokeRequest {
    pub messages: Vec<ChatMessage>,
    pub system: Option<String>,
    pub tools: Vec<ToolDefinition>,
    /// Falls back to the configured `invoker.max_tokens`.
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Completion {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub provider_used: String,
    pub model: String,
    /// External calls made, including the successful one.
    pub attempts: u32,
}

pub struct Invoker {
    context: Arc<OrchestrationContext>,
}

impl Invoker {
    pub fn new(context: Arc<OrchestrationContext>) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &Arc<OrchestrationContext> {
        &self.context
    }

    /// Call providers one at a time until one succeeds or `max_attempts`
    /// calls have been made.
    ///
    /// With a `sink`, text is relayed as it arrives. If an attempt fails after
    /// delivering text and another attempt follows, the sink first receives
    /// [`StreamDelta::Restart`]. Cancellation (receiver dropped) ends the call
    /// immediately without touching provider health.
    #[instrument(skip(self, request, sink), fields(streaming = sink.is_some()))]
    pub async fn invoke(
        &self,
        request: &InvokeRequest,
        max_attempts: Option<u32>,
        sink: Option<&DeltaSender>,
    ) -> Result<Completion> {
        let ctx = &self.context;
        let max_attempts = max_attempts.unwrap_or(ctx.settings.max_attempts).max(1);
        let mut last_error = None;
        let mut restart_pending = false;

        for attempt in 1..=max_attempts {
            let Some(selected) = ctx.selector.select(&ctx.registry, &ctx.health) else {
                warn!(attempt, "no active LLM providers");
                return Err(Error::NoProvidersAvailable);
            };
            let name = selected.descriptor.name.clone();
            debug!(provider = %name, attempt, "attempting provider");

            if restart_pending {
                if let Some(sink) = sink {
                    sink.send(StreamDelta::Restart {
                        provider: name.clone(),
                    })
                    .await
                    .map_err(|_| Error::Cancelled)?;
                }
                restart_pending = false;
            }

            let llm_request = self.provider_request(selected, request);
            let mut relay = StreamRelay::new();
            let streamed = sink.is_some() && selected.descriptor.supports_streaming;

            let result = match sink {
                Some(sink) if streamed => {
                    stream_once(selected.provider.as_ref(), &llm_request, &mut relay, sink).await
                }
                Some(sink) => {
                    tokio::select! {
                        biased;
                        _ = sink.closed() => Err(Error::Cancelled),
                        response = selected.provider.complete(&llm_request) => response,
                    }
                }
                None => selected.provider.complete(&llm_request).await,
            };

            match result {
                Ok(response) => {
                    ctx.health.record_success(&name);
                    if let Some(sink) = sink.filter(|_| !streamed) {
                        if !response.content.is_empty() {
                            sink.send(StreamDelta::text(response.content.clone()))
                                .await
                                .map_err(|_| Error::Cancelled)?;
                        }
                    }
                    info!(provider = %name, attempt, "provider call succeeded");
                    return Ok(Completion::from_response(
                        response,
                        name,
                        &selected.descriptor.model,
                        attempt,
                    ));
                }
                Err(Error::Cancelled) => {
                    info!(provider = %name, "call cancelled by consumer");
                    return Err(Error::Cancelled);
                }
                Err(e) => {
                    let class = ctx.health.record_failure(&name, &e);
                    warn!(
                        provider = %name,
                        attempt,
                        max_attempts,
                        permanent = class == FailureClass::Permanent,
                        error = %e,
                        "provider call failed"
                    );
                    restart_pending = relay.delivered() > 0;
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(Error::NoProvidersAvailable))
    }

    fn provider_request(&self, selected: &RegisteredProvider, request: &InvokeRequest) -> LlmRequest {
        let settings = &self.context.settings;
        LlmRequest {
            model: selected.descriptor.model.clone(),
            messages: request.messages.clone(),
            system: request.system.clone(),
            max_tokens: Some(request.max_tokens.unwrap_or(settings.max_tokens)),
            temperature: request.temperature.or(settings.temperature),
            tools: if selected.descriptor.supports_tools {
                request.tools.clone()
            } else {
                Vec::new()
            },
        }
    }
}

async fn stream_once(
    provider: &dyn LlmProvider,
    request: &LlmRequest,
    relay: &mut StreamRelay,
    sink: &DeltaSender,
) -> Result<LlmResponse> {
    let stream = tokio::select! {
        biased;
        _ = sink.closed() => return Err(Error::Cancelled),
        stream = provider.complete_stream(request) => stream?,
    };
    relay.run(&request.model, stream, sink).await
}

impl Completion {
    fn from_response(response: LlmResponse, provider: String, model: &str, attempts: u32) -> Self {
        Self {
            content: response.content,
            tool_calls: response.tool_calls,
            usage: response.usage.unwrap_or_default(),
            provider_used: provider,
            model: if response.model.is_empty() {
                model.to_string()
            } else {
                response.model
            },
            attempts,
        }
    }
}
