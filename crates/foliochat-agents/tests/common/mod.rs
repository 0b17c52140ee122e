#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use foliochat_agents::{
    InvokerSettings, LlmProvider, LlmRequest, LlmResponse, LlmStream, OrchestrationContext,
    ProviderDescriptor, ProviderRegistry, StreamEvent, Usage,
};
use foliochat_common::{Error, Result};
use foliochat_config::{PricingConfig, ProviderKind};
use futures::stream::{self, StreamExt};

/// What the next call to a [`MockProvider`] does.
pub enum Step {
    Reply(String),
    Status(u16),
    /// Stream these fragments, then fail with an interrupted stream.
    StreamThenFail(Vec<&'static str>),
    /// Stream these fragments, then never finish.
    StreamThenHang(Vec<&'static str>),
}

pub struct MockProvider {
    id: String,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    last_request: Mutex<Option<LlmRequest>>,
    pub healthy: bool,
    pub probe_delay: Duration,
}

impl MockProvider {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            steps: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
            healthy: true,
            probe_delay: Duration::ZERO,
        }
    }

    pub fn with_steps(self, steps: Vec<Step>) -> Self {
        *self.steps.lock().unwrap() = steps.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<LlmRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn next_step(&self, request: &LlmRequest) -> Option<Step> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        self.steps.lock().unwrap().pop_front()
    }

    fn default_answer(&self) -> String {
        format!("answer from {}", self.id)
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn provider_id(&self) -> &str {
        &self.id
    }

    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let content = match self.next_step(request) {
            None => self.default_answer(),
            Some(Step::Reply(text)) => text,
            Some(Step::Status(status)) => {
                return Err(Error::provider_status(&self.id, status, "mock failure"));
            }
            Some(Step::StreamThenFail(_)) | Some(Step::StreamThenHang(_)) => {
                return Err(Error::interrupted(&self.id, "connection reset"));
            }
        };
        Ok(LlmResponse {
            content,
            tool_calls: vec![],
            model: request.model.clone(),
            usage: Some(Usage {
                input_tokens: 10,
                output_tokens: 5,
            }),
            stop_reason: Some("stop".into()),
        })
    }

    async fn complete_stream(&self, request: &LlmRequest) -> Result<LlmStream> {
        let text = |s: &str| Ok(StreamEvent::TextDelta(s.to_string()));
        match self.next_step(request) {
            None => {
                let answer = self.default_answer();
                Ok(Box::pin(stream::iter(vec![
                    Ok(StreamEvent::TextDelta(answer)),
                    Ok(StreamEvent::Usage(Usage {
                        input_tokens: 10,
                        output_tokens: 5,
                    })),
                    Ok(StreamEvent::Done { stop_reason: None }),
                ])))
            }
            Some(Step::Reply(answer)) => Ok(Box::pin(stream::iter(vec![
                Ok(StreamEvent::TextDelta(answer)),
                Ok(StreamEvent::Done { stop_reason: None }),
            ]))),
            Some(Step::Status(status)) => {
                Err(Error::provider_status(&self.id, status, "mock failure"))
            }
            Some(Step::StreamThenFail(fragments)) => {
                let mut events: Vec<Result<StreamEvent>> =
                    fragments.into_iter().map(text).collect();
                events.push(Err(Error::interrupted(&self.id, "connection reset")));
                Ok(Box::pin(stream::iter(events)))
            }
            Some(Step::StreamThenHang(fragments)) => {
                let events: Vec<Result<StreamEvent>> = fragments.into_iter().map(text).collect();
                Ok(Box::pin(stream::iter(events).chain(stream::pending())))
            }
        }
    }

    async fn health_check(&self) -> Result<bool> {
        tokio::time::sleep(self.probe_delay).await;
        Ok(self.healthy)
    }
}

pub struct Registered {
    pub provider: Arc<MockProvider>,
    pub supports_streaming: bool,
    pub supports_tools: bool,
}

impl Registered {
    pub fn streaming(provider: MockProvider) -> Self {
        Self {
            provider: Arc::new(provider),
            supports_streaming: true,
            supports_tools: false,
        }
    }
}

pub fn context(providers: &[&Registered]) -> Arc<OrchestrationContext> {
    let mut registry = ProviderRegistry::new();
    for registered in providers {
        let descriptor = ProviderDescriptor {
            name: registered.provider.provider_id().to_string(),
            kind: ProviderKind::Openai,
            endpoint: "http://mock.invalid/v1".into(),
            model: "mock-model".into(),
            api_key: Some("mock-key".into()),
            supports_tools: registered.supports_tools,
            supports_streaming: registered.supports_streaming,
            pricing: PricingConfig::default(),
        };
        registry
            .register(descriptor, registered.provider.clone())
            .unwrap();
    }
    Arc::new(OrchestrationContext::new(
        registry,
        InvokerSettings::default(),
    ))
}
