//! Configured generation providers, loaded once at startup.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use foliochat_common::{Error, Result};
use foliochat_config::{LlmProviderConfig, PricingConfig, ProviderKind};
use tracing::info;

use crate::providers::{AnthropicProvider, LlmProvider, OllamaProvider, OpenAiProvider};

/// Immutable description of one provider.
#[derive(Clone)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub supports_tools: bool,
    pub supports_streaming: bool,
    pub pricing: PricingConfig,
}

impl ProviderDescriptor {
    pub fn from_config(config: &LlmProviderConfig) -> Result<Self> {
        if config.kind.requires_api_key() && config.api_key.is_none() {
            return Err(Error::Config(format!(
                "provider '{}' has no API key (set api_key or api_key_env)",
                config.name
            )));
        }
        Ok(Self {
            name: config.name.clone(),
            kind: config.kind,
            endpoint: config.endpoint_or_default(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            supports_tools: config.supports_tools,
            supports_streaming: config.supports_streaming,
            pricing: config.pricing,
        })
    }
}

impl fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("supports_tools", &self.supports_tools)
            .field("supports_streaming", &self.supports_streaming)
            .field("pricing", &self.pricing)
            .finish()
    }
}

/// A descriptor together with the client that talks to it.
#[derive(Clone)]
pub struct RegisteredProvider {
    pub descriptor: ProviderDescriptor,
    pub provider: Arc<dyn LlmProvider>,
}

/// Ordered set of providers. Registration order is round-robin order.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<RegisteredProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every configured provider. `default_timeout` applies where a
    /// provider sets no `timeout_secs` of its own.
    pub fn from_configs(configs: &[LlmProviderConfig], default_timeout: Duration) -> Result<Self> {
        let mut registry = Self::new();
        for config in configs {
            let descriptor = ProviderDescriptor::from_config(config)?;
            let timeout = config
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(default_timeout);
            let provider = build_provider(&descriptor, timeout);
            registry.register(descriptor, provider)?;
        }
        Ok(registry)
    }

    pub fn register(
        &mut self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn LlmProvider>,
    ) -> Result<()> {
        if self.by_name(&descriptor.name).is_some() {
            return Err(Error::Config(format!(
                "provider '{}' is already registered",
                descriptor.name
            )));
        }
        info!(
            "registered LLM provider: {} ({:?}, model {})",
            descriptor.name, descriptor.kind, descriptor.model
        );
        self.providers.push(RegisteredProvider {
            descriptor,
            provider,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&RegisteredProvider> {
        self.providers.get(index)
    }

    pub fn by_name(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.descriptor.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredProvider> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers
            .iter()
            .map(|p| p.descriptor.name.clone())
            .collect()
    }
}

fn build_provider(descriptor: &ProviderDescriptor, timeout: Duration) -> Arc<dyn LlmProvider> {
    let api_key = descriptor.api_key.clone().unwrap_or_default();
    match descriptor.kind {
        ProviderKind::Openai => Arc::new(
            OpenAiProvider::new(&descriptor.name, api_key)
                .with_base_url(descriptor.endpoint.clone())
                .with_timeout(timeout),
        ),
        ProviderKind::Anthropic => Arc::new(
            AnthropicProvider::new(&descriptor.name, api_key)
                .with_base_url(descriptor.endpoint.clone())
                .with_model(&descriptor.model)
                .with_timeout(timeout),
        ),
        ProviderKind::Ollama => Arc::new(
            OllamaProvider::new(&descriptor.name, Some(descriptor.endpoint.clone()))
                .with_timeout(timeout),
        ),
    }
}
