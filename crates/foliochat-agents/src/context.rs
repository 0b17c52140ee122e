//! Process-wide orchestration state, built once at startup and shared by `Arc`.

use std::sync::Arc;
use std::time::Duration;

use foliochat_common::Result;
use foliochat_config::{AppConfig, InvokerConfig};
use futures::future::join_all;
use tracing::{info, warn};

use crate::health::HealthTracker;
use crate::invoker::Invoker;
use crate::registry::ProviderRegistry;
use crate::selector::ProviderSelector;

/// Invoker defaults taken from configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct InvokerSettings {
    pub max_attempts: u32,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub stream_buffer: usize,
    pub request_timeout: Duration,
}

impl Default for InvokerSettings {
    fn default() -> Self {
        Self::from(&InvokerConfig::default())
    }
}

impl From<&InvokerConfig> for InvokerSettings {
    fn from(config: &InvokerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream_buffer: config.stream_buffer.max(1),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }
}

/// Result of one provider probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub provider: String,
    pub healthy: bool,
}

pub struct OrchestrationContext {
    pub registry: ProviderRegistry,
    pub health: HealthTracker,
    pub selector: ProviderSelector,
    pub settings: InvokerSettings,
}

impl OrchestrationContext {
    pub fn new(registry: ProviderRegistry, settings: InvokerSettings) -> Self {
        let health = HealthTracker::new();
        for provider in registry.iter() {
            health.register(&provider.descriptor.name);
        }
        Self {
            registry,
            health,
            selector: ProviderSelector::new(),
            settings,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let settings = InvokerSettings::from(&config.invoker);
        let registry = ProviderRegistry::from_configs(&config.providers, settings.request_timeout)?;
        if registry.is_empty() {
            warn!("no LLM providers configured; every turn will fail");
        }
        Ok(Self::new(registry, settings))
    }

    pub fn invoker(self: &Arc<Self>) -> Invoker {
        Invoker::new(Arc::clone(self))
    }

    /// Run every provider's health check concurrently.
    ///
    /// A passing probe counts as a success on that provider and is the only
    /// way to revive an inactive one without a real call. A failing probe is
    /// logged and leaves health unchanged.
    pub async fn probe_all(&self) -> Vec<ProbeResult> {
        let futures = self.registry.iter().map(|registered| async move {
            let name = registered.descriptor.name.clone();
            let healthy = match registered.provider.health_check().await {
                Ok(healthy) => healthy,
                Err(e) => {
                    warn!(provider = %name, error = %e, "health check errored");
                    false
                }
            };
            ProbeResult {
                provider: name,
                healthy,
            }
        });

        let results = join_all(futures).await;
        for result in &results {
            if result.healthy {
                self.health.record_success(&result.provider);
            } else {
                warn!(provider = %result.provider, "health check failed");
            }
        }
        info!(
            healthy = results.iter().filter(|r| r.healthy).count(),
            total = results.len(),
            "provider probes finished"
        );
        results
    }
}
