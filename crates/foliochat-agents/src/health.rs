//! Per-provider ACTIVE/INACTIVE state driven by call outcomes.
//!
//! A permanent failure (401/403/404/503) deactivates a provider until a call
//! or probe on that same provider succeeds; time alone never revives it.
//! Transient failures only bump the failure counter.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use foliochat_common::{Error, FailureClass};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Active,
    Inactive,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderHealth {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    /// Display text of the last failure; provider bodies are already redacted.
    pub last_error: Option<String>,
}

impl Default for ProviderHealth {
    fn default() -> Self {
        Self {
            state: HealthState::Active,
            consecutive_failures: 0,
            last_failure_at: None,
            last_success_at: None,
            last_error: None,
        }
    }
}

impl ProviderHealth {
    pub fn is_active(&self) -> bool {
        self.state == HealthState::Active
    }
}

/// Process-wide health table. Each update is a read-modify-write on a single
/// map entry.
#[derive(Debug, Default)]
pub struct HealthTracker {
    entries: DashMap<String, ProviderHealth>,
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: &str) {
        self.entries.entry(provider.to_string()).or_default();
    }

    /// Unknown providers count as active.
    pub fn is_active(&self, provider: &str) -> bool {
        self.entries
            .get(provider)
            .is_none_or(|health| health.is_active())
    }

    pub fn snapshot(&self, provider: &str) -> Option<ProviderHealth> {
        self.entries.get(provider).map(|h| h.clone())
    }

    /// All entries sorted by provider name.
    pub fn snapshot_all(&self) -> Vec<(String, ProviderHealth)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    pub fn record_success(&self, provider: &str) {
        let mut entry = self.entries.entry(provider.to_string()).or_default();
        if !entry.is_active() {
            info!(provider, "provider reactivated after a successful call");
        }
        entry.state = HealthState::Active;
        entry.consecutive_failures = 0;
        entry.last_success_at = Some(Utc::now());
    }

    /// Classify `error` and update the provider's entry accordingly. Errors
    /// that are not the provider's fault leave the entry untouched.
    pub fn record_failure(&self, provider: &str, error: &Error) -> FailureClass {
        let class = error.failure_class();
        if class == FailureClass::NotProvider {
            return class;
        }

        let mut entry = self.entries.entry(provider.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_failure_at = Some(Utc::now());
        entry.last_error = Some(error.to_string());
        if class == FailureClass::Permanent {
            if entry.is_active() {
                warn!(provider, error = %error, "provider marked inactive");
            }
            entry.state = HealthState::Inactive;
        } else {
            warn!(
                provider,
                failures = entry.consecutive_failures,
                error = %error,
                "transient provider failure"
            );
        }
        class
    }
}
