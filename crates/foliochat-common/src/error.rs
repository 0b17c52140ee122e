use thiserror::Error;

use crate::redaction::redact_secrets;

pub type Result<T> = std::result::Result<T, Error>;

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no LLM providers available")]
    NoProvidersAvailable,

    #[error("provider '{provider}' returned status {status}: {message}")]
    ProviderStatus {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("provider '{provider}' transport error: {message}")]
    Transport {
        provider: String,
        message: String,
        timeout: bool,
    },

    #[error("provider '{provider}' sent a malformed response: {message}")]
    MalformedResponse { provider: String, message: String },

    #[error("stream from provider '{provider}' interrupted: {message}")]
    StreamInterrupted { provider: String, message: String },

    #[error("streamed call cancelled by caller")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// How a failed provider call affects that provider's health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The key or endpoint is broken until someone fixes it.
    Permanent,
    /// Worth another attempt, possibly on a different provider.
    Transient,
    /// Not the provider's fault (cancellation, bad input, local errors).
    NotProvider,
}

impl Error {
    /// Build a status error from a non-2xx provider response body.
    pub fn provider_status(provider: &str, status: u16, body: &str) -> Self {
        Self::ProviderStatus {
            provider: provider.to_string(),
            status,
            message: sanitize_body(body),
        }
    }

    /// Build a transport error from a `reqwest`-style failure description.
    pub fn transport(provider: &str, message: impl Into<String>, timeout: bool) -> Self {
        Self::Transport {
            provider: provider.to_string(),
            message: redact_secrets(&message.into()),
            timeout,
        }
    }

    pub fn malformed(provider: &str, message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            provider: provider.to_string(),
            message: sanitize_body(&message.into()),
        }
    }

    pub fn interrupted(provider: &str, message: impl Into<String>) -> Self {
        Self::StreamInterrupted {
            provider: provider.to_string(),
            message: redact_secrets(&message.into()),
        }
    }

    pub fn failure_class(&self) -> FailureClass {
        match self {
            Self::ProviderStatus { status, .. } if is_permanent_status(*status) => {
                FailureClass::Permanent
            }
            Self::ProviderStatus { .. }
            | Self::Transport { .. }
            | Self::MalformedResponse { .. }
            | Self::StreamInterrupted { .. } => FailureClass::Transient,
            _ => FailureClass::NotProvider,
        }
    }
}

/// 401, 403, 404 and 503 mean the provider will refuse every request we send.
pub fn is_permanent_status(status: u16) -> bool {
    matches!(status, 401 | 403 | 404 | 503)
}

fn sanitize_body(body: &str) -> String {
    let redacted = redact_secrets(body.trim());
    if redacted.chars().count() <= MAX_ERROR_BODY_CHARS {
        return redacted;
    }
    let mut truncated: String = redacted.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push_str("...");
    truncated
}
