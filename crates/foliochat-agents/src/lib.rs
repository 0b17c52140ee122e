pub mod context;
pub mod health;
pub mod invoker;
pub mod pipeline;
pub mod portfolio;
pub mod prompt;
pub mod providers;
pub mod registry;
pub mod relay;
pub mod selector;

pub use context::{InvokerSettings, OrchestrationContext, ProbeResult};
pub use health::{HealthState, HealthTracker, ProviderHealth};
pub use invoker::{Completion, InvokeRequest, Invoker};
pub use pipeline::{OrchestrationPipeline, TurnInput, TurnOutcome, TurnUsage};
pub use portfolio::{
    Clarification, PortfolioCandidate, PortfolioOption, PortfolioResolution, resolve_portfolio,
};
pub use providers::{
    AnthropicProvider, ChatMessage, ChatRole, LlmProvider, LlmRequest, LlmResponse, LlmStream,
    OllamaProvider, OpenAiProvider, StreamEvent, ToolCall, ToolDefinition, Usage,
};
pub use registry::{ProviderDescriptor, ProviderRegistry, RegisteredProvider};
pub use relay::{DeltaSender, StreamDelta, StreamRelay};
pub use selector::ProviderSelector;
