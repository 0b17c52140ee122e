pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, DatabaseConfig, FetcherConfig, FetcherKind, InvokerConfig, LlmProviderConfig,
    LoggingConfig, PricingConfig, ProviderKind,
};
