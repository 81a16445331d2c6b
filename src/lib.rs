//! Content generation against OpenAI-compatible chat completion endpoints
//!
//! This library exposes a single [`ContentGenerator`] contract, an adapter that speaks the
//! `/v1/chat/completions` protocol (unary and SSE streaming), and a [`ModelClient`] that routes
//! calls to an optional alternate provider with an explicit policy for its failures.

pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod providers;
pub mod retry;
pub mod streaming;
pub mod translate;
pub mod types;
pub mod utils;
pub mod wire;

// Re-export main types for convenience
pub use client::{ModelClient, Source};
pub use config::{EnvLoader, OnAlternateFailure, ProviderConfig, ValidationResult};
pub use error::{ConfigError, ModelError, ModelResult};
pub use models::{
    Content, FunctionCall, GenerateContentRequest, GenerateContentResponse, Part, Role,
};
pub use providers::{ContentGenerator, OpenAiCompatibleProvider};
pub use retry::RetryPolicy;
pub use streaming::{ChunkStream, ResponseStream};
pub use types::{ModelId, ProviderId, RequestId, UsageMetadata, UserTier};

/// Initialize the logging system
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
}
