//! API Proxy Module
//!
//! A gateway that accepts OpenAI Chat Completions and Anthropic Messages
//! requests, picks an upstream OpenAI-compatible provider from a catalog of
//! strategies, and fails over across providers until one answers.
//!
//! # Features
//!
//! - **Tiered resolution**: a strategy binds providers at priorities and
//!   lists large/medium/small models per provider; requests resolve by exact
//!   name, by the tier implied by a Claude model name, or by fallback.
//!
//! - **Request/Response Conversion**: Converts between Anthropic's Messages API format
//!   and OpenAI's Chat Completions API format, including tool calls.
//!
//! - **Streaming Support**: upstream OpenAI SSE is re-emitted as Anthropic
//!   stream events, or passed through re-framed for OpenAI clients.
//!
//! # Usage
//!
//! ```no_run
//! use portbroker::api_proxy::server;
//!
//! #[tokio::main]
//! async fn main() {
//!     server::run_server_from_env().await.unwrap();
//! }
//! ```
//!
//! # Configuration
//!
//! - `HOST` / `PORT`: listen address (default `0.0.0.0:8000`)
//! - `PORTBROKER_CATALOG`: TOML catalog of providers, strategies and keys
//!   (default `portbroker.toml`)
//! - `REQUEST_TIMEOUT_SECS`: upstream timeout (default 300)
//! - `ROUTING_MODE`: `strategy` or `legacy`

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod convert;
pub mod error;
pub mod resolver;
pub mod server;
pub mod stream;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use catalog::{Catalog, Provider, ProviderRepository, Strategy, StrategyType, Tier};
pub use client::ProviderGateway;
pub use config::{GatewayConfig, RoutingMode};
pub use error::{GatewayError, ProviderError, ResolutionError};
pub use resolver::{ModelResolver, ResolvedTarget};
pub use server::{create_router, run_server, run_server_from_env, AppState};
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, MessagesRequest, MessagesResponse, StopReason,
    StreamEvent,
};
