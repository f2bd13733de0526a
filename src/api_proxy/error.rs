//! Error types shared by the gateway layers.

use thiserror::Error;

/// Failure of a single upstream attempt.
///
/// These never reach the client directly; the failover loop either moves on
/// to the next candidate or wraps the last one in
/// [`GatewayError::AllProvidersFailed`].
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("request to {provider} failed: {message}")]
    Request { provider: String, message: String },
    #[error("request to {provider} timed out")]
    Timeout { provider: String },
    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: String,
        status: u16,
        body: String,
    },
    #[error("could not decode response from {provider}: {message}")]
    Decode { provider: String, message: String },
}

impl ProviderError {
    pub fn from_reqwest(provider: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                provider: provider.to_string(),
            }
        } else {
            ProviderError::Request {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// Model resolution failures. Both are raised before any upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    #[error("no active strategy found for type: {0}")]
    NoStrategyFound(String),
    #[error("no suitable model found for: {0}")]
    NoSuitableModel(String),
}

#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    #[error("failed to read catalog {path}: {message}")]
    Io { path: String, message: String },
    #[error("failed to parse catalog: {0}")]
    Parse(String),
    #[error("invalid catalog: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("failed to translate upstream response: {0}")]
    Translation(String),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("All providers failed after {attempts} attempt(s). Last error: {last}")]
    AllProvidersFailed { attempts: usize, last: ProviderError },
    #[error("no active providers available")]
    NoActiveProviders,
    #[error("{0}")]
    Unauthorized(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }
}
