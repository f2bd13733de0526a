//! Client API key checks.

use super::catalog::ProviderRepository;
use super::error::GatewayError;
use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use std::sync::Arc;

/// Identity a request was admitted under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub is_admin: bool,
}

impl Principal {
    pub fn anonymous() -> Self {
        Self {
            name: "anonymous".to_string(),
            is_admin: false,
        }
    }
}

#[async_trait]
pub trait ApiKeyValidator: Send + Sync {
    /// Admit or reject a request presenting `key` (absent if no key was sent).
    async fn validate(&self, key: Option<&str>) -> Result<Principal, GatewayError>;
}

/// Key from `Authorization: Bearer <key>` or, failing that, `x-api-key`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|k| !k.is_empty());

    bearer
        .or_else(|| {
            headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|k| !k.is_empty())
        })
        .map(str::to_string)
}

/// Validates against the active keys in the catalog.
///
/// A catalog without any keys admits everyone as `anonymous`.
#[derive(Clone)]
pub struct StaticKeyValidator {
    repository: Arc<dyn ProviderRepository>,
}

impl StaticKeyValidator {
    pub fn new(repository: Arc<dyn ProviderRepository>) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl ApiKeyValidator for StaticKeyValidator {
    async fn validate(&self, key: Option<&str>) -> Result<Principal, GatewayError> {
        let keys = self.repository.api_keys().await?;
        if keys.is_empty() {
            return Ok(Principal::anonymous());
        }

        let key = key.ok_or_else(|| GatewayError::Unauthorized("missing API key".to_string()))?;
        keys.iter()
            .find(|record| record.is_active && record.key == key)
            .map(|record| Principal {
                name: record.name.clone(),
                is_admin: record.is_admin,
            })
            .ok_or_else(|| GatewayError::Unauthorized("invalid API key".to_string()))
    }
}
