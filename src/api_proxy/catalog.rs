//! Provider and strategy catalog
//!
//! The gateway never caches provider or strategy records itself. Every
//! request asks a [`ProviderRepository`] for a fresh snapshot, so the backing
//! store (a database, or the TOML-loaded [`Catalog`] below) stays the single
//! source of truth.
//!
//! ```toml
//! [[providers]]
//! id = 1
//! name = "openai"
//! base_url = "https://api.openai.com/v1"
//! api_key = "sk-..."
//! model_list = ["gpt-4o", "gpt-4o-mini"]
//! small_model = "gpt-4o-mini"
//!
//! [[strategies]]
//! id = 1
//! name = "claude-code"
//! strategy_type = "anthropic"
//! fallback_order = ["large", "medium", "small"]
//!
//! [[strategies.mappings]]
//! provider_id = 1
//! priority = 1
//! large_models = ["gpt-4o"]
//! small_models = ["gpt-4o-mini"]
//!
//! [[api_keys]]
//! name = "dev"
//! key = "pb-..."
//! ```

use super::error::CatalogError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;

fn yes() -> bool {
    true
}

/// An OpenAI-compatible upstream.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Provider {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_provider_type")]
    pub provider_type: String,
    pub base_url: String,
    pub api_key: String,
    #[serde(default)]
    pub model_list: Vec<String>,
    #[serde(default)]
    pub small_model: Option<String>,
    #[serde(default)]
    pub medium_model: Option<String>,
    #[serde(default)]
    pub big_model: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "yes")]
    pub verify_ssl: bool,
    #[serde(default = "yes")]
    pub is_active: bool,
}

fn default_provider_type() -> String {
    "openai".to_string()
}

impl Provider {
    /// Whether the provider's own catalog lists `model`.
    pub fn offers(&self, model: &str) -> bool {
        self.model_list.iter().any(|m| m == model)
    }

    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .field("model_list", &self.model_list)
            .field("verify_ssl", &self.verify_ssl)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Model quality bucket.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[serde(alias = "high")]
    Large,
    Medium,
    #[serde(alias = "low")]
    Small,
    /// The untiered `selected_models` list of an OpenAI strategy.
    Single,
}

impl Tier {
    /// Canonical order for the exact-match pass.
    pub const CANONICAL: [Tier; 3] = [Tier::Large, Tier::Medium, Tier::Small];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Large => "large",
            Tier::Medium => "medium",
            Tier::Small => "small",
            Tier::Single => "single",
        }
    }

    /// Tier implied by a Claude family name (`haiku`, `sonnet`, `opus`).
    pub fn from_claude_model(model: &str) -> Option<Tier> {
        let lower = model.to_lowercase();
        if lower.contains("haiku") {
            Some(Tier::Small)
        } else if lower.contains("sonnet") {
            Some(Tier::Medium)
        } else if lower.contains("opus") {
            Some(Tier::Large)
        } else {
            None
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol a strategy serves.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StrategyType {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAI,
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StrategyType::Anthropic => write!(f, "anthropic"),
            StrategyType::OpenAI => write!(f, "openai"),
        }
    }
}

/// Binding of one provider into a strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderMapping {
    pub provider_id: i64,
    #[serde(default)]
    pub large_models: Vec<String>,
    #[serde(default)]
    pub medium_models: Vec<String>,
    #[serde(default)]
    pub small_models: Vec<String>,
    #[serde(default)]
    pub selected_models: Vec<String>,
    /// Lower number is tried first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default = "yes")]
    pub is_active: bool,
}

fn default_priority() -> i32 {
    1
}

impl ProviderMapping {
    pub fn models_for(&self, tier: Tier) -> &[String] {
        match tier {
            Tier::Large => &self.large_models,
            Tier::Medium => &self.medium_models,
            Tier::Small => &self.small_models,
            Tier::Single => &self.selected_models,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Strategy {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub strategy_type: StrategyType,
    #[serde(default = "yes")]
    pub fallback_enabled: bool,
    #[serde(default = "default_fallback_order")]
    pub fallback_order: Vec<Tier>,
    #[serde(default = "yes")]
    pub is_active: bool,
    #[serde(default)]
    pub mappings: Vec<ProviderMapping>,
}

fn default_fallback_order() -> Vec<Tier> {
    Tier::CANONICAL.to_vec()
}

/// A client API key accepted by the gateway.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiKeyRecord {
    pub name: String,
    pub key: String,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default = "yes")]
    pub is_active: bool,
}

impl fmt::Debug for ApiKeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiKeyRecord")
            .field("name", &self.name)
            .field("key", &"<redacted>")
            .field("is_admin", &self.is_admin)
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Read-only access to provider, strategy and key records.
#[async_trait]
pub trait ProviderRepository: Send + Sync {
    /// Active providers, ascending by name.
    async fn active_providers(&self) -> Result<Vec<Provider>, CatalogError>;

    async fn provider_by_id(&self, id: i64) -> Result<Option<Provider>, CatalogError>;

    /// Active strategies of `strategy_type`, ascending by id.
    async fn active_strategies(
        &self,
        strategy_type: StrategyType,
    ) -> Result<Vec<Strategy>, CatalogError>;

    async fn api_keys(&self) -> Result<Vec<ApiKeyRecord>, CatalogError>;
}

/// In-memory catalog, usually loaded from a TOML file at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub providers: Vec<Provider>,
    #[serde(default)]
    pub strategies: Vec<Strategy>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

impl Catalog {
    pub fn from_toml_str(content: &str) -> Result<Self, CatalogError> {
        let catalog: Catalog =
            toml::from_str(content).map_err(|e| CatalogError::Parse(e.to_string()))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        let mut ids = HashSet::new();
        for provider in &self.providers {
            if !ids.insert(provider.id) {
                return Err(CatalogError::Invalid(format!(
                    "duplicate provider id {}",
                    provider.id
                )));
            }
            let parsed = url::Url::parse(&provider.base_url).map_err(|e| {
                CatalogError::Invalid(format!(
                    "provider '{}' has an invalid base_url: {}",
                    provider.name, e
                ))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(CatalogError::Invalid(format!(
                    "provider '{}' base_url must be http(s)",
                    provider.name
                )));
            }
            for (name, value) in &provider.headers {
                if reqwest::header::HeaderName::from_bytes(name.as_bytes()).is_err()
                    || reqwest::header::HeaderValue::from_str(value).is_err()
                {
                    return Err(CatalogError::Invalid(format!(
                        "provider '{}' has an invalid header '{}'",
                        provider.name, name
                    )));
                }
            }
        }

        for strategy in &self.strategies {
            for mapping in &strategy.mappings {
                if !ids.contains(&mapping.provider_id) {
                    return Err(CatalogError::Invalid(format!(
                        "strategy '{}' maps unknown provider id {}",
                        strategy.name, mapping.provider_id
                    )));
                }
            }
            if strategy.fallback_order.contains(&Tier::Single) {
                return Err(CatalogError::Invalid(format!(
                    "strategy '{}' lists \"single\" in fallback_order",
                    strategy.name
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ProviderRepository for Catalog {
    async fn active_providers(&self) -> Result<Vec<Provider>, CatalogError> {
        let mut providers: Vec<Provider> = self
            .providers
            .iter()
            .filter(|p| p.is_active)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(providers)
    }

    async fn provider_by_id(&self, id: i64) -> Result<Option<Provider>, CatalogError> {
        Ok(self.providers.iter().find(|p| p.id == id).cloned())
    }

    async fn active_strategies(
        &self,
        strategy_type: StrategyType,
    ) -> Result<Vec<Strategy>, CatalogError> {
        let mut strategies: Vec<Strategy> = self
            .strategies
            .iter()
            .filter(|s| s.is_active && s.strategy_type == strategy_type)
            .cloned()
            .collect();
        strategies.sort_by_key(|s| s.id);
        Ok(strategies)
    }

    async fn api_keys(&self) -> Result<Vec<ApiKeyRecord>, CatalogError> {
        Ok(self.api_keys.clone())
    }
}
