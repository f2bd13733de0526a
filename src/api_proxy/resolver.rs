//! Tiered model resolution
//!
//! Maps a requested model name onto a concrete provider and upstream model
//! using the active strategy for the request's protocol. Resolution runs in
//! passes, each walking providers in priority order (provider outer, tier
//! inner):
//!
//! 1. exact match: a tier model equal (case-insensitively) to the request
//!    that the provider actually offers;
//! 2. preferred tier: when the caller supplies a tier hint, the first offered
//!    model of that tier;
//! 3. fallback: if the strategy allows it, the first offered model walking
//!    `fallback_order`.
//!
//! Tier lists decide eligibility and the provider's `model_list` decides
//! availability; a model must pass both.

use super::catalog::{Provider, ProviderMapping, ProviderRepository, Strategy, StrategyType, Tier};
use super::error::{GatewayError, ResolutionError};
use std::collections::HashSet;
use std::sync::Arc;

/// Concrete destination for one dispatch attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTarget {
    pub provider: Provider,
    pub mapped_model: String,
    pub tier_used: Tier,
    pub fallback_used: bool,
}

/// A configured model, as listed by the `/models` endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelListing {
    pub id: String,
    pub provider_name: String,
    pub tier: Tier,
}

#[derive(Clone)]
pub struct ModelResolver {
    repository: Arc<dyn ProviderRepository>,
}

impl ModelResolver {
    pub fn new(repository: Arc<dyn ProviderRepository>) -> Self {
        Self { repository }
    }

    /// Resolve `requested_model` to a single target.
    pub async fn resolve(
        &self,
        requested_model: &str,
        strategy_type: StrategyType,
        preferred_tier: Option<Tier>,
    ) -> Result<ResolvedTarget, GatewayError> {
        let mut candidates = self
            .candidates(requested_model, strategy_type, preferred_tier)
            .await?;
        Ok(candidates.remove(0))
    }

    /// Ordered failover list; never empty on success, and its head is what
    /// [`ModelResolver::resolve`] returns.
    pub async fn candidates(
        &self,
        requested_model: &str,
        strategy_type: StrategyType,
        preferred_tier: Option<Tier>,
    ) -> Result<Vec<ResolvedTarget>, GatewayError> {
        let (strategy, mapped) = self.load(strategy_type).await?;
        let targets = plan(&strategy, &mapped, requested_model, preferred_tier);
        if targets.is_empty() {
            return Err(ResolutionError::NoSuitableModel(requested_model.to_string()).into());
        }
        log::debug!(
            "Resolved {} via strategy '{}' -> {} candidate(s), first {}@{} (tier {}, fallback {})",
            requested_model,
            strategy.name,
            targets.len(),
            targets[0].mapped_model,
            targets[0].provider.name,
            targets[0].tier_used,
            targets[0].fallback_used
        );
        Ok(targets)
    }

    /// Models configured for `strategy_type`, deduplicated in resolution
    /// order. Only models the mapped provider actually offers are listed.
    pub async fn list_models(
        &self,
        strategy_type: StrategyType,
    ) -> Result<Vec<ModelListing>, GatewayError> {
        let (strategy, mapped) = self.load(strategy_type).await?;
        let mut seen = HashSet::new();
        let mut listings = Vec::new();
        for (mapping, provider) in &mapped {
            for tier in tiers_of(&strategy) {
                for model in mapping.models_for(tier) {
                    if provider.offers(model) && seen.insert(model.to_lowercase()) {
                        listings.push(ModelListing {
                            id: model.clone(),
                            provider_name: provider.name.clone(),
                            tier,
                        });
                    }
                }
            }
        }
        Ok(listings)
    }

    async fn load(
        &self,
        strategy_type: StrategyType,
    ) -> Result<(Strategy, Vec<(ProviderMapping, Provider)>), GatewayError> {
        let strategy = self
            .repository
            .active_strategies(strategy_type)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ResolutionError::NoStrategyFound(strategy_type.to_string()))?;

        let providers = self.repository.active_providers().await?;
        let mut mapped: Vec<(ProviderMapping, Provider)> = strategy
            .mappings
            .iter()
            .filter(|m| m.is_active)
            .filter_map(|m| {
                providers
                    .iter()
                    .find(|p| p.id == m.provider_id)
                    .map(|p| (m.clone(), p.clone()))
            })
            .collect();
        // Equal priorities go to the earlier-registered provider.
        mapped.sort_by_key(|(m, p)| (m.priority, p.id));
        Ok((strategy, mapped))
    }
}

fn tiers_of(strategy: &Strategy) -> Vec<Tier> {
    match strategy.strategy_type {
        StrategyType::Anthropic => Tier::CANONICAL.to_vec(),
        StrategyType::OpenAI => vec![Tier::Single],
    }
}

fn plan(
    strategy: &Strategy,
    mapped: &[(ProviderMapping, Provider)],
    requested_model: &str,
    preferred_tier: Option<Tier>,
) -> Vec<ResolvedTarget> {
    let mut targets: Vec<ResolvedTarget> = Vec::new();
    let mut used: HashSet<i64> = HashSet::new();
    let requested = requested_model.to_lowercase();

    let mut push = |targets: &mut Vec<ResolvedTarget>, target: ResolvedTarget| {
        if used.insert(target.provider.id) {
            targets.push(target);
        }
    };

    for (mapping, provider) in mapped {
        if let Some((tier, model)) = tiers_of(strategy).into_iter().find_map(|tier| {
            mapping
                .models_for(tier)
                .iter()
                .find(|m| m.to_lowercase() == requested && provider.offers(m))
                .map(|m| (tier, m.clone()))
        }) {
            push(
                &mut targets,
                ResolvedTarget {
                    provider: provider.clone(),
                    mapped_model: model,
                    tier_used: tier,
                    fallback_used: false,
                },
            );
        }
    }

    if let Some(tier) = preferred_tier.filter(|_| strategy.strategy_type == StrategyType::Anthropic)
    {
        for (mapping, provider) in mapped {
            if let Some(model) = first_offered(mapping, provider, tier) {
                push(
                    &mut targets,
                    ResolvedTarget {
                        provider: provider.clone(),
                        mapped_model: model,
                        tier_used: tier,
                        fallback_used: false,
                    },
                );
            }
        }
    }

    if strategy.fallback_enabled {
        let order = match strategy.strategy_type {
            StrategyType::Anthropic => strategy.fallback_order.clone(),
            StrategyType::OpenAI => vec![Tier::Single],
        };
        for (mapping, provider) in mapped {
            if let Some((tier, model)) = order
                .iter()
                .find_map(|&tier| first_offered(mapping, provider, tier).map(|m| (tier, m)))
            {
                push(
                    &mut targets,
                    ResolvedTarget {
                        provider: provider.clone(),
                        mapped_model: model,
                        tier_used: tier,
                        fallback_used: true,
                    },
                );
            }
        }
    }

    targets
}

fn first_offered(mapping: &ProviderMapping, provider: &Provider, tier: Tier) -> Option<String> {
    mapping
        .models_for(tier)
        .iter()
        .find(|m| provider.offers(m))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_proxy::catalog::Catalog;

    fn resolver(toml: &str) -> ModelResolver {
        ModelResolver::new(Arc::new(Catalog::from_toml_str(toml).unwrap()))
    }

    const TWO_PROVIDERS: &str = r#"
[[providers]]
id = 1
name = "p1"
base_url = "https://p1.example/v1"
api_key = "k1"
model_list = ["p1-small"]

[[providers]]
id = 2
name = "p2"
base_url = "https://p2.example/v1"
api_key = "k2"
model_list = ["p2-large", "p2-medium"]

[[strategies]]
id = 1
name = "claude"
strategy_type = "anthropic"
fallback_order = ["large", "medium", "small"]

[[strategies.mappings]]
provider_id = 2
priority = 2
large_models = ["p2-large"]
medium_models = ["p2-medium"]

[[strategies.mappings]]
provider_id = 1
priority = 1
medium_models = ["P2-MEDIUM"]
small_models = ["p1-small"]
"#;

    #[tokio::test]
    async fn test_exact_match_wins_regardless_of_fallback() {
        let r = resolver(TWO_PROVIDERS);
        let target = r
            .resolve("P2-Medium", StrategyType::Anthropic, None)
            .await
            .unwrap();
        assert_eq!(target.mapped_model, "p2-medium");
        assert_eq!(target.provider.name, "p2");
        assert_eq!(target.tier_used, Tier::Medium);
        assert!(!target.fallback_used);

        let no_fallback = TWO_PROVIDERS.replace(
            "fallback_order = [\"large\", \"medium\", \"small\"]",
            "fallback_enabled = false",
        );
        let target = resolver(&no_fallback)
            .resolve("p2-medium", StrategyType::Anthropic, None)
            .await
            .unwrap();
        assert_eq!(target.mapped_model, "p2-medium");
        assert!(!target.fallback_used);
    }

    #[tokio::test]
    async fn test_tier_model_must_be_offered_by_provider() {
        // p1 lists "P2-MEDIUM" as eligible but does not offer it, so the
        // higher-priority p1 only shows up later as a fallback.
        let r = resolver(TWO_PROVIDERS);
        let candidates = r
            .candidates("p2-medium", StrategyType::Anthropic, None)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].provider.name, "p2");
        assert_eq!(candidates[1].provider.name, "p1");
        assert_eq!(candidates[1].mapped_model, "p1-small");
        assert!(candidates[1].fallback_used);
    }

    #[tokio::test]
    async fn test_fallback_walks_tiers_within_provider_first() {
        // p1 has priority 1 but only a small model; p2 has a large one.
        // Provider order is the outer loop, so p1's small model wins.
        let r = resolver(TWO_PROVIDERS);
        let target = r
            .resolve("claude-unknown", StrategyType::Anthropic, None)
            .await
            .unwrap();
        assert_eq!(target.provider.name, "p1");
        assert_eq!(target.mapped_model, "p1-small");
        assert_eq!(target.tier_used, Tier::Small);
        assert!(target.fallback_used);

        let candidates = r
            .candidates("claude-unknown", StrategyType::Anthropic, None)
            .await
            .unwrap();
        let order: Vec<_> = candidates
            .iter()
            .map(|t| (t.provider.name.as_str(), t.mapped_model.as_str()))
            .collect();
        assert_eq!(order, vec![("p1", "p1-small"), ("p2", "p2-large")]);
    }

    #[tokio::test]
    async fn test_preferred_tier_is_not_a_fallback() {
        let r = resolver(TWO_PROVIDERS);
        let target = r
            .resolve("claude-3-opus", StrategyType::Anthropic, Some(Tier::Large))
            .await
            .unwrap();
        assert_eq!(target.provider.name, "p2");
        assert_eq!(target.mapped_model, "p2-large");
        assert_eq!(target.tier_used, Tier::Large);
        assert!(!target.fallback_used);
    }

    #[tokio::test]
    async fn test_no_suitable_model_without_fallback() {
        let toml = TWO_PROVIDERS.replace(
            "fallback_order = [\"large\", \"medium\", \"small\"]",
            "fallback_enabled = false",
        );
        let err = resolver(&toml)
            .resolve("claude-unknown", StrategyType::Anthropic, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Resolution(ResolutionError::NoSuitableModel(ref m)) if m == "claude-unknown"
        ));
    }

    #[tokio::test]
    async fn test_no_strategy_found() {
        let err = resolver(TWO_PROVIDERS)
            .resolve("gpt-4o", StrategyType::OpenAI, None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GatewayError::Resolution(ResolutionError::NoStrategyFound(ref t)) if t == "openai"
        ));
    }

    #[tokio::test]
    async fn test_equal_priority_prefers_lower_provider_id() {
        // Provider 2 is declared and mapped first; id still breaks the tie.
        let toml = r#"
[[providers]]
id = 2
name = "two"
base_url = "https://b.example/v1"
api_key = "k"
model_list = ["m"]

[[providers]]
id = 1
name = "one"
base_url = "https://a.example/v1"
api_key = "k"
model_list = ["m"]

[[strategies]]
id = 1
name = "oa"
strategy_type = "openai"

[[strategies.mappings]]
provider_id = 2
selected_models = ["m"]

[[strategies.mappings]]
provider_id = 1
selected_models = ["m"]
"#;
        let r = resolver(toml);
        let target = r.resolve("M", StrategyType::OpenAI, None).await.unwrap();
        assert_eq!(target.provider.id, 1);
        assert_eq!(target.provider.name, "one");
        assert_eq!(target.tier_used, Tier::Single);
        assert!(!target.fallback_used);

        let fallback = r.resolve("other", StrategyType::OpenAI, None).await.unwrap();
        assert_eq!(fallback.provider.name, "one");
        assert_eq!(fallback.mapped_model, "m");
        assert!(fallback.fallback_used);

        let order: Vec<_> = r
            .candidates("m", StrategyType::OpenAI, None)
            .await
            .unwrap()
            .iter()
            .map(|t| t.provider.id)
            .collect();
        assert_eq!(order, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_list_models() {
        let listings = resolver(TWO_PROVIDERS)
            .list_models(StrategyType::Anthropic)
            .await
            .unwrap();
        let ids: Vec<_> = listings.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["p1-small", "p2-large", "p2-medium"]);
    }
}
