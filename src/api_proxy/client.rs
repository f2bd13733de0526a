//! HTTP client for upstream providers.
//!
//! Every provider speaks OpenAI Chat Completions at
//! `{base_url}/chat/completions`. The gateway makes one attempt per target
//! and walks a candidate list until one succeeds.

use super::error::{GatewayError, ProviderError};
use super::resolver::ResolvedTarget;
use super::types::ChatCompletionRequest;
use reqwest::{header, Client};
use serde_json::Value;
use std::time::Duration;

/// Body of a successful upstream attempt.
pub enum ProviderReply {
    /// Decoded JSON of a non-streaming completion.
    Complete(Value),
    /// Open response whose body is still being streamed.
    Streaming(reqwest::Response),
}

/// Successful attempt and the target that produced it.
pub struct Dispatched {
    pub target: ResolvedTarget,
    pub reply: ProviderReply,
}

/// Gateway for making requests to upstream providers
#[derive(Clone)]
pub struct ProviderGateway {
    client: Client,
    insecure_client: Client,
}

impl ProviderGateway {
    pub fn new(timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;
        let insecure_client = Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| GatewayError::Client(e.to_string()))?;

        Ok(Self {
            client,
            insecure_client,
        })
    }

    /// Send `request` to one target, addressed to its mapped model.
    pub async fn call(
        &self,
        target: &ResolvedTarget,
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<ProviderReply, ProviderError> {
        let provider = &target.provider;
        let url = provider.chat_completions_url();
        let body = request.for_upstream(&target.mapped_model, stream);

        let client = if provider.verify_ssl {
            &self.client
        } else {
            &self.insecure_client
        };

        let mut req = client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", provider.api_key))
            .header(header::CONTENT_TYPE, "application/json");

        if stream {
            req = req.header(header::ACCEPT, "text/event-stream");
        }
        for (name, value) in &provider.headers {
            req = req.header(name.as_str(), value.as_str());
        }

        let response = req
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&provider.name, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                provider: provider.name.clone(),
                status: status.as_u16(),
                body,
            });
        }

        if stream {
            return Ok(ProviderReply::Streaming(response));
        }

        response
            .json()
            .await
            .map(ProviderReply::Complete)
            .map_err(|e| ProviderError::Decode {
                provider: provider.name.clone(),
                message: e.to_string(),
            })
    }

    /// Try `targets` in order and return the first success.
    ///
    /// Every failure moves on to the next target; once a streaming response
    /// has been handed back there is no further failover.
    pub async fn try_until_success(
        &self,
        targets: &[ResolvedTarget],
        request: &ChatCompletionRequest,
        stream: bool,
    ) -> Result<Dispatched, GatewayError> {
        let mut last_error = None;

        for (attempt, target) in targets.iter().enumerate() {
            log::info!(
                "Attempt {}/{}: provider {} model {}",
                attempt + 1,
                targets.len(),
                target.provider.name,
                target.mapped_model
            );
            match self.call(target, request, stream).await {
                Ok(reply) => {
                    return Ok(Dispatched {
                        target: target.clone(),
                        reply,
                    })
                }
                Err(e) => {
                    log::warn!("Provider {} failed: {}", target.provider.name, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(last) => Err(GatewayError::AllProvidersFailed {
                attempts: targets.len(),
                last,
            }),
            None => Err(GatewayError::NoActiveProviders),
        }
    }
}
