//! HTTP server for the gateway
//!
//! Serves the OpenAI surface under `/v1` and the Anthropic surface under
//! `/api/anthropic/v1`. Both resolve the requested model to a list of
//! candidate providers and fail over across them.

use super::auth::{extract_api_key, ApiKeyValidator, Principal, StaticKeyValidator};
use super::catalog::{Catalog, ProviderRepository, StrategyType, Tier};
use super::client::{ProviderGateway, ProviderReply};
use super::config::{GatewayConfig, RoutingMode};
use super::convert::{
    convert_anthropic_to_openai, convert_openai_to_anthropic, map_claude_model, unix_timestamp,
};
use super::error::{GatewayError, ResolutionError};
use super::resolver::{ModelListing, ModelResolver, ResolvedTarget};
use super::stream::{spawn_anthropic_stream, spawn_openai_passthrough};
use super::types::*;
use axum::{
    body::Bytes,
    extract::{Extension, Path, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{
        sse::{Event, KeepAlive},
        IntoResponse, Json, Response, Sse,
    },
    routing::{get, post},
    Router,
};
use futures_util::stream::StreamExt;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

/// Server state
pub struct AppState {
    pub config: GatewayConfig,
    pub repository: Arc<dyn ProviderRepository>,
    pub resolver: ModelResolver,
    pub gateway: ProviderGateway,
    pub validator: Arc<dyn ApiKeyValidator>,
}

impl AppState {
    pub fn new(
        config: GatewayConfig,
        repository: Arc<dyn ProviderRepository>,
    ) -> Result<Self, GatewayError> {
        Ok(Self {
            resolver: ModelResolver::new(repository.clone()),
            gateway: ProviderGateway::new(config.request_timeout)?,
            validator: Arc::new(StaticKeyValidator::new(repository.clone())),
            repository,
            config,
        })
    }

    /// Failover list for `model` under the configured routing mode.
    async fn targets(
        &self,
        model: &str,
        strategy_type: StrategyType,
        preferred_tier: Option<Tier>,
    ) -> Result<Vec<ResolvedTarget>, GatewayError> {
        match self.config.routing_mode {
            RoutingMode::Strategy => {
                self.resolver
                    .candidates(model, strategy_type, preferred_tier)
                    .await
            }
            RoutingMode::Legacy => {
                let providers = self.repository.active_providers().await?;
                if providers.is_empty() {
                    return Err(GatewayError::NoActiveProviders);
                }
                Ok(providers
                    .into_iter()
                    .map(|provider| {
                        let mapped_model = match strategy_type {
                            StrategyType::Anthropic => map_claude_model(model, &provider),
                            StrategyType::OpenAI => model.to_string(),
                        };
                        ResolvedTarget {
                            provider,
                            mapped_model,
                            tier_used: Tier::Single,
                            fallback_used: false,
                        }
                    })
                    .collect())
            }
        }
    }

    async fn listings(&self, strategy_type: StrategyType) -> Result<Vec<ModelListing>, GatewayError> {
        match self.config.routing_mode {
            RoutingMode::Strategy => self.resolver.list_models(strategy_type).await,
            RoutingMode::Legacy => {
                let providers = self.repository.active_providers().await?;
                Ok(providers
                    .iter()
                    .flat_map(|p| {
                        p.model_list.iter().map(|m| ModelListing {
                            id: m.clone(),
                            provider_name: p.name.clone(),
                            tier: Tier::Single,
                        })
                    })
                    .collect())
            }
        }
    }
}

/// Which wire shape errors are rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Protocol {
    Anthropic,
    OpenAI,
}

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    let openai = Router::new()
        .route("/chat/completions", post(chat_completions))
        .route("/models", get(openai_models))
        .route("/models/:model_id", get(openai_model))
        .route_layer(middleware::from_fn_with_state(state.clone(), openai_auth));

    let anthropic = Router::new()
        .route("/messages", post(create_message))
        .route("/messages/count_tokens", post(count_tokens))
        .route("/models", get(anthropic_models))
        .route("/models/:model_id", get(anthropic_model))
        .route_layer(middleware::from_fn_with_state(state.clone(), anthropic_auth));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/v1", openai)
        .nest("/api/anthropic/v1", anthropic)
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "PortBroker API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "healthy" }))
}

// ============================================================================
// Authentication
// ============================================================================

async fn openai_auth(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    authorize(&state, Protocol::OpenAI, request, next).await
}

async fn anthropic_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    authorize(&state, Protocol::Anthropic, request, next).await
}

async fn authorize(state: &AppState, protocol: Protocol, mut request: Request, next: Next) -> Response {
    let key = extract_api_key(request.headers());
    match state.validator.validate(key.as_deref()).await {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            log::warn!("Rejected request to {}: {}", request.uri().path(), e);
            error_response(protocol, &e)
        }
    }
}

// ============================================================================
// Anthropic surface
// ============================================================================

/// Create message endpoint - handles both streaming and non-streaming
async fn create_message(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Response {
    match handle_message(&state, &principal, &body).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("POST /messages failed: {}", e);
            error_response(Protocol::Anthropic, &e)
        }
    }
}

async fn handle_message(
    state: &AppState,
    principal: &Principal,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let request: MessagesRequest = decode(body)?;
    request.validate()?;
    log::info!(
        "POST /messages - model: {}, stream: {}, key: {}",
        request.model,
        request.stream,
        principal.name
    );

    let openai_request = convert_anthropic_to_openai(&request);
    let targets = state
        .targets(
            &request.model,
            StrategyType::Anthropic,
            Tier::from_claude_model(&request.model),
        )
        .await?;
    let dispatched = state
        .gateway
        .try_until_success(&targets, &openai_request, request.stream)
        .await?;

    match dispatched.reply {
        ProviderReply::Streaming(upstream) => {
            let rx = spawn_anthropic_stream(upstream.bytes_stream(), request.model.clone());
            let events = ReceiverStream::new(rx).map(|event| {
                let data = serde_json::to_string(&event).unwrap_or_default();
                Ok::<_, Infallible>(Event::default().event(event.event_type()).data(data))
            });
            Ok(streaming_response(events))
        }
        ProviderReply::Complete(body) => {
            let completion = decode_completion(body)?;
            let message = convert_openai_to_anthropic(&completion, &request.model)?;
            log::info!(
                "Response: model={} via {}, tokens={}/{}",
                message.model,
                dispatched.target.provider.name,
                message.usage.input_tokens,
                message.usage.output_tokens
            );
            Ok(Json(message).into_response())
        }
    }
}

/// Count tokens endpoint
///
/// Asks the upstream for a one-token completion and reports its prompt
/// token count.
async fn count_tokens(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match handle_count_tokens(&state, &body).await {
        Ok(count) => Json(count).into_response(),
        Err(e) => {
            log::error!("POST /messages/count_tokens failed: {}", e);
            error_response(Protocol::Anthropic, &e)
        }
    }
}

async fn handle_count_tokens(
    state: &AppState,
    body: &[u8],
) -> Result<TokenCountResponse, GatewayError> {
    let request: TokenCountRequest = decode(body)?;
    request.validate()?;
    log::info!("POST /messages/count_tokens - model: {}", request.model);

    let request = request.into_messages_request();
    let openai_request = convert_anthropic_to_openai(&request);
    let targets = state
        .targets(
            &request.model,
            StrategyType::Anthropic,
            Tier::from_claude_model(&request.model),
        )
        .await?;
    let dispatched = state
        .gateway
        .try_until_success(&targets, &openai_request, false)
        .await?;

    match dispatched.reply {
        ProviderReply::Complete(body) => Ok(TokenCountResponse {
            input_tokens: decode_completion(body)?.usage.prompt_tokens,
        }),
        ProviderReply::Streaming(_) => Err(GatewayError::Translation(
            "expected a complete response for token counting".to_string(),
        )),
    }
}

async fn anthropic_models(State(state): State<Arc<AppState>>) -> Response {
    match state.listings(StrategyType::Anthropic).await {
        Ok(listings) => {
            let data: Vec<AnthropicModel> = listings.iter().map(anthropic_model_entry).collect();
            Json(AnthropicModelList {
                first_id: data.first().map(|m| m.id.clone()),
                last_id: data.last().map(|m| m.id.clone()),
                has_more: false,
                data,
            })
            .into_response()
        }
        Err(e) => error_response(Protocol::Anthropic, &e),
    }
}

async fn anthropic_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Response {
    match find_listing(&state, StrategyType::Anthropic, &model_id).await {
        Ok(listing) => Json(anthropic_model_entry(&listing)).into_response(),
        Err(e) => error_response(Protocol::Anthropic, &e),
    }
}

fn anthropic_model_entry(listing: &ModelListing) -> AnthropicModel {
    AnthropicModel {
        model_type: "model".to_string(),
        id: listing.id.clone(),
        display_name: listing.id.clone(),
        created_at: "1970-01-01T00:00:00Z".to_string(),
    }
}

// ============================================================================
// OpenAI surface
// ============================================================================

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    Extension(principal): Extension<Principal>,
    body: Bytes,
) -> Response {
    match handle_chat_completions(&state, &principal, &body).await {
        Ok(response) => response,
        Err(e) => {
            log::error!("POST /chat/completions failed: {}", e);
            error_response(Protocol::OpenAI, &e)
        }
    }
}

async fn handle_chat_completions(
    state: &AppState,
    principal: &Principal,
    body: &[u8],
) -> Result<Response, GatewayError> {
    let request: ChatCompletionRequest = decode(body)?;
    request.validate()?;
    log::info!(
        "POST /chat/completions - model: {}, stream: {}, key: {}",
        request.model,
        request.stream,
        principal.name
    );

    let targets = state
        .targets(&request.model, StrategyType::OpenAI, None)
        .await?;
    let dispatched = state
        .gateway
        .try_until_success(&targets, &request, request.stream)
        .await?;

    match dispatched.reply {
        ProviderReply::Streaming(upstream) => {
            let rx = spawn_openai_passthrough(upstream.bytes_stream());
            let events = ReceiverStream::new(rx)
                .map(|payload| Ok::<_, Infallible>(Event::default().data(payload)));
            Ok(streaming_response(events))
        }
        ProviderReply::Complete(mut body) => {
            if let Some(object) = body.as_object_mut() {
                object.insert("model".to_string(), Value::String(request.model.clone()));
                object
                    .entry("id")
                    .or_insert_with(|| json!(format!("chatcmpl-{}", Uuid::new_v4().simple())));
            }
            Ok(Json(body).into_response())
        }
    }
}

async fn openai_models(State(state): State<Arc<AppState>>) -> Response {
    match state.listings(StrategyType::OpenAI).await {
        Ok(listings) => Json(OpenAIModelList {
            object: "list".to_string(),
            data: listings.iter().map(openai_model_entry).collect(),
        })
        .into_response(),
        Err(e) => error_response(Protocol::OpenAI, &e),
    }
}

async fn openai_model(
    State(state): State<Arc<AppState>>,
    Path(model_id): Path<String>,
) -> Response {
    match find_listing(&state, StrategyType::OpenAI, &model_id).await {
        Ok(listing) => Json(openai_model_entry(&listing)).into_response(),
        Err(e) => error_response(Protocol::OpenAI, &e),
    }
}

fn openai_model_entry(listing: &ModelListing) -> OpenAIModel {
    OpenAIModel {
        id: listing.id.clone(),
        object: "model".to_string(),
        created: unix_timestamp(),
        owned_by: listing.provider_name.clone(),
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::validation(format!("malformed request body: {}", e)))
}

fn decode_completion(body: Value) -> Result<ChatCompletionResponse, GatewayError> {
    serde_json::from_value(body).map_err(|e| {
        GatewayError::Translation(format!("unexpected chat completion shape: {}", e))
    })
}

async fn find_listing(
    state: &AppState,
    strategy_type: StrategyType,
    model_id: &str,
) -> Result<ModelListing, GatewayError> {
    state
        .listings(strategy_type)
        .await?
        .into_iter()
        .find(|l| l.id.eq_ignore_ascii_case(model_id))
        .ok_or_else(|| ResolutionError::NoSuitableModel(model_id.to_string()).into())
}

fn streaming_response<S>(events: S) -> Response
where
    S: futures_util::Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

fn status_for(error: &GatewayError) -> StatusCode {
    match error {
        GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
        GatewayError::Resolution(ResolutionError::NoStrategyFound(_)) => StatusCode::BAD_REQUEST,
        GatewayError::Resolution(ResolutionError::NoSuitableModel(_)) => StatusCode::NOT_FOUND,
        GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        GatewayError::Translation(_)
        | GatewayError::Provider(_)
        | GatewayError::AllProvidersFailed { .. }
        | GatewayError::NoActiveProviders => StatusCode::BAD_GATEWAY,
        GatewayError::Catalog(_) | GatewayError::Client(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Convert GatewayError to HTTP response
fn error_response(protocol: Protocol, error: &GatewayError) -> Response {
    let status = status_for(error);
    let error_type = match status {
        StatusCode::BAD_REQUEST => "invalid_request_error",
        StatusCode::UNAUTHORIZED => "authentication_error",
        StatusCode::NOT_FOUND => "not_found_error",
        _ => "api_error",
    };

    let body = match protocol {
        Protocol::Anthropic => json!({
            "type": "error",
            "error": {
                "type": error_type,
                "message": error.to_string()
            }
        }),
        Protocol::OpenAI => {
            let code = match status {
                StatusCode::UNAUTHORIZED => Some("invalid_api_key"),
                StatusCode::NOT_FOUND => Some("model_not_found"),
                _ => None,
            };
            json!({
                "error": {
                    "message": error.to_string(),
                    "type": error_type,
                    "code": code
                }
            })
        }
    };

    (status, Json(body)).into_response()
}

/// Load the catalog and serve until the listener fails.
pub async fn run_server(config: GatewayConfig) -> Result<(), Box<dyn std::error::Error>> {
    let catalog = Catalog::from_file(&config.catalog_path)?;
    log::info!(
        "Loaded catalog {}: {} provider(s), {} strategy(ies)",
        config.catalog_path.display(),
        catalog.providers.len(),
        catalog.strategies.len()
    );
    if catalog.api_keys.is_empty() {
        log::warn!("No API keys configured; every request is admitted as anonymous");
    }

    let addr = config.bind_addr();
    let state = AppState::new(config, Arc::new(catalog))?;
    let app = create_router(state);

    log::info!("Starting PortBroker on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Run the server with configuration from the environment
pub async fn run_server_from_env() -> Result<(), Box<dyn std::error::Error>> {
    run_server(GatewayConfig::from_env()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_proxy::test_support::should_skip_httpmock;
    use axum::body::Body;
    use axum::http::Request;
    use httpmock::{Method::POST, MockServer};
    use tower::ServiceExt;

    fn catalog_toml(base_url: &str, extra: &str) -> String {
        format!(
            r#"
[[providers]]
id = 1
name = "upstream"
base_url = "{base_url}"
api_key = "sk-upstream"
model_list = ["gpt-4o", "gpt-4o-mini"]

[[strategies]]
id = 1
name = "claude"
strategy_type = "anthropic"

[[strategies.mappings]]
provider_id = 1
large_models = ["gpt-4o"]
small_models = ["gpt-4o-mini"]

[[strategies]]
id = 2
name = "passthrough"
strategy_type = "openai"

[[strategies.mappings]]
provider_id = 1
selected_models = ["gpt-4o"]
{extra}
"#
        )
    }

    fn app_with(toml: &str, routing_mode: RoutingMode) -> Router {
        let catalog = Catalog::from_toml_str(toml).unwrap();
        let config = GatewayConfig {
            routing_mode,
            ..GatewayConfig::default()
        };
        create_router(AppState::new(config, Arc::new(catalog)).unwrap())
    }

    fn app(base_url: &str) -> Router {
        app_with(&catalog_toml(base_url, ""), RoutingMode::Strategy)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn haiku_request(stream: bool) -> Value {
        json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 100,
            "stream": stream,
            "messages": [{"role": "user", "content": "hi"}]
        })
    }

    #[tokio::test]
    async fn test_root_and_health() {
        let app = app("https://unused.example/v1");

        let response = app.clone().oneshot(get("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"message": "PortBroker API", "version": env!("CARGO_PKG_VERSION")})
        );

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(body_json(response).await, json!({"status": "healthy"}));
    }

    #[tokio::test]
    async fn test_anthropic_message_end_to_end() {
        if should_skip_httpmock() {
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-upstream")
                    .body_includes("\"model\":\"gpt-4o-mini\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        json!({
                            "id": "abc",
                            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
                            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
                        })
                        .to_string(),
                    );
            })
            .await;

        let response = app(&server.url("/v1"))
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(false)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({
                "id": "abc",
                "type": "message",
                "role": "assistant",
                "content": [{"type": "text", "text": "hello"}],
                "model": "claude-3-haiku-20240307",
                "stop_reason": "end_turn",
                "usage": {"input_tokens": 3, "output_tokens": 1}
            })
        );
    }

    #[tokio::test]
    async fn test_anthropic_streaming() {
        if should_skip_httpmock() {
            return;
        }

        let upstream = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"length\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("\"stream\":true");
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(upstream);
            })
            .await;

        let response = app(&server.base_url())
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(true)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");
        assert_eq!(response.headers()["x-accel-buffering"], "no");
        assert_eq!(response.headers()["cache-control"], "no-cache");

        let text = body_text(response).await;
        let order = [
            "event: message_start",
            "event: content_block_start",
            "event: content_block_delta",
            "event: message_delta",
            "event: message_stop",
        ];
        let positions: Vec<usize> = order.iter().map(|e| text.find(e).unwrap()).collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{}", text);
        assert!(text.contains("\"stop_reason\":\"max_tokens\""));
    }

    #[tokio::test]
    async fn test_count_tokens() {
        if should_skip_httpmock() {
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("\"max_tokens\":1")
                    .body_includes("\"model\":\"gpt-4o\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        json!({"id": "c", "choices": [], "usage": {"prompt_tokens": 12}})
                            .to_string(),
                    );
            })
            .await;

        let response = app(&server.base_url())
            .oneshot(post_json(
                "/api/anthropic/v1/messages/count_tokens",
                json!({
                    "model": "claude-3-opus",
                    "messages": [{"role": "user", "content": "count me"}]
                }),
            ))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(body_json(response).await, json!({"input_tokens": 12}));
    }

    #[tokio::test]
    async fn test_openai_passthrough_restores_model() {
        if should_skip_httpmock() {
            return;
        }

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("\"model\":\"gpt-4o\"")
                    .body_includes("\"seed\":1");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        json!({
                            "id": "chatcmpl-1",
                            "model": "gpt-4o-2024-08-06",
                            "system_fingerprint": "fp",
                            "choices": [{"index": 0, "message": {"role": "assistant", "content": "yo"}, "finish_reason": "stop"}]
                        })
                        .to_string(),
                    );
            })
            .await;

        let response = app(&server.base_url())
            .oneshot(post_json(
                "/v1/chat/completions",
                json!({"model": "GPT-4O", "seed": 1, "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["model"], "GPT-4O");
        assert_eq!(body["system_fingerprint"], "fp");
        assert_eq!(body["choices"][0]["message"]["content"], "yo");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_bad_gateway() {
        if should_skip_httpmock() {
            return;
        }

        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/chat/completions");
                then.status(500).body("overloaded");
            })
            .await;

        let response = app(&server.base_url())
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(false)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["type"], "error");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("upstream returned HTTP 500"));
    }

    #[tokio::test]
    async fn test_validation_errors_are_protocol_shaped() {
        let app = app("https://unused.example/v1");

        let mut request = haiku_request(false);
        request["max_tokens"] = json!(0);
        let response = app
            .clone()
            .oneshot(post_json("/api/anthropic/v1/messages", request))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "invalid_request_error");

        let response = app
            .oneshot(post_json("/v1/chat/completions", json!({"model": "gpt-4o"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["type"], "invalid_request_error");
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("malformed request body"));
    }

    #[tokio::test]
    async fn test_missing_strategy_is_bad_request() {
        let no_strategy = app_with(
            r#"
[[providers]]
id = 1
name = "solo"
base_url = "https://solo.example/v1"
api_key = "sk"
"#,
            RoutingMode::Strategy,
        );
        let response = no_strategy
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(false)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]["message"]
            .as_str()
            .unwrap()
            .contains("no active strategy found for type: anthropic"));
    }

    #[tokio::test]
    async fn test_api_key_required_when_configured() {
        let toml = catalog_toml(
            "https://unused.example/v1",
            "\n[[api_keys]]\nname = \"dev\"\nkey = \"pb-dev\"\n",
        );
        let app = app_with(&toml, RoutingMode::Strategy);

        let response = app
            .clone()
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(false)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["type"], "authentication_error");

        let response = app.clone().oneshot(get("/v1/models")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(response).await["error"]["code"], "invalid_api_key");

        let request = Request::builder()
            .uri("/v1/models")
            .header("x-api-key", "pb-dev")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_model_listings() {
        let app = app("https://unused.example/v1");

        let response = app.clone().oneshot(get("/v1/models")).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["object"], "list");
        assert_eq!(body["data"][0]["id"], "gpt-4o");
        assert_eq!(body["data"][0]["owned_by"], "upstream");

        let response = app
            .clone()
            .oneshot(get("/api/anthropic/v1/models"))
            .await
            .unwrap();
        let body = body_json(response).await;
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
        assert_eq!(body["first_id"], "gpt-4o");
        assert_eq!(body["has_more"], false);

        let response = app
            .clone()
            .oneshot(get("/api/anthropic/v1/models/gpt-4o-mini"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.oneshot(get("/v1/models/nope")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"]["code"], "model_not_found");
    }

    #[tokio::test]
    async fn test_legacy_routing_maps_claude_names() {
        if should_skip_httpmock() {
            return;
        }

        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/chat/completions")
                    .body_includes("\"model\":\"gpt-4o-mini\"");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(
                        json!({"id": "l", "choices": [{"message": {"content": "ok"}, "finish_reason": "stop"}]})
                            .to_string(),
                    );
            })
            .await;

        let app = app_with(
            &format!(
                "[[providers]]\nid = 1\nname = \"legacy\"\nbase_url = \"{}\"\napi_key = \"sk\"\nsmall_model = \"gpt-4o-mini\"\n",
                server.base_url()
            ),
            RoutingMode::Legacy,
        );
        let response = app
            .oneshot(post_json("/api/anthropic/v1/messages", haiku_request(false)))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["content"][0]["text"], "ok");
    }
}
