//! Wire Types
//!
//! Typed representations of the two client-facing protocols: the Anthropic
//! Messages API and the OpenAI Chat Completions API, including the streaming
//! event shapes and the model listing payloads.

use super::error::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Largest `max_tokens` accepted on the Anthropic surface.
pub const MAX_TOKENS_LIMIT: u32 = 8192;

/// Most stop sequences either protocol will carry for an Anthropic request.
pub const MAX_STOP_SEQUENCES: usize = 4;

/// Conversation role shared by both protocols.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

// ============================================================================
// Anthropic types
// ============================================================================

/// Content block types for messages.
///
/// Decoding is closed: a block whose `type` is not listed here fails the
/// whole request instead of being carried along as an opaque map.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: ToolResultContent,
        #[serde(skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
    RedactedThinking {
        data: String,
    },
}

/// Image source for image content blocks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSource {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

/// Content for tool results - can be string or array of content blocks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for ToolResultContent {
    fn default() -> Self {
        ToolResultContent::Text(String::new())
    }
}

/// System message content
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum SystemContent {
    Text(String),
    Blocks(Vec<SystemContentBlock>),
}

impl SystemContent {
    pub fn to_text(&self) -> String {
        match self {
            SystemContent::Text(text) => text.clone(),
            SystemContent::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

/// System content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    pub text: String,
}

/// Message content - can be string or array of content blocks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tool {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}

/// Tool choice configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoice {
    Auto,
    Any,
    Tool { name: String },
    None,
}

/// Anthropic Messages API request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesRequest {
    pub model: String,
    pub max_tokens: u32,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl MessagesRequest {
    /// Check the request against the Anthropic limits before anything is
    /// dispatched upstream.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation("model must not be empty"));
        }
        if self.max_tokens == 0 || self.max_tokens > MAX_TOKENS_LIMIT {
            return Err(GatewayError::validation(format!(
                "max_tokens must be between 1 and {}, got {}",
                MAX_TOKENS_LIMIT, self.max_tokens
            )));
        }
        validate_messages(&self.messages)?;
        validate_unit_interval("temperature", self.temperature)?;
        validate_unit_interval("top_p", self.top_p)?;
        if let Some(ref stops) = self.stop_sequences {
            if stops.len() > MAX_STOP_SEQUENCES {
                return Err(GatewayError::validation(format!(
                    "stop_sequences accepts at most {} entries, got {}",
                    MAX_STOP_SEQUENCES,
                    stops.len()
                )));
            }
        }
        Ok(())
    }
}

fn validate_messages(messages: &[Message]) -> Result<(), GatewayError> {
    if messages.is_empty() {
        return Err(GatewayError::validation("messages must not be empty"));
    }
    for (i, msg) in messages.iter().enumerate() {
        if !matches!(msg.role, Role::User | Role::Assistant) {
            return Err(GatewayError::validation(format!(
                "messages[{}].role must be \"user\" or \"assistant\", got \"{}\"",
                i,
                msg.role.as_str()
            )));
        }
    }
    Ok(())
}

fn validate_unit_interval(field: &str, value: Option<f32>) -> Result<(), GatewayError> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(GatewayError::validation(format!(
            "{} must be between 0 and 1, got {}",
            field, v
        ))),
        _ => Ok(()),
    }
}

/// Usage statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Response content block (text or tool_use)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

/// Stop reason for message completion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
    ToolUse,
}

/// Anthropic Messages API response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type", default = "default_type")]
    pub response_type: String,
    #[serde(default = "default_role")]
    pub role: Role,
    pub content: Vec<ResponseContentBlock>,
    pub model: String,
    pub stop_reason: Option<StopReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

fn default_role() -> Role {
    Role::Assistant
}

fn default_type() -> String {
    "message".to_string()
}

/// Token count request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCountRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
}

impl TokenCountRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation("model must not be empty"));
        }
        validate_messages(&self.messages)
    }

    /// The forwarded form: a one-token, non-streaming messages request.
    pub fn into_messages_request(self) -> MessagesRequest {
        MessagesRequest {
            model: self.model,
            max_tokens: 1,
            messages: self.messages,
            system: self.system,
            stop_sequences: None,
            stream: false,
            temperature: None,
            top_p: None,
            top_k: None,
            metadata: None,
            tools: self.tools,
            tool_choice: self.tool_choice,
        }
    }
}

/// Token count response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCountResponse {
    pub input_tokens: u32,
}

/// Anthropic error payload body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
}

/// Anthropic model listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicModel {
    #[serde(rename = "type")]
    pub model_type: String,
    pub id: String,
    pub display_name: String,
    pub created_at: String,
}

/// Anthropic `GET /models` page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropicModelList {
    pub data: Vec<AnthropicModel>,
    pub has_more: bool,
    pub first_id: Option<String>,
    pub last_id: Option<String>,
}

// ============================================================================
// OpenAI-compatible types
// ============================================================================

/// OpenAI message format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ChatContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(ChatContent::Text(text.into())),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.role == Role::Tool && self.tool_call_id.is_none() {
            return Err(GatewayError::validation(
                "a message with role \"tool\" must carry tool_call_id",
            ));
        }
        if self.tool_calls.is_some() && self.role != Role::Assistant {
            return Err(GatewayError::validation(format!(
                "only assistant messages may carry tool_calls, got role \"{}\"",
                self.role.as_str()
            )));
        }
        Ok(())
    }
}

/// OpenAI content - can be string or array
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl ChatContent {
    /// Concatenated text of the content, ignoring non-text parts.
    pub fn to_text(&self) -> String {
        match self {
            ChatContent::Text(text) => text.clone(),
            ChatContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::ImageUrl { .. } => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// OpenAI content part
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

/// OpenAI image URL
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// OpenAI tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// OpenAI function in tool call
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub arguments: String,
}

/// OpenAI tool definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTool {
    #[serde(rename = "type", default = "default_call_type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// OpenAI function definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// `stop` accepts a single string or a list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

impl StopSequences {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(v) => v,
        }
    }
}

/// OpenAI chat completion request.
///
/// Fields the gateway does not interpret (`frequency_penalty`, `seed`,
/// `user`, ...) are kept in `extra` and forwarded unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default)]
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ChatTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatCompletionRequest {
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.model.trim().is_empty() {
            return Err(GatewayError::validation("model must not be empty"));
        }
        if self.messages.is_empty() {
            return Err(GatewayError::validation("messages must not be empty"));
        }
        self.messages.iter().try_for_each(ChatMessage::validate)
    }

    /// Copy of this request addressed to `model`, with the stream flag set
    /// for the attempt being made.
    pub fn for_upstream(&self, model: &str, stream: bool) -> Self {
        let mut request = self.clone();
        request.model = model.to_string();
        request.stream = stream;
        request
    }
}

/// OpenAI chat completion response.
///
/// Upstreams vary in which fields they bother to send, so everything except
/// `choices` content has a default.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default = "default_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
    #[serde(default)]
    pub usage: ChatUsage,
}

fn default_object() -> String {
    "chat.completion".to_string()
}

/// OpenAI choice in response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatChoice {
    #[serde(default)]
    pub index: u32,
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// OpenAI response message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMessage {
    #[serde(default = "default_role")]
    pub role: Role,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// OpenAI usage statistics
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ChatUsage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// OpenAI streaming chunk (`chat.completion.chunk`)
#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<ChatUsage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: ChunkDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// OpenAI model listing entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModel {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

/// OpenAI `GET /models` payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAIModelList {
    pub object: String,
    pub data: Vec<OpenAIModel>,
}

// ============================================================================
// Streaming types
// ============================================================================

/// Server-Sent Event for streaming
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: StreamMessage },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: u32,
        content_block: StreamContentBlock,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: u32, delta: StreamDelta },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: MessageDeltaData,
        usage: Usage,
    },
    #[serde(rename = "message_stop")]
    MessageStop,
    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

impl StreamEvent {
    /// SSE `event:` name for this payload.
    pub fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// The event rendered as one SSE frame, blank line included.
    pub fn to_sse_frame(&self) -> String {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        format!("event: {}\ndata: {}\n\n", self.event_type(), data)
    }
}

/// Stream message data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub message_type: String,
    pub role: Role,
    pub model: String,
    pub content: Vec<Value>,
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
    pub usage: Usage,
}

/// Stream content block
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
}

/// Stream delta
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum StreamDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
}

/// Message delta data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageDeltaData {
    pub stop_reason: Option<StopReason>,
    pub stop_sequence: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anthropic_request(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_valid_anthropic_request() {
        let req = anthropic_request(json!({
            "model": "claude-3-haiku-20240307",
            "max_tokens": 10,
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(req.validate().is_ok());
        assert!(!req.stream);
    }

    #[test]
    fn test_max_tokens_bounds() {
        for max_tokens in [0, 8193] {
            let req = anthropic_request(json!({
                "model": "m",
                "max_tokens": max_tokens,
                "messages": [{"role": "user", "content": "hi"}]
            }));
            assert!(matches!(req.validate(), Err(GatewayError::Validation(_))));
        }
    }

    #[test]
    fn test_missing_max_tokens_fails_decode() {
        let res = serde_json::from_value::<MessagesRequest>(json!({
            "model": "m",
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_sampling_and_stop_limits() {
        let req = anthropic_request(json!({
            "model": "m",
            "max_tokens": 5,
            "temperature": 1.5,
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(req.validate().is_err());

        let req = anthropic_request(json!({
            "model": "m",
            "max_tokens": 5,
            "stop_sequences": ["a", "b", "c", "d", "e"],
            "messages": [{"role": "user", "content": "hi"}]
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_unknown_block_type_is_rejected() {
        let res = serde_json::from_value::<MessagesRequest>(json!({
            "model": "m",
            "max_tokens": 5,
            "messages": [{
                "role": "user",
                "content": [{"type": "hologram", "payload": "?"}]
            }]
        }));
        assert!(res.is_err());
    }

    #[test]
    fn test_system_role_rejected_in_anthropic_messages() {
        let req = anthropic_request(json!({
            "model": "m",
            "max_tokens": 5,
            "messages": [{"role": "system", "content": "be nice"}]
        }));
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_chat_message_invariants() {
        let tool_without_id = ChatMessage::text(Role::Tool, "42");
        assert!(tool_without_id.validate().is_err());

        let mut user_with_calls = ChatMessage::text(Role::User, "hi");
        user_with_calls.tool_calls = Some(vec![]);
        assert!(user_with_calls.validate().is_err());
    }

    #[test]
    fn test_openai_request_keeps_unknown_fields() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4o",
            "messages": [{"role": "user", "content": "hi"}],
            "seed": 7,
            "stop": "END"
        }))
        .unwrap();
        assert_eq!(req.extra.get("seed"), Some(&json!(7)));
        assert_eq!(req.stop.clone().unwrap().into_vec(), vec!["END".to_string()]);

        let out = serde_json::to_value(req.for_upstream("gpt-4o-mini", true)).unwrap();
        assert_eq!(out["model"], "gpt-4o-mini");
        assert_eq!(out["stream"], true);
        assert_eq!(out["seed"], 7);
    }

    #[test]
    fn test_lenient_upstream_response() {
        let resp: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "abc",
            "choices": [{"message": {"content": "hello"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 3, "completion_tokens": 1}
        }))
        .unwrap();
        assert_eq!(resp.object, "chat.completion");
        assert_eq!(resp.choices[0].message.role, Role::Assistant);
        assert_eq!(resp.usage.total_tokens, 0);
    }

    #[test]
    fn test_stream_event_frame() {
        let frame = StreamEvent::MessageStop.to_sse_frame();
        assert_eq!(frame, "event: message_stop\ndata: {\"type\":\"message_stop\"}\n\n");
    }
}
