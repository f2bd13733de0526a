//! Request/Response Conversion
//!
//! Pure conversions between the Anthropic Messages format and the OpenAI
//! Chat Completions format, in both directions, plus the finish-reason table
//! and the legacy Claude-name to provider-model mapping.

use super::catalog::Provider;
use super::error::GatewayError;
use super::types::*;
use serde_json::{json, Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

// ============================================================================
// Finish reasons
// ============================================================================

/// Map an OpenAI `finish_reason` onto an Anthropic `stop_reason`.
///
/// Unknown and missing reasons become `end_turn`.
pub fn map_finish_reason(finish_reason: Option<&str>) -> StopReason {
    match finish_reason {
        Some("stop") => StopReason::EndTurn,
        Some("length") => StopReason::MaxTokens,
        Some("content_filter") => StopReason::EndTurn,
        Some("tool_calls") => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}

/// Map an Anthropic `stop_reason` back onto an OpenAI `finish_reason`.
pub fn map_stop_reason(stop_reason: StopReason) -> &'static str {
    match stop_reason {
        StopReason::EndTurn | StopReason::StopSequence => "stop",
        StopReason::MaxTokens => "length",
        StopReason::ToolUse => "tool_calls",
    }
}

// ============================================================================
// Legacy model mapping
// ============================================================================

const SMALL_PATTERNS: &[&str] = &["mini", "small", "haiku", "3.5", "4o-mini"];
const MEDIUM_PATTERNS: &[&str] = &["4o", "sonnet", "medium", "turbo"];
const BIG_PATTERNS: &[&str] = &["4", "gpt-4", "opus", "large", "preview"];

/// Size class used by the legacy single-provider mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeCategory {
    Small,
    Medium,
    Big,
}

impl SizeCategory {
    fn patterns(&self) -> &'static [&'static str] {
        match self {
            SizeCategory::Small => SMALL_PATTERNS,
            SizeCategory::Medium => MEDIUM_PATTERNS,
            SizeCategory::Big => BIG_PATTERNS,
        }
    }

    fn default_model(&self) -> &'static str {
        match self {
            SizeCategory::Small => "gpt-4o-mini",
            SizeCategory::Medium | SizeCategory::Big => "gpt-4o",
        }
    }
}

/// Map a Claude model name onto one of `provider`'s models.
///
/// `haiku` selects the small model, `sonnet` the medium one and `opus` the
/// big one; anything else gets the medium model. A provider without the
/// explicit tier field falls back to keyword matching over its model list.
pub fn map_claude_model(claude_model: &str, provider: &Provider) -> String {
    let lower = claude_model.to_lowercase();
    let (explicit, category) = if lower.contains("haiku") {
        (&provider.small_model, SizeCategory::Small)
    } else if lower.contains("sonnet") {
        (&provider.medium_model, SizeCategory::Medium)
    } else if lower.contains("opus") {
        (&provider.big_model, SizeCategory::Big)
    } else {
        (&provider.medium_model, SizeCategory::Medium)
    };

    match explicit {
        Some(model) if !model.is_empty() => model.clone(),
        _ => select_model_from_list(&provider.model_list, category),
    }
}

/// First entry of `model_list` matching the category's keywords, else the
/// first entry overall.
pub fn select_model_from_list(model_list: &[String], category: SizeCategory) -> String {
    let Some(first) = model_list.first() else {
        return category.default_model().to_string();
    };
    model_list
        .iter()
        .find(|m| {
            let lower = m.to_lowercase();
            category.patterns().iter().any(|p| lower.contains(p))
        })
        .unwrap_or(first)
        .clone()
}

// ============================================================================
// Anthropic -> OpenAI
// ============================================================================

/// Parse tool result content to string
fn tool_result_text(content: &ToolResultContent) -> String {
    match content {
        ToolResultContent::Text(text) => text.clone(),
        ToolResultContent::Blocks(blocks) => {
            let mut result = String::new();
            for block in blocks {
                match block {
                    ContentBlock::Text { text } => {
                        result.push_str(text);
                        result.push('\n');
                    }
                    _ => {
                        if let Ok(json) = serde_json::to_string(block) {
                            result.push_str(&json);
                            result.push('\n');
                        }
                    }
                }
            }
            result.trim().to_string()
        }
    }
}

fn image_part(source: &ImageSource) -> ContentPart {
    let url = match source {
        ImageSource::Base64 { media_type, data } => format!("data:{};base64,{}", media_type, data),
        ImageSource::Url { url } => url.clone(),
    };
    ContentPart::ImageUrl {
        image_url: ImageUrl { url, detail: None },
    }
}

fn parts_to_content(parts: Vec<ContentPart>) -> ChatContent {
    match parts.as_slice() {
        [ContentPart::Text { text }] => ChatContent::Text(text.clone()),
        _ => ChatContent::Parts(parts),
    }
}

/// Flatten one Anthropic message into one or more OpenAI messages.
///
/// Tool results become `tool` messages ahead of the remaining content so
/// they directly follow the assistant turn that requested them.
fn convert_message(msg: &Message, out: &mut Vec<ChatMessage>) {
    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            out.push(ChatMessage::text(msg.role, text.clone()));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            ContentBlock::Image { source } => parts.push(image_part(source)),
            ContentBlock::ToolUse { id, name, input } if msg.role == Role::Assistant => {
                tool_calls.push(ToolCall {
                    id: id.clone(),
                    call_type: "function".to_string(),
                    function: FunctionCall {
                        name: name.clone(),
                        arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                    },
                });
            }
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } => {
                out.push(ChatMessage {
                    role: Role::Tool,
                    content: Some(ChatContent::Text(tool_result_text(content))),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
            other => {
                log::debug!(
                    "Dropping {} block from {} message during translation",
                    block_kind(other),
                    msg.role.as_str()
                );
            }
        }
    }

    let has_tool_calls = !tool_calls.is_empty();
    if parts.is_empty() && !has_tool_calls {
        // Only tool results (already emitted) or only dropped blocks.
        if out.last().map(|m| m.role) == Some(Role::Tool) {
            return;
        }
        out.push(ChatMessage::text(msg.role, String::new()));
        return;
    }

    out.push(ChatMessage {
        role: msg.role,
        content: if parts.is_empty() {
            None
        } else {
            Some(parts_to_content(parts))
        },
        name: None,
        tool_calls: has_tool_calls.then_some(tool_calls),
        tool_call_id: None,
    });
}

fn block_kind(block: &ContentBlock) -> &'static str {
    match block {
        ContentBlock::Text { .. } => "text",
        ContentBlock::Image { .. } => "image",
        ContentBlock::ToolUse { .. } => "tool_use",
        ContentBlock::ToolResult { .. } => "tool_result",
        ContentBlock::Thinking { .. } => "thinking",
        ContentBlock::RedactedThinking { .. } => "redacted_thinking",
    }
}

fn convert_tool_choice(choice: &ToolChoice) -> Value {
    match choice {
        ToolChoice::Auto => json!("auto"),
        ToolChoice::Any => json!("required"),
        ToolChoice::None => json!("none"),
        ToolChoice::Tool { name } => json!({
            "type": "function",
            "function": { "name": name }
        }),
    }
}

/// Convert Anthropic request to OpenAI format.
///
/// The `model` field is carried over unchanged; the dispatcher rewrites it
/// per attempt once a provider has been chosen.
pub fn convert_anthropic_to_openai(request: &MessagesRequest) -> ChatCompletionRequest {
    let mut messages = Vec::new();

    if let Some(ref system) = request.system {
        messages.push(ChatMessage::text(Role::System, system.to_text()));
    }

    for msg in &request.messages {
        convert_message(msg, &mut messages);
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| ChatTool {
                tool_type: "function".to_string(),
                function: FunctionDefinition {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: Some(tool.input_schema.clone()),
                },
            })
            .collect()
    });

    let mut extra = Map::new();
    if let Some(user) = request
        .metadata
        .as_ref()
        .and_then(|m| m.get("user_id"))
        .and_then(Value::as_str)
    {
        extra.insert("user".to_string(), json!(user));
    }

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        max_tokens: Some(request.max_tokens),
        temperature: request.temperature,
        top_p: request.top_p,
        stop: request.stop_sequences.clone().map(StopSequences::Many),
        stream: request.stream,
        tools,
        tool_choice: request.tool_choice.as_ref().map(convert_tool_choice),
        extra,
    }
}

// ============================================================================
// OpenAI -> Anthropic
// ============================================================================

fn parse_arguments(call: &ToolCall) -> Result<Value, String> {
    if call.function.arguments.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| format!("tool call '{}' has malformed arguments: {}", call.id, e))
}

/// Convert OpenAI response to Anthropic format.
///
/// Fails as a whole if any tool call carries arguments that are not valid
/// JSON; a partial message is never returned.
pub fn convert_openai_to_anthropic(
    response: &ChatCompletionResponse,
    original_model: &str,
) -> Result<MessagesResponse, GatewayError> {
    let choice = response.choices.first();
    let mut content = Vec::new();

    if let Some(choice) = choice {
        if let Some(ref text) = choice.message.content {
            if !text.is_empty() {
                content.push(ResponseContentBlock::Text { text: text.clone() });
            }
        }

        if let Some(ref tool_calls) = choice.message.tool_calls {
            for tool_call in tool_calls {
                content.push(ResponseContentBlock::ToolUse {
                    id: tool_call.id.clone(),
                    name: tool_call.function.name.clone(),
                    input: parse_arguments(tool_call).map_err(GatewayError::Translation)?,
                });
            }
        }
    }

    let stop_reason = map_finish_reason(choice.and_then(|c| c.finish_reason.as_deref()));

    Ok(MessagesResponse {
        id: if response.id.is_empty() {
            generate_message_id()
        } else {
            response.id.clone()
        },
        response_type: "message".to_string(),
        role: Role::Assistant,
        content,
        model: original_model.to_string(),
        stop_reason: Some(stop_reason),
        stop_sequence: None,
        usage: Usage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    })
}

fn parse_data_url(url: &str) -> Option<(String, String)> {
    let rest = url.strip_prefix("data:")?;
    let (media_type, data) = rest.split_once(";base64,")?;
    Some((media_type.to_string(), data.to_string()))
}

fn part_to_block(part: &ContentPart) -> ContentBlock {
    match part {
        ContentPart::Text { text } => ContentBlock::Text { text: text.clone() },
        ContentPart::ImageUrl { image_url } => match parse_data_url(&image_url.url) {
            Some((media_type, data)) => ContentBlock::Image {
                source: ImageSource::Base64 { media_type, data },
            },
            None => ContentBlock::Image {
                source: ImageSource::Url {
                    url: image_url.url.clone(),
                },
            },
        },
    }
}

fn convert_openai_tool_choice(choice: &Value) -> Option<ToolChoice> {
    match choice {
        Value::String(s) => match s.as_str() {
            "auto" => Some(ToolChoice::Auto),
            "required" => Some(ToolChoice::Any),
            "none" => Some(ToolChoice::None),
            _ => None,
        },
        Value::Object(_) => choice
            .pointer("/function/name")
            .and_then(Value::as_str)
            .map(|name| ToolChoice::Tool {
                name: name.to_string(),
            }),
        _ => None,
    }
}

/// Convert an OpenAI request into the Anthropic shape.
///
/// System messages are merged into `system`, consecutive `tool` messages are
/// folded into one user turn of `tool_result` blocks, and `max_tokens`
/// defaults to 4096 when the client left it out.
pub fn convert_openai_request_to_anthropic(
    request: &ChatCompletionRequest,
) -> Result<MessagesRequest, GatewayError> {
    let mut system_parts = Vec::new();
    let mut messages: Vec<Message> = Vec::new();
    let mut last_was_tool = false;

    for msg in &request.messages {
        match msg.role {
            Role::System => {
                if let Some(ref content) = msg.content {
                    system_parts.push(content.to_text());
                }
                last_was_tool = false;
            }
            Role::Tool => {
                let block = ContentBlock::ToolResult {
                    tool_use_id: msg.tool_call_id.clone().unwrap_or_default(),
                    content: ToolResultContent::Text(
                        msg.content.as_ref().map(ChatContent::to_text).unwrap_or_default(),
                    ),
                    is_error: None,
                };
                match messages.last_mut() {
                    Some(Message {
                        content: MessageContent::Blocks(blocks),
                        ..
                    }) if last_was_tool => blocks.push(block),
                    _ => messages.push(Message {
                        role: Role::User,
                        content: MessageContent::Blocks(vec![block]),
                    }),
                }
                last_was_tool = true;
            }
            Role::User | Role::Assistant => {
                let mut blocks: Vec<ContentBlock> = match &msg.content {
                    Some(ChatContent::Parts(parts)) => parts.iter().map(part_to_block).collect(),
                    Some(ChatContent::Text(text)) if msg.tool_calls.is_none() => {
                        messages.push(Message {
                            role: msg.role,
                            content: MessageContent::Text(text.clone()),
                        });
                        last_was_tool = false;
                        continue;
                    }
                    Some(ChatContent::Text(text)) if !text.is_empty() => {
                        vec![ContentBlock::Text { text: text.clone() }]
                    }
                    _ => Vec::new(),
                };
                for call in msg.tool_calls.iter().flatten() {
                    let input = parse_arguments(call).map_err(GatewayError::Validation)?;
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }
                messages.push(Message {
                    role: msg.role,
                    content: MessageContent::Blocks(blocks),
                });
                last_was_tool = false;
            }
        }
    }

    let tools = request.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|tool| Tool {
                name: tool.function.name.clone(),
                description: tool.function.description.clone(),
                input_schema: tool
                    .function
                    .parameters
                    .clone()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect()
    });

    Ok(MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens.unwrap_or(4096),
        messages,
        system: (!system_parts.is_empty()).then(|| SystemContent::Text(system_parts.join("\n\n"))),
        stop_sequences: request.stop.clone().map(StopSequences::into_vec),
        stream: request.stream,
        temperature: request.temperature,
        top_p: request.top_p,
        top_k: None,
        metadata: None,
        tools,
        tool_choice: request.tool_choice.as_ref().and_then(convert_openai_tool_choice),
    })
}

/// Convert an Anthropic response into the OpenAI shape.
pub fn convert_anthropic_response_to_openai(
    response: &MessagesResponse,
    original_model: &str,
) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ResponseContentBlock::Text { text: t } => text.push_str(t),
            ResponseContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id: id.clone(),
                call_type: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: input.to_string(),
                },
            }),
        }
    }

    let content = if text.is_empty() && !tool_calls.is_empty() {
        None
    } else {
        Some(text)
    };

    ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: original_model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ResponseMessage {
                role: Role::Assistant,
                content,
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(
                map_stop_reason(response.stop_reason.unwrap_or(StopReason::EndTurn)).to_string(),
            ),
        }],
        usage: ChatUsage {
            prompt_tokens: response.usage.input_tokens,
            completion_tokens: response.usage.output_tokens,
            total_tokens: response.usage.input_tokens + response.usage.output_tokens,
        },
    }
}

// ============================================================================
// Identifiers
// ============================================================================

/// Generate a unique message ID
pub fn generate_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
