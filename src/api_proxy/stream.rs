//! Streaming re-emitters.
//!
//! Upstream providers stream OpenAI `chat.completion.chunk` frames. For
//! Anthropic clients those are re-emitted as Anthropic stream events; for
//! OpenAI clients they are re-framed and passed through untouched.

use super::convert::{generate_message_id, map_finish_reason};
use super::types::*;
use futures_util::{Stream, StreamExt};
use std::fmt::Display;
use tokio::sync::mpsc;

/// Largest frame held while waiting for its terminating blank line.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream SSE frame exceeds {limit} bytes")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Accumulates raw upstream bytes and yields complete SSE frames.
///
/// Carriage returns are discarded on entry so `\r\n` framing splits the same
/// way as `\n`. Frames are only decoded as UTF-8 once complete, which keeps
/// multi-byte characters intact across chunk boundaries.
#[derive(Debug)]
pub struct SseFrameBuffer {
    buf: Vec<u8>,
    scanned: usize,
    limit: usize,
}

impl Default for SseFrameBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            limit,
        }
    }

    /// Append bytes and drain every complete frame.
    ///
    /// Fails once the unterminated tail grows past the limit; the buffer is
    /// cleared and the stream should be abandoned.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, FrameTooLarge> {
        self.buf.extend(bytes.iter().copied().filter(|b| *b != b'\r'));

        let mut frames = Vec::new();
        // Earlier bytes were already searched; back up one for a split "\n\n".
        let mut from = self.scanned.saturating_sub(1);
        while let Some(offset) = self.buf[from..].windows(2).position(|w| w == b"\n\n") {
            let pos = from + offset;
            let frame: Vec<u8> = self.buf.drain(..pos + 2).collect();
            frames.push(String::from_utf8_lossy(&frame[..pos]).into_owned());
            from = 0;
        }
        self.scanned = self.buf.len();

        if self.buf.len() > self.limit {
            self.buf.clear();
            self.scanned = 0;
            return Err(FrameTooLarge { limit: self.limit });
        }
        Ok(frames)
    }

    /// Whatever is left once the upstream has closed.
    pub fn take_remainder(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        let text = String::from_utf8_lossy(&rest);
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Payloads carried by one SSE frame.
///
/// `data:` lines are joined into a single payload. A frame without any is
/// read as bare JSON lines, one payload each, so providers that skip the
/// `data:` prefix still get through. Comments and other SSE fields are
/// ignored.
pub fn frame_payloads(frame: &str) -> Vec<String> {
    let mut data = Vec::new();
    let mut bare = Vec::new();
    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if !is_sse_field(line) && !line.trim().is_empty() {
            bare.push(line.trim().to_string());
        }
    }
    if data.is_empty() {
        bare
    } else {
        vec![data.join("\n")]
    }
}

fn is_sse_field(line: &str) -> bool {
    line.starts_with(':')
        || ["event:", "id:", "retry:"]
            .iter()
            .any(|field| line.starts_with(field))
}

// ============================================================================
// Anthropic re-emitter
// ============================================================================

/// State of one OpenAI -> Anthropic stream translation.
#[derive(Debug)]
pub struct AnthropicStreamState {
    message_id: String,
    model: String,
    frames: SseFrameBuffer,
    block_started: bool,
    /// Stop reason seen but not yet reported, waiting on usage.
    pending_stop: Option<StopReason>,
    usage: Option<Usage>,
    terminal: bool,
}

impl AnthropicStreamState {
    pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self::with_buffer(message_id, model, SseFrameBuffer::new())
    }

    pub fn with_buffer(
        message_id: impl Into<String>,
        model: impl Into<String>,
        frames: SseFrameBuffer,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            model: model.into(),
            frames,
            block_started: false,
            pending_stop: None,
            usage: None,
            terminal: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    /// The synthetic `message_start`, sent before any upstream data.
    pub fn start(&self) -> StreamEvent {
        StreamEvent::MessageStart {
            message: StreamMessage {
                id: self.message_id.clone(),
                message_type: "message".to_string(),
                role: Role::Assistant,
                model: self.model.clone(),
                content: Vec::new(),
                stop_reason: None,
                stop_sequence: None,
                usage: Usage::default(),
            },
        }
    }

    /// Feed upstream bytes, returning the events they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        if self.terminal {
            return Vec::new();
        }
        let frames = match self.frames.push(bytes) {
            Ok(frames) => frames,
            Err(e) => return vec![self.fail(e.to_string())],
        };
        let mut events = Vec::new();
        for frame in frames {
            if self.terminal {
                break;
            }
            self.handle_frame(&frame, &mut events);
        }
        events
    }

    /// Upstream closed. Flushes any trailing fragment and terminates.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if let Some(rest) = self.frames.take_remainder() {
            if !self.terminal {
                self.handle_frame(&rest, &mut events);
            }
        }
        if !self.terminal {
            self.stop(&mut events);
        }
        events
    }

    /// Upstream read failed mid-stream.
    pub fn fail(&mut self, message: impl Into<String>) -> StreamEvent {
        self.terminal = true;
        StreamEvent::Error {
            error: ErrorBody {
                error_type: "api_error".to_string(),
                message: message.into(),
            },
        }
    }

    fn handle_frame(&mut self, frame: &str, events: &mut Vec<StreamEvent>) {
        for data in frame_payloads(frame) {
            if self.terminal {
                return;
            }
            self.handle_payload(&data, events);
        }
    }

    fn handle_payload(&mut self, data: &str, events: &mut Vec<StreamEvent>) {
        if data.trim() == "[DONE]" {
            self.stop(events);
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
            Ok(chunk) => chunk,
            Err(e) => {
                log::debug!("Skipping undecodable stream frame: {}", e);
                return;
            }
        };

        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            });
        }

        if let Some(choice) = chunk.choices.first() {
            if let Some(text) = choice.delta.content.as_deref().filter(|t| !t.is_empty()) {
                if !self.block_started {
                    self.block_started = true;
                    events.push(StreamEvent::ContentBlockStart {
                        index: 0,
                        content_block: StreamContentBlock::Text {
                            text: String::new(),
                        },
                    });
                }
                events.push(StreamEvent::ContentBlockDelta {
                    index: 0,
                    delta: StreamDelta::TextDelta {
                        text: text.to_string(),
                    },
                });
            }

            if let Some(ref finish_reason) = choice.finish_reason {
                self.pending_stop = Some(map_finish_reason(Some(finish_reason.as_str())));
            }
        }

        if self.usage.is_some() {
            self.flush_delta(events);
        }
    }

    fn flush_delta(&mut self, events: &mut Vec<StreamEvent>) {
        if let Some(stop_reason) = self.pending_stop.take() {
            events.push(StreamEvent::MessageDelta {
                delta: MessageDeltaData {
                    stop_reason: Some(stop_reason),
                    stop_sequence: None,
                },
                usage: self.usage.unwrap_or_default(),
            });
        }
    }

    fn stop(&mut self, events: &mut Vec<StreamEvent>) {
        self.flush_delta(events);
        self.terminal = true;
        events.push(StreamEvent::MessageStop);
    }
}

/// Translate an upstream OpenAI byte stream into Anthropic events on a
/// background task.
///
/// The task ends, dropping the upstream connection, once the stream is
/// terminal or the receiver has gone away.
pub fn spawn_anthropic_stream<S, B, E>(upstream: S, model: String) -> mpsc::Receiver<StreamEvent>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let mut state = AnthropicStreamState::new(generate_message_id(), model);
        if tx.send(state.start()).await.is_err() {
            return;
        }

        let mut upstream = Box::pin(upstream);
        while let Some(chunk) = upstream.next().await {
            let events = match chunk {
                Ok(bytes) => state.push(bytes.as_ref()),
                Err(e) => {
                    log::error!("Upstream stream failed: {}", e);
                    vec![state.fail(format!("upstream stream error: {}", e))]
                }
            };
            for event in events {
                if tx.send(event).await.is_err() {
                    log::debug!("Client disconnected, dropping upstream stream");
                    return;
                }
            }
            if state.is_terminal() {
                return;
            }
        }

        for event in state.finish() {
            if tx.send(event).await.is_err() {
                return;
            }
        }
    });

    rx
}

// ============================================================================
// OpenAI passthrough
// ============================================================================

/// Re-frames an upstream OpenAI stream for an OpenAI client.
///
/// Yields bare `data:` payloads; the caller wraps each as one SSE event.
#[derive(Debug, Default)]
pub struct OpenAIPassthrough {
    frames: SseFrameBuffer,
    done: bool,
}

impl OpenAIPassthrough {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let frames = match self.frames.push(bytes) {
            Ok(frames) => frames,
            Err(e) => return self.fail(&e.to_string()),
        };
        let mut out = Vec::new();
        for frame in frames {
            self.handle_frame(&frame, &mut out);
        }
        out
    }

    pub fn finish(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        if let Some(rest) = self.frames.take_remainder() {
            self.handle_frame(&rest, &mut out);
        }
        if !self.done {
            self.done = true;
            out.push("[DONE]".to_string());
        }
        out
    }

    pub fn fail(&mut self, message: &str) -> Vec<String> {
        self.done = true;
        let error = serde_json::json!({
            "error": { "message": message, "type": "stream_error" }
        });
        vec![error.to_string(), "[DONE]".to_string()]
    }

    fn handle_frame(&mut self, frame: &str, out: &mut Vec<String>) {
        for data in frame_payloads(frame) {
            if self.done {
                return;
            }
            if data.trim() == "[DONE]" {
                self.done = true;
                out.push("[DONE]".to_string());
            } else {
                out.push(data);
            }
        }
    }
}

/// Pass an upstream OpenAI stream through on a background task.
pub fn spawn_openai_passthrough<S, B, E>(upstream: S) -> mpsc::Receiver<String>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(100);

    tokio::spawn(async move {
        let mut passthrough = OpenAIPassthrough::new();
        let mut upstream = Box::pin(upstream);

        while let Some(chunk) = upstream.next().await {
            let payloads = match chunk {
                Ok(bytes) => passthrough.push(bytes.as_ref()),
                Err(e) => {
                    log::error!("Upstream stream failed: {}", e);
                    passthrough.fail(&format!("upstream stream error: {}", e))
                }
            };
            for payload in payloads {
                if tx.send(payload).await.is_err() {
                    return;
                }
            }
            if passthrough.is_done() {
                return;
            }
        }

        for payload in passthrough.finish() {
            if tx.send(payload).await.is_err() {
                return;
            }
        }
    });

    rx
}
