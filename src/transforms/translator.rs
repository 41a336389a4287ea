//! Agent events → Anthropic Messages SSE frames.
//!
//! [`EventTranslator`] is the pure half of the streaming path: it owns the
//! message lifecycle state machine and turns each [`AgentEvent`] into zero or
//! more [`SseFrame`]s. I/O, timers and disconnect handling live in
//! [`super::streaming`].
//!
//! Frame sequence for a successful response:
//!
//! ```text
//! message_start
//! content_block_start(0)
//!   ... forwarded / synthesized block frames ...
//! content_block_stop(0)
//! message_delta(end_turn)
//! message_stop
//! ```
//!
//! On failure a single `error` frame replaces the closing three.

use bytes::Bytes;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::constants::STOP_REASON_END_TURN;
use crate::engine::events::{PartialEvent, StreamEventEnvelope};
use crate::engine::AgentEvent;
use crate::error::ClassifiedError;

#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    pub event: &'static str,
    pub data: Value,
}

impl SseFrame {
    pub fn new(event: &'static str, data: Value) -> Self {
        Self { event, data }
    }

    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(format!("event: {}\ndata: {}\n\n", self.event, self.data))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranslatorState {
    Preamble,
    StreamingText,
    Closing,
    Done,
    Error,
}

pub fn new_message_id() -> String {
    format!("msg_{}", Uuid::new_v4().simple())
}

pub struct EventTranslator {
    message_id: String,
    model: String,
    state: TranslatorState,
    has_stream_events: bool,
    turns: u32,
    completed: bool,
}

impl EventTranslator {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            model: model.into(),
            state: TranslatorState::Preamble,
            has_stream_events: false,
            turns: 0,
            completed: false,
        }
    }

    pub fn state(&self) -> TranslatorState {
        self.state
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn turns(&self) -> u32 {
        self.turns
    }

    /// Whether the engine delivered its terminal `result` event
    pub fn completed(&self) -> bool {
        self.completed
    }

    pub fn preamble(&mut self) -> Vec<SseFrame> {
        if self.state != TranslatorState::Preamble {
            return Vec::new();
        }
        self.state = TranslatorState::StreamingText;

        vec![
            SseFrame::new(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id,
                        "type": "message",
                        "role": "assistant",
                        "content": [],
                        "model": self.model,
                        "stop_reason": Value::Null,
                        "stop_sequence": Value::Null,
                        "usage": {"input_tokens": 0, "output_tokens": 0}
                    }
                }),
            ),
            block_start(0),
        ]
    }

    pub fn on_event(&mut self, event: &AgentEvent) -> Vec<SseFrame> {
        if self.state != TranslatorState::StreamingText {
            return Vec::new();
        }

        match event {
            AgentEvent::Assistant(turn) => {
                self.turns += 1;
                if self.has_stream_events {
                    // Partial events already carried this turn's text
                    return Vec::new();
                }
                turn.text_blocks()
                    .enumerate()
                    .flat_map(|(index, text)| {
                        let index = index as u32;
                        [block_start(index), text_delta(index, text), block_stop(index)]
                    })
                    .collect()
            }
            AgentEvent::User(echo) => {
                for (tool_use_id, is_error) in echo.tool_results() {
                    tracing::debug!("Tool result for {tool_use_id} (error: {is_error})");
                }
                Vec::new()
            }
            AgentEvent::Result(summary) => {
                self.completed = true;
                tracing::debug!(
                    subtype = summary.subtype.as_deref().unwrap_or("unknown"),
                    is_error = summary.is_error,
                    num_turns = summary.num_turns,
                    duration_ms = summary.duration_ms,
                    total_cost_usd = summary.total_cost_usd,
                    "Engine run finished"
                );
                Vec::new()
            }
            AgentEvent::StreamEvent(envelope) => {
                self.has_stream_events = true;
                forward_partial(envelope)
            }
            AgentEvent::System(_) | AgentEvent::Unknown => Vec::new(),
        }
    }

    /// Natural end of the engine stream.
    pub fn finish(&mut self) -> Vec<SseFrame> {
        if self.state != TranslatorState::StreamingText {
            return Vec::new();
        }
        self.state = TranslatorState::Closing;

        let frames = vec![
            block_stop(0),
            SseFrame::new(
                "message_delta",
                json!({
                    "type": "message_delta",
                    "delta": {"stop_reason": STOP_REASON_END_TURN, "stop_sequence": Value::Null},
                    "usage": {"output_tokens": 0}
                }),
            ),
            SseFrame::new("message_stop", json!({"type": "message_stop"})),
        ];

        self.state = TranslatorState::Done;
        frames
    }

    /// Engine failure while the client is still listening.
    pub fn fail(&mut self, error: &ClassifiedError) -> Vec<SseFrame> {
        if matches!(self.state, TranslatorState::Done | TranslatorState::Error) {
            return Vec::new();
        }
        self.state = TranslatorState::Error;
        vec![error.to_sse_frame()]
    }

    /// Stop emitting without reporting anything (client went away or the
    /// output was closed by a timeout).
    pub fn abandon(&mut self) {
        if self.state != TranslatorState::Done {
            self.state = TranslatorState::Error;
        }
    }
}

fn forward_partial(envelope: &StreamEventEnvelope) -> Vec<SseFrame> {
    match &envelope.event {
        PartialEvent::ContentBlockStart {
            index,
            content_block,
        } => {
            let is_text = content_block
                .as_ref()
                .and_then(|b| b.block_type.as_deref())
                .is_none_or(|t| t == "text");
            if is_text {
                vec![block_start(*index)]
            } else {
                Vec::new()
            }
        }
        PartialEvent::ContentBlockDelta { index, delta } => {
            match (delta.delta_type.as_deref(), delta.text.as_deref()) {
                (Some("text_delta"), text) => vec![text_delta(*index, text.unwrap_or_default())],
                _ => Vec::new(),
            }
        }
        // Forwarded even for suppressed tool blocks
        PartialEvent::ContentBlockStop { index } => vec![block_stop(*index)],
        PartialEvent::Other => Vec::new(),
    }
}

fn block_start(index: u32) -> SseFrame {
    SseFrame::new(
        "content_block_start",
        json!({
            "type": "content_block_start",
            "index": index,
            "content_block": {"type": "text", "text": ""}
        }),
    )
}

fn text_delta(index: u32, text: &str) -> SseFrame {
    SseFrame::new(
        "content_block_delta",
        json!({
            "type": "content_block_delta",
            "index": index,
            "delta": {"type": "text_delta", "text": text}
        }),
    )
}

fn block_stop(index: u32) -> SseFrame {
    SseFrame::new(
        "content_block_stop",
        json!({"type": "content_block_stop", "index": index}),
    )
}
