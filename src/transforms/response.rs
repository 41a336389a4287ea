//! Non-streaming path: drain the engine and return one Messages object.

use std::sync::Arc;

use futures_util::StreamExt;
use serde::Serialize;

use super::prepare::PreparedCall;
use super::translator::new_message_id;
use crate::constants::STOP_REASON_END_TURN;
use crate::engine::{AgentEvent, DiagnosticSink, EngineError, QueryEngine};
use crate::lifecycle::{LifecycleTimers, Timeouts};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub role: &'static str,
    pub content: Vec<TextContent>,
    pub model: String,
    pub stop_reason: &'static str,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct TextContent {
    #[serde(rename = "type")]
    pub content_type: &'static str,
    pub text: String,
}

#[derive(Debug, Default, Serialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl MessageResponse {
    fn new(model: String, text: String) -> Self {
        Self {
            id: new_message_id(),
            response_type: "message",
            role: "assistant",
            content: vec![TextContent {
                content_type: "text",
                text,
            }],
            model,
            stop_reason: STOP_REASON_END_TURN,
            usage: Usage::default(),
        }
    }
}

pub struct AssembledResponse {
    /// Resolved the same way as for streaming responses
    pub session_id: String,
    pub diagnostics: DiagnosticSink,
    pub outcome: Result<MessageResponse, EngineError>,
}

pub async fn assemble_message(
    engine: Arc<dyn QueryEngine>,
    call: PreparedCall,
    timeouts: Timeouts,
) -> AssembledResponse {
    let PreparedCall {
        prompt,
        requested_model,
        options,
        mut session,
    } = call;
    let diagnostics = options.diagnostics.clone();

    let mut timers = LifecycleTimers::start(options.abort.clone(), timeouts);
    timers.touch();

    let mut events = engine.query(prompt, options);
    let mut text = String::new();
    let mut failure = None;

    while let Some(next) = events.next().await {
        match next {
            Ok(event) => {
                timers.touch();
                session.observe(&event);
                if let AgentEvent::Assistant(turn) = &event {
                    turn.text_blocks().for_each(|t| text.push_str(t));
                }
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }

    timers.clear();
    if let Some(kind) = timers.fired() {
        tracing::warn!("Non-streaming call ended by {kind} timeout");
    }

    AssembledResponse {
        session_id: session.resolve(),
        diagnostics,
        outcome: match failure {
            None => Ok(MessageResponse::new(requested_model, text)),
            Some(err) => Err(err),
        },
    }
}
