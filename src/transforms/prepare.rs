//! Prepare an inbound Messages request for the engine.
//!
//! Turns the request body, headers and process configuration into a
//! [`PreparedCall`]:
//! - Compiling the `messages` array into a transcript prompt
//! - Mapping the requested model onto an engine tier
//! - Picking up the resumption id from the session header
//! - Minting the per-call cancellation token and diagnostic buffer

use axum::http::HeaderMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::model::ModelTier;
use super::prompt::{InputMessage, compile_prompt};
use crate::config::Config;
use crate::engine::{DiagnosticSink, QueryOptions};
use crate::session::SessionTracker;

#[derive(Debug, Default, Deserialize)]
pub struct MessagesRequest {
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<InputMessage>>,
    pub stream: Option<bool>,
}

impl MessagesRequest {
    /// Streaming is the default when `stream` is absent.
    pub fn is_streaming(&self) -> bool {
        self.stream.unwrap_or(true)
    }
}

/// Everything needed to issue one engine call.
#[derive(Debug)]
pub struct PreparedCall {
    pub prompt: String,
    /// Model string echoed back to the client
    pub requested_model: String,
    pub options: QueryOptions,
    pub session: SessionTracker,
}

pub fn prepare_call(body: MessagesRequest, headers: &HeaderMap, config: &Config) -> PreparedCall {
    let streaming = body.is_streaming();
    let tier = ModelTier::from_requested(body.model.as_deref());
    let prompt = compile_prompt(body.messages.as_deref().unwrap_or_default());
    let session = SessionTracker::from_headers(headers);

    let options = QueryOptions {
        model: tier,
        cwd: config.cwd.clone(),
        permission_mode: config.permission_mode,
        abort: CancellationToken::new(),
        diagnostics: DiagnosticSink::new(),
        include_partial_messages: streaming,
        resume: session.resume().map(str::to_string),
    };

    PreparedCall {
        prompt,
        requested_model: body.model.unwrap_or_else(|| tier.as_str().to_string()),
        options,
        session,
    }
}
