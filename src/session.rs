//! Resumption identifier plumbing between requests.
//!
//! The engine owns session state; we only forward the inbound id as a resume
//! option and report back whichever id the engine used.

use axum::http::{HeaderMap, HeaderValue};
use axum::response::Response;

use crate::constants::SESSION_HEADER;
use crate::engine::AgentEvent;

#[derive(Debug, Clone)]
pub struct SessionTracker {
    resume: Option<String>,
    captured: Option<String>,
    started_at_ms: i64,
}

impl SessionTracker {
    pub fn new(resume: Option<String>) -> Self {
        Self {
            resume: resume.filter(|id| !id.is_empty()),
            captured: None,
            started_at_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Header lookup is case-insensitive.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let resume = headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string());
        Self::new(resume)
    }

    pub fn resume(&self) -> Option<&str> {
        self.resume.as_deref()
    }

    /// Record the event's session id if none was captured yet. Returns the id
    /// only on the event that captured it.
    pub fn observe(&mut self, event: &AgentEvent) -> Option<&str> {
        if self.captured.is_some() {
            return None;
        }
        let id = event.session_id()?;
        self.captured = Some(id.to_string());
        self.captured.as_deref()
    }

    pub fn captured(&self) -> Option<&str> {
        self.captured.as_deref()
    }

    /// Captured id, else the inbound resume id, else `session_<millis>`.
    pub fn resolve(&self) -> String {
        self.captured
            .clone()
            .or_else(|| self.resume.clone())
            .unwrap_or_else(|| format!("session_{}", self.started_at_ms))
    }
}

/// Attach the session header to an outgoing response.
pub fn with_session_header(mut response: Response, session_id: &str) -> Response {
    match HeaderValue::from_str(session_id) {
        Ok(value) => {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
        Err(e) => tracing::warn!("Cannot send session id {session_id:?} as header: {e}"),
    }
    response
}
