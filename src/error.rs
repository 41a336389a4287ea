use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use crate::engine::{DiagnosticSink, EngineError};
use crate::transforms::translator::SseFrame;

const AUTHENTICATION_FAILED_MESSAGE: &str = "Claude Code authentication failed. \
     Run `claude login` (or `claude /login`) on the proxy host to re-authenticate, then retry.";

const PROCESS_ABORTED_MESSAGE: &str = "The Claude Code process was aborted before it finished. \
     This usually means the request exceeded its time limit, the host ran low on resources, \
     the network connection to Anthropic dropped, or the account hit a rate limit.";

/// Failure taxonomy surfaced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Authentication,
    /// Engine process was aborted (api_error on the wire)
    Aborted,
    Connection,
    Api,
}

impl ErrorCategory {
    pub fn error_type(&self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication_error",
            ErrorCategory::Aborted | ErrorCategory::Api => "api_error",
            ErrorCategory::Connection => "connection_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCategory::Authentication => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
}

/// Map an engine failure onto the client-facing taxonomy. First match wins.
pub fn classify(err: &EngineError) -> ClassifiedError {
    let raw = err.to_string();

    let (category, message) = if raw.contains("exited with code 1") || raw.contains("exit code 1")
    {
        (
            ErrorCategory::Authentication,
            AUTHENTICATION_FAILED_MESSAGE.to_string(),
        )
    } else if raw.contains("process aborted") || raw.contains("aborted by user") {
        (ErrorCategory::Aborted, PROCESS_ABORTED_MESSAGE.to_string())
    } else if raw.contains("reset") || raw.contains("ECONNRESET") || err.is_abort() {
        (ErrorCategory::Connection, raw)
    } else {
        (ErrorCategory::Api, raw)
    };

    ClassifiedError { category, message }
}

impl ClassifiedError {
    /// Classify and dump everything the engine wrote to stderr to the operator log.
    pub fn from_engine(err: &EngineError, diagnostics: &DiagnosticSink) -> Self {
        let classified = classify(err);
        let stderr = diagnostics.contents();
        tracing::error!(
            category = classified.category.error_type(),
            "Engine call failed: {err}"
        );
        if stderr.trim().is_empty() {
            tracing::error!("Engine stderr: <empty>");
        } else {
            tracing::error!("Engine stderr:\n{}", stderr.trim_end());
        }
        classified
    }

    pub fn body(&self) -> Value {
        json!({
            "type": "error",
            "error": {
                "type": self.category.error_type(),
                "message": self.message
            }
        })
    }

    pub fn to_sse_frame(&self) -> SseFrame {
        SseFrame::new("error", self.body())
    }

    pub fn to_anthropic_response(&self) -> Response {
        (self.category.status(), Json(self.body())).into_response()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProxyError {
    /// Convert error to Anthropic-compatible error response
    pub fn to_anthropic_response(&self) -> Response {
        match self {
            ProxyError::InvalidRequest(_) => (
                StatusCode::BAD_REQUEST,
                Json(json!({
                    "type": "error",
                    "error": {
                        "type": "invalid_request_error",
                        "message": self.to_string()
                    }
                })),
            )
                .into_response(),
            ProxyError::Internal(_) => ClassifiedError {
                category: ErrorCategory::Api,
                message: self.to_string(),
            }
            .to_anthropic_response(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        self.to_anthropic_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_exit_code_one_is_authentication() {
        let classified = classify(&EngineError::Exit { code: 1 });
        assert_eq!(classified.category, ErrorCategory::Authentication);
        assert_eq!(classified.category.status(), StatusCode::UNAUTHORIZED);
        assert!(classified.message.contains("re-authenticate"));
    }

    #[test]
    fn test_abort_is_api_error_with_explanation() {
        let classified = classify(&EngineError::Aborted);
        assert_eq!(classified.category, ErrorCategory::Aborted);
        assert_eq!(classified.category.error_type(), "api_error");
        assert_eq!(classified.category.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(classified.message, PROCESS_ABORTED_MESSAGE);
    }

    #[test]
    fn test_reset_is_connection_error_with_raw_message() {
        let err = EngineError::Io(io::Error::other("read ECONNRESET"));
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Connection);
        assert_eq!(classified.message, err.to_string());

        let err = EngineError::Io(io::Error::other("Connection reset by peer"));
        assert_eq!(classify(&err).category, ErrorCategory::Connection);

        let err = EngineError::Io(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(classify(&err).category, ErrorCategory::Connection);
    }

    #[test]
    fn test_everything_else_is_api_error() {
        let err = EngineError::Exit { code: 2 };
        let classified = classify(&err);
        assert_eq!(classified.category, ErrorCategory::Api);
        assert_eq!(classified.message, "Claude Code process exited with code 2");
    }

    #[test]
    fn test_first_match_wins() {
        // Mentions both an exit code 1 and a reset: authentication takes precedence
        let err = EngineError::Io(io::Error::other(
            "process exited with code 1 after connection reset",
        ));
        assert_eq!(classify(&err).category, ErrorCategory::Authentication);
    }

    #[test]
    fn test_error_body_shape() {
        let body = classify(&EngineError::Exit { code: 3 }).body();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "api_error");
        assert_eq!(body["error"]["message"], "Claude Code process exited with code 3");
    }

    #[test]
    fn test_invalid_request_status() {
        let response = ProxyError::InvalidRequest("bad json".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = ProxyError::Internal("task panicked".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
