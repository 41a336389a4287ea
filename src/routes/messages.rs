use axum::{
    Json,
    body::Body,
    extract::{State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

use crate::AppState;
use crate::constants::SESSION_ID_WAIT;
use crate::error::{ClassifiedError, ProxyError};
use crate::session::{SessionTracker, with_session_header};
use crate::transforms::streaming::StreamingResponse;
use crate::transforms::{
    MessagesRequest, PreparedCall, assemble_message, prepare_call, stream_messages,
};

pub async fn messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    payload: Result<Json<MessagesRequest>, JsonRejection>,
) -> Response {
    let body = match payload {
        Ok(Json(body)) => body,
        Err(rejection) => {
            let session_id = SessionTracker::from_headers(&headers).resolve();
            return with_session_header(
                ProxyError::InvalidRequest(rejection.body_text()).into_response(),
                &session_id,
            );
        }
    };

    let stream = body.is_streaming();
    let call = prepare_call(body, &headers, &state.config);

    info!(
        model = %call.requested_model,
        tier = %call.options.model,
        stream,
        resume = call.session.resume().unwrap_or("-"),
        "Messages request ({} prompt chars)",
        call.prompt.len()
    );

    if stream {
        stream_response(&state, call).await
    } else {
        json_response(&state, call).await
    }
}

async fn stream_response(state: &AppState, call: PreparedCall) -> Response {
    let fallback_session = call.session.resolve();
    let StreamingResponse { body, session_id } =
        stream_messages(state.engine.clone(), call, state.config.timeouts);

    // Headers go out with the first byte. Give the engine a short window to
    // report its session, then answer with the resume/synthesized id instead.
    let session_id = match tokio::time::timeout(SESSION_ID_WAIT, session_id).await {
        Ok(Ok(id)) => id,
        Ok(Err(_)) => fallback_session,
        Err(_) => {
            tracing::debug!(
                "Engine reported no session within {:?}; using {}",
                SESSION_ID_WAIT,
                fallback_session
            );
            fallback_session
        }
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body))
        .unwrap_or_else(|e| {
            ProxyError::Internal(format!("Failed to build streaming response: {e}"))
                .into_response()
        });

    with_session_header(response, &session_id)
}

async fn json_response(state: &AppState, call: PreparedCall) -> Response {
    let fallback_session = call.session.resolve();

    // Detached so that a client hang-up doesn't drop (and kill) the engine mid-run
    let task = tokio::spawn(assemble_message(
        state.engine.clone(),
        call,
        state.config.timeouts,
    ));

    let assembled = match task.await {
        Ok(assembled) => assembled,
        Err(e) => {
            tracing::error!("Message assembly task failed: {e}");
            return with_session_header(
                ProxyError::Internal(e.to_string()).into_response(),
                &fallback_session,
            );
        }
    };

    let response = match assembled.outcome {
        Ok(message) => Json(message).into_response(),
        Err(err) => {
            ClassifiedError::from_engine(&err, &assembled.diagnostics).to_anthropic_response()
        }
    };

    with_session_header(response, &assembled.session_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::constants::{KEEP_ALIVE_INTERVAL, SESSION_HEADER};
    use crate::engine::EngineError;
    use crate::testing::{ScriptedEngine, Step, event, parse_sse};
    use axum::http::Request;
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(engine: Arc<ScriptedEngine>) -> axum::Router {
        crate::routes::router(Arc::new(AppState {
            config: Arc::new(Config::default()),
            engine,
        }))
    }

    fn post(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn hello_script(session: &str) -> Vec<Step> {
        vec![
            Step::Emit(event(json!({"type": "system", "subtype": "init", "session_id": session}))),
            Step::Emit(event(json!({
                "type": "assistant",
                "session_id": session,
                "message": {"content": [{"type": "text", "text": "hello"}]}
            }))),
            Step::Emit(event(json!({"type": "result", "subtype": "success", "session_id": session}))),
        ]
    }

    #[tokio::test]
    async fn test_non_streaming_hello() {
        let engine = ScriptedEngine::new(hello_script("sess-1"));
        let response = app(engine.clone())
            .oneshot(post(
                "/v1/messages",
                json!({"model": "sonnet", "stream": false, "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[SESSION_HEADER], "sess-1");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );

        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["content"][0]["text"], "hello");
        assert_eq!(body["stop_reason"], "end_turn");
        assert_eq!(engine.last_call().prompt, "Human: hi");
    }

    #[tokio::test]
    async fn test_streaming_is_default_and_alias_route_works() {
        let engine = ScriptedEngine::new(hello_script("sess-2"));
        let response = app(engine.clone())
            .oneshot(post(
                "/messages",
                json!({"model": "claude-opus-4", "messages": [{"role": "user", "content": "hi"}]}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[header::CACHE_CONTROL], "no-cache");
        assert_eq!(response.headers()[SESSION_HEADER], "sess-2");

        let frames = parse_sse(&body_string(response).await);
        let names: Vec<_> = frames.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names.first(), Some(&"message_start"));
        assert_eq!(
            &names[names.len() - 3..],
            ["content_block_stop", "message_delta", "message_stop"]
        );
        assert_eq!(frames[0].1["message"]["model"], "claude-opus-4");
        assert!(engine.last_call().include_partial_messages);
    }

    #[tokio::test]
    async fn test_session_resume_round_trip() {
        // Engine resumes but reports a different id than the one we sent
        let engine = ScriptedEngine::new(hello_script("forked-session"));
        let mut request = post(
            "/v1/messages",
            json!({"stream": false, "messages": [{"role": "user", "content": "again"}]}),
        );
        request
            .headers_mut()
            .insert("X-Claude-Session-ID", "abc123".parse().unwrap());

        let response = app(engine.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[SESSION_HEADER], "forked-session");
        assert_eq!(engine.last_call().resume.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_synthesized_session_when_engine_reports_none() {
        let engine = ScriptedEngine::new(vec![Step::Emit(event(json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": "hi"}]}
        })))]);

        let response = app(engine)
            .oneshot(post("/v1/messages", json!({"messages": []})))
            .await
            .unwrap();
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert!(session.starts_with("session_"));
        body_string(response).await;
    }

    #[tokio::test]
    async fn test_non_streaming_auth_failure() {
        let engine = ScriptedEngine::new(vec![Step::Fail(EngineError::Exit { code: 1 })]);
        let response = app(engine)
            .oneshot(post("/v1/messages", json!({"stream": false, "messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(SESSION_HEADER));
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["type"], "error");
        assert_eq!(body["error"]["type"], "authentication_error");
    }

    #[tokio::test]
    async fn test_streaming_failure_emits_error_frame() {
        let engine = ScriptedEngine::new(vec![Step::Fail(EngineError::Io(
            std::io::Error::other("read ECONNRESET"),
        ))]);
        let response = app(engine)
            .oneshot(post("/v1/messages", json!({"stream": true, "messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let frames = parse_sse(&body_string(response).await);
        let last = frames.last().unwrap();
        assert_eq!(last.0, "error");
        assert_eq!(last.1["error"]["type"], "connection_error");
        assert!(!frames.iter().any(|(n, _)| n == "message_stop"));
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let engine = ScriptedEngine::new(Vec::new());
        let request = Request::builder()
            .uri("/v1/messages")
            .method("POST")
            .header("Content-Type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = app(engine).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response.headers().contains_key(SESSION_HEADER));
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["error"]["type"], "invalid_request_error");
    }

    #[tokio::test]
    async fn test_service_descriptor() {
        let engine = ScriptedEngine::new(Vec::new());
        let request = Request::builder().uri("/").body(Body::empty()).unwrap();

        let response = app(engine).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["format"], "anthropic");
        assert_eq!(body["endpoints"]["messages"], "/v1/messages");
        assert!(body["version"].is_string());
        assert!(body["service"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_gets_headers_before_first_keep_alive() {
        let engine = ScriptedEngine::new(vec![
            Step::Sleep(Duration::from_secs(40)),
            Step::Emit(event(json!({
                "type": "assistant",
                "message": {"content": [{"type": "text", "text": "late"}]}
            }))),
        ]);

        let started = tokio::time::Instant::now();
        let response = tokio::time::timeout(
            KEEP_ALIVE_INTERVAL,
            app(engine).oneshot(post("/v1/messages", json!({"messages": []}))),
        )
        .await
        .expect("headers within one keep-alive interval")
        .unwrap();
        assert!(started.elapsed() < KEEP_ALIVE_INTERVAL);

        assert_eq!(response.status(), StatusCode::OK);
        let session = response.headers()[SESSION_HEADER].to_str().unwrap().to_string();
        assert!(session.starts_with("session_"));

        let raw = body_string(response).await;
        assert!(raw.contains(": keep-alive"));
        let frames = parse_sse(&raw);
        assert_eq!(frames.first().map(|(n, _)| n.as_str()), Some("message_start"));
        assert_eq!(frames.last().map(|(n, _)| n.as_str()), Some("message_stop"));
        assert!(raw.contains("late"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_engine_echoes_resume_id() {
        let engine = ScriptedEngine::new(vec![Step::Sleep(Duration::from_secs(30))]);
        let mut request = post("/v1/messages", json!({"messages": []}));
        request
            .headers_mut()
            .insert(SESSION_HEADER, "abc123".parse().unwrap());

        let response = app(engine).oneshot(request).await.unwrap();
        assert_eq!(response.headers()[SESSION_HEADER], "abc123");
        body_string(response).await;
    }
}
