use axum::response::Json;
use serde_json::{Value, json};

use crate::constants::SERVICE_NAME;
use crate::{BUILD_TIME, GIT_HASH, VERSION};

/// Service descriptor served at `/`
pub async fn index() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": SERVICE_NAME,
        "version": VERSION,
        "git_hash": GIT_HASH,
        "format": "anthropic",
        "endpoints": {
            "messages": "/v1/messages",
            "messages_alias": "/messages",
            "health": "/health",
            "version": "/version"
        }
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn version() -> Json<Value> {
    Json(json!({
        "version": VERSION,
        "git_hash": GIT_HASH,
        "build_time": BUILD_TIME,
    }))
}
