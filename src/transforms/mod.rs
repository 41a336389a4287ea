//! Request/response transformations between the Messages API and the engine.
//!
//! This module provides:
//! - `prompt`: Flatten `messages` into a transcript prompt
//! - `model`: Map requested model ids onto engine tiers
//! - `prepare`: Build an engine call from an inbound request
//! - `translator`: Agent events → Anthropic SSE frames (state machine)
//! - `streaming`: Drive a call as an SSE body (timers, keep-alive, disconnects)
//! - `response`: Drive a call into a single JSON message

pub mod model;
pub mod prepare;
pub mod prompt;
pub mod response;
pub mod streaming;
pub mod translator;

// Re-export commonly used items
pub use prepare::{MessagesRequest, PreparedCall, prepare_call};
pub use response::assemble_message;
pub use streaming::stream_messages;
