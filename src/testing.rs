//! Test doubles shared by the unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use serde_json::Value;
use tokio::sync::Notify;

use crate::engine::{AgentEvent, EngineError, EventStream, QueryEngine, QueryOptions};

pub fn event(value: Value) -> AgentEvent {
    serde_json::from_value(value).expect("valid agent event")
}

pub enum Step {
    Emit(AgentEvent),
    Fail(EngineError),
    Sleep(Duration),
    /// Block until the call's abort token fires, then fail like the CLI does
    HangUntilAborted,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub options: QueryOptions,
}

impl std::ops::Deref for RecordedCall {
    type Target = QueryOptions;

    fn deref(&self) -> &QueryOptions {
        &self.options
    }
}

/// Single-use engine that plays back a fixed script.
pub struct ScriptedEngine {
    script: Mutex<Option<Vec<Step>>>,
    calls: Mutex<Vec<RecordedCall>>,
    finished: Arc<AtomicBool>,
    done: Arc<Notify>,
}

impl ScriptedEngine {
    pub fn new(script: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Some(script)),
            calls: Mutex::new(Vec::new()),
            finished: Arc::new(AtomicBool::new(false)),
            done: Arc::new(Notify::new()),
        })
    }

    pub fn last_call(&self) -> RecordedCall {
        self.calls
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("engine was queried")
    }

    /// The script ran to its end
    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    pub async fn wait_finished(&self) {
        let notified = self.done.notified();
        if self.finished() {
            return;
        }
        notified.await;
    }
}

impl QueryEngine for ScriptedEngine {
    fn query(&self, prompt: String, options: QueryOptions) -> EventStream {
        let abort = options.abort.clone();
        self.calls
            .lock()
            .unwrap()
            .push(RecordedCall { prompt, options });
        let steps = self
            .script
            .lock()
            .unwrap()
            .take()
            .expect("scripted engine is single-use");
        let finished = self.finished.clone();
        let done = self.done.clone();

        Box::pin(stream! {
            for step in steps {
                match step {
                    Step::Emit(event) => yield Ok(event),
                    Step::Fail(err) => {
                        yield Err(err);
                        break;
                    }
                    Step::Sleep(duration) => tokio::time::sleep(duration).await,
                    Step::HangUntilAborted => {
                        abort.cancelled().await;
                        yield Err(EngineError::Aborted);
                        break;
                    }
                }
            }
            finished.store(true, Ordering::SeqCst);
            done.notify_waiters();
        })
    }
}

/// Parse an SSE body into `(event, data)` pairs, skipping comment frames.
pub fn parse_sse(raw: &str) -> Vec<(String, Value)> {
    raw.split("\n\n")
        .filter_map(|chunk| {
            let mut name = None;
            let mut data = None;
            for line in chunk.lines() {
                if let Some(rest) = line.strip_prefix("event: ") {
                    name = Some(rest.to_string());
                } else if let Some(rest) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(rest).ok();
                }
            }
            Some((name?, data?))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_sse_skips_comments() {
        let raw = "event: message_start\ndata: {\"type\":\"message_start\"}\n\n: keep-alive\n\nevent: message_stop\ndata: {}\n\n";
        let frames = parse_sse(raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].0, "message_start");
        assert_eq!(frames[1].0, "message_stop");
    }
}
