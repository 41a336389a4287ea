//! SSE streaming of an engine call.
//!
//! The call runs in its own task so that a client disconnect never cancels the
//! engine: the task writes frames eagerly into an unbounded channel whose
//! receiver backs the HTTP body. When the receiver is dropped the task stops
//! writing, clears its timers and keeps draining the engine until it finishes
//! on its own.
//!
//! Keep-alive comments go out every 15 seconds while the output is open.

use std::sync::Arc;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;

use super::prepare::PreparedCall;
use super::translator::{EventTranslator, SseFrame};
use crate::constants::{KEEP_ALIVE_COMMENT, KEEP_ALIVE_INTERVAL};
use crate::engine::QueryEngine;
use crate::error::ClassifiedError;
use crate::lifecycle::{LifecycleTimers, Timeouts};

/// HTTP body plus the session id, which resolves as soon as the engine reports
/// one (or the call ends without reporting any).
pub struct StreamingResponse<S> {
    pub body: S,
    pub session_id: oneshot::Receiver<String>,
}

pub fn stream_messages(
    engine: Arc<dyn QueryEngine>,
    call: PreparedCall,
    timeouts: Timeouts,
) -> StreamingResponse<impl Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    let (session_tx, session_rx) = oneshot::channel();

    tokio::spawn(drive(engine, call, timeouts, Output::new(tx), session_tx));

    let body = stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok(chunk);
        }
    };

    StreamingResponse {
        body,
        session_id: session_rx,
    }
}

/// Write half of the response. `None` once closed.
struct Output {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
}

impl Output {
    fn new(tx: mpsc::UnboundedSender<Bytes>) -> Self {
        Self { tx: Some(tx) }
    }

    fn is_open(&self) -> bool {
        self.tx.is_some()
    }

    /// Receiver dropped, i.e. the client went away
    fn client_gone(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.is_closed())
    }

    async fn closed(&self) {
        match &self.tx {
            Some(tx) => tx.closed().await,
            None => std::future::pending().await,
        }
    }

    fn send_raw(&mut self, chunk: Bytes) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tx.send(chunk).is_ok()
    }

    fn send(&mut self, frames: Vec<SseFrame>) {
        for frame in frames {
            if !self.send_raw(frame.to_bytes()) {
                break;
            }
        }
    }

    fn close(&mut self) {
        self.tx = None;
    }
}

async fn drive(
    engine: Arc<dyn QueryEngine>,
    call: PreparedCall,
    timeouts: Timeouts,
    mut output: Output,
    session_tx: oneshot::Sender<String>,
) {
    let PreparedCall {
        prompt,
        requested_model,
        options,
        mut session,
    } = call;
    let cancel = options.abort.clone();
    let diagnostics = options.diagnostics.clone();
    let mut session_tx = Some(session_tx);

    let mut timers = LifecycleTimers::start(cancel.clone(), timeouts);
    let mut translator = EventTranslator::new(requested_model);

    output.send(translator.preamble());
    timers.touch();

    let mut events = engine.query(prompt, options);
    let mut keep_alive = interval(KEEP_ALIVE_INTERVAL);
    keep_alive.reset(); // Don't fire immediately
    let mut keep_alive_active = true;
    let mut disconnected = false;

    let outcome = loop {
        tokio::select! {
            biased;

            // Client went away: stop writing, but let the engine finish its work
            _ = output.closed(), if output.is_open() => {
                disconnected = true;
                timers.clear();
                translator.abandon();
                output.close();
                tracing::info!(
                    "Client disconnected from {}; letting the engine run to completion",
                    translator.message_id()
                );
            }

            // A lifecycle timer fired
            _ = cancel.cancelled(), if output.is_open() => {
                timers.clear();
                translator.abandon();
                output.close();
                tracing::warn!(
                    "Closing stream {} after {} timeout",
                    translator.message_id(),
                    timers.fired().map(|k| k.to_string()).unwrap_or_else(|| "unknown".into())
                );
            }

            next = events.next() => {
                let event = match next {
                    None => break Ok(()),
                    Some(Ok(event)) => event,
                    Some(Err(err)) => break Err(err),
                };

                if let Some(id) = session.observe(&event)
                    && let Some(tx) = session_tx.take()
                {
                    let _ = tx.send(id.to_string());
                }

                if !output.is_open() {
                    continue;
                }
                if output.client_gone() {
                    disconnected = true;
                    timers.clear();
                    translator.abandon();
                    output.close();
                    tracing::info!(
                        "Client disconnected from {}; letting the engine run to completion",
                        translator.message_id()
                    );
                    continue;
                }

                timers.touch();
                output.send(translator.on_event(&event));
            }

            _ = keep_alive.tick(), if keep_alive_active && output.is_open() => {
                if !output.send_raw(Bytes::from_static(KEEP_ALIVE_COMMENT.as_bytes())) {
                    keep_alive_active = false;
                }
            }
        }
    };

    timers.clear();

    match outcome {
        Ok(()) => {
            output.send(translator.finish());
            tracing::info!(
                state = ?translator.state(),
                session = session.captured().unwrap_or("-"),
                "Stream {} finished after {} turn(s) (result received: {})",
                translator.message_id(),
                translator.turns(),
                translator.completed()
            );
        }
        Err(err) => {
            let classified = ClassifiedError::from_engine(&err, &diagnostics);
            if output.is_open() {
                output.send(translator.fail(&classified));
            } else if disconnected {
                tracing::debug!("Not reporting engine failure to disconnected client");
            }
        }
    }

    output.close();

    if let Some(tx) = session_tx.take() {
        let _ = tx.send(session.resolve());
    }
}
