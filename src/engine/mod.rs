//! The agent query engine the proxy drives.
//!
//! The proxy only needs a narrow contract from the engine: given a prompt and
//! [`QueryOptions`], produce a lazy stream of [`AgentEvent`]s that ends
//! naturally or with an [`EngineError`]. [`ClaudeCli`] is the production
//! implementation.

pub mod claude_cli;
pub mod events;

use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures_util::Stream;
use tokio_util::sync::CancellationToken;

use crate::config::PermissionMode;
use crate::constants::DIAGNOSTIC_BUFFER_LIMIT;
use crate::transforms::model::ModelTier;

pub use claude_cli::ClaudeCli;
pub use events::AgentEvent;

/// Lazy per-call event stream. Not resumable: each query starts a new one.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, EngineError>> + Send>>;

pub trait QueryEngine: Send + Sync + 'static {
    fn query(&self, prompt: String, options: QueryOptions) -> EventStream;
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub model: ModelTier,
    pub cwd: Option<PathBuf>,
    pub permission_mode: PermissionMode,
    /// Cancelling this token must terminate the engine's work
    pub abort: CancellationToken,
    pub diagnostics: DiagnosticSink,
    pub include_partial_messages: bool,
    pub resume: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Failed to spawn Claude Code process: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Claude Code process exited with code {code}")]
    Exit { code: i32 },

    #[error("Claude Code process terminated by signal")]
    Terminated,

    #[error("Claude Code process aborted by user")]
    Aborted,

    #[error("Engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Runtime-level abort (the transport was torn down underneath us)
    pub fn is_abort(&self) -> bool {
        match self {
            EngineError::Io(e) | EngineError::Spawn(e) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionAborted | std::io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Append-only buffer for the engine's stderr.
///
/// Lines are logged at debug level as they arrive and the buffer is dumped
/// when a call fails. Only the most recent `limit` bytes are kept.
#[derive(Debug, Clone)]
pub struct DiagnosticSink {
    buffer: Arc<Mutex<String>>,
    limit: usize,
}

impl Default for DiagnosticSink {
    fn default() -> Self {
        Self::with_limit(DIAGNOSTIC_BUFFER_LIMIT)
    }
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(String::new())),
            limit,
        }
    }

    pub fn push(&self, line: &str) {
        tracing::debug!(target: "engine", "{line}");
        let mut buffer = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buffer.push_str(line);
        buffer.push('\n');

        if buffer.len() > self.limit {
            let mut cut = buffer.len() - self.limit;
            while !buffer.is_char_boundary(cut) {
                cut += 1;
            }
            buffer.drain(..cut);
        }
    }

    pub fn contents(&self) -> String {
        self.buffer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
