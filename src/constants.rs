use std::time::Duration;

/// Service name reported by the descriptor endpoint
pub const SERVICE_NAME: &str = "claude-agent-proxy";

/// Request/response header carrying the engine's resumption identifier
pub const SESSION_HEADER: &str = "x-claude-session-id";

/// Default total request budget (1 hour)
pub const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 3_600_000;

/// Default inactivity budget between engine events (15 minutes)
pub const DEFAULT_INACTIVITY_TIMEOUT_MS: u64 = 900_000;

/// Keep-alive interval for SSE streams (prevents proxy/load balancer timeouts).
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// SSE keep-alive comment (ignored by clients but keeps connection alive).
pub const KEEP_ALIVE_COMMENT: &str = ": keep-alive\n\n";

/// Default executable for the Claude Code CLI engine
pub const DEFAULT_CLAUDE_BIN: &str = "claude";

/// Stop reason reported for every completed response
pub const STOP_REASON_END_TURN: &str = "end_turn";

/// Longest a streaming response holds its headers waiting for the engine's
/// session id. Stays well under the keep-alive interval.
pub const SESSION_ID_WAIT: Duration = Duration::from_secs(5);

/// Grace period for the engine's stderr to drain after the process exits
pub const STDERR_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Engine stderr kept per call; older output is discarded first
pub const DIAGNOSTIC_BUFFER_LIMIT: usize = 64 * 1024;
