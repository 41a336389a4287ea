//! Total and inactivity deadlines for a single engine call.
//!
//! Both timers race to trigger one shared [`CancellationToken`]. The first to
//! fire records which deadline elapsed and cancels the token; later firings are
//! no-ops. Whoever owns the call must [`LifecycleTimers::clear`] them when the
//! call ends (dropping the pair clears them as well).

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_INACTIVITY_TIMEOUT_MS, DEFAULT_TOTAL_TIMEOUT_MS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub total: Duration,
    pub inactivity: Duration,
}

impl Timeouts {
    pub fn from_millis(total_ms: u64, inactivity_ms: u64) -> Self {
        Self {
            total: Duration::from_millis(total_ms),
            inactivity: Duration::from_millis(inactivity_ms),
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self::from_millis(DEFAULT_TOTAL_TIMEOUT_MS, DEFAULT_INACTIVITY_TIMEOUT_MS)
    }
}

/// Which deadline cancelled the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Total,
    Inactivity,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Total => f.write_str("total"),
            TimeoutKind::Inactivity => f.write_str("inactivity"),
        }
    }
}

pub struct LifecycleTimers {
    cancel: CancellationToken,
    timeouts: Timeouts,
    fired: Arc<OnceLock<TimeoutKind>>,
    total: Option<JoinHandle<()>>,
    inactivity: Option<JoinHandle<()>>,
    cleared: bool,
}

impl LifecycleTimers {
    /// Arm the total deadline. The inactivity deadline is armed by the first
    /// [`touch`](Self::touch).
    pub fn start(cancel: CancellationToken, timeouts: Timeouts) -> Self {
        let fired = Arc::new(OnceLock::new());
        let total = arm(
            TimeoutKind::Total,
            timeouts.total,
            cancel.clone(),
            fired.clone(),
        );

        Self {
            cancel,
            timeouts,
            fired,
            total: Some(total),
            inactivity: None,
            cleared: false,
        }
    }

    /// Restart the inactivity deadline.
    pub fn touch(&mut self) {
        if self.cleared || self.cancel.is_cancelled() {
            return;
        }
        if let Some(previous) = self.inactivity.take() {
            previous.abort();
        }
        self.inactivity = Some(arm(
            TimeoutKind::Inactivity,
            self.timeouts.inactivity,
            self.cancel.clone(),
            self.fired.clone(),
        ));
    }

    /// Cancel both pending deadlines. Idempotent.
    pub fn clear(&mut self) {
        self.cleared = true;
        for handle in [self.total.take(), self.inactivity.take()]
            .into_iter()
            .flatten()
        {
            handle.abort();
        }
    }

    pub fn fired(&self) -> Option<TimeoutKind> {
        self.fired.get().copied()
    }
}

impl Drop for LifecycleTimers {
    fn drop(&mut self) {
        self.clear();
    }
}

fn arm(
    kind: TimeoutKind,
    after: Duration,
    cancel: CancellationToken,
    fired: Arc<OnceLock<TimeoutKind>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(after) => {
                if fired.set(kind).is_ok() {
                    tracing::warn!(
                        "{kind} timeout of {}ms elapsed, cancelling engine call",
                        after.as_millis()
                    );
                    cancel.cancel();
                }
            }
            _ = cancel.cancelled() => {}
        }
    })
}
